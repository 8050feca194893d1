use datasmith_core::graph;
use datasmith_core::spec::preflight;

use crate::args::CheckArgs;
use crate::commands::load_spec;

pub fn run(args: &CheckArgs) -> anyhow::Result<()> {
    let spec = load_spec(&args.spec)?;
    preflight::check(&spec)?;
    let plan = graph::plan(&spec)?;
    println!(
        "Specification OK: {} nodes across {} generations",
        spec.nodes.len(),
        plan.generations.len()
    );
    Ok(())
}
