use datasmith_core::graph;

use crate::args::GraphArgs;
use crate::commands::load_spec;

pub fn run(args: &GraphArgs) -> anyhow::Result<()> {
    let spec = load_spec(&args.spec)?;
    let plan = graph::plan(&spec)?;
    for (level, generation) in plan.generations.iter().enumerate() {
        println!("generation {}: {}", level, generation.join(", "));
    }
    Ok(())
}
