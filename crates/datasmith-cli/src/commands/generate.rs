use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use datasmith_core::generate;
use datasmith_core::output::{self, csv::CsvSink};
use datasmith_core::validate;

use crate::args::GenerateArgs;
use crate::commands::load_spec;

pub fn run(args: &GenerateArgs) -> anyhow::Result<()> {
    let spec = load_spec(&args.spec)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("static template"),
    );
    spinner.set_message(format!(
        "generating '{}' with seed {}",
        spec.metadata.name, args.seed
    ));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let dataset = generate::generate(&spec, args.seed).context("generation failed")?;
    spinner.finish_and_clear();

    let mut sink = CsvSink::new(&args.out)
        .with_context(|| format!("opening sink at {}", args.out.display()))?;
    output::write_dataset(&mut sink, &dataset).context("writing dataset")?;

    let total_rows: usize = dataset.tables.values().map(|t| t.row_count()).sum();
    println!(
        "Wrote {} tables ({} rows) to {}",
        dataset.tables.len(),
        total_rows,
        args.out.display()
    );
    for table in dataset.tables.values() {
        println!("  {:<24} {:>10} rows", table.name, table.row_count());
    }

    if args.validate {
        let report = validate::validate(&spec, &dataset);
        println!(
            "Validation: {}/{} checks passed, quality score {:.1}",
            report.summary.passed, report.summary.total_checks, report.summary.quality_score
        );
    }

    Ok(())
}
