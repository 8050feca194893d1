use anyhow::{bail, Context};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table as TerminalTable};

use datasmith_core::output::csv::read_dataset;
use datasmith_core::validate::{self, CheckStatus};

use crate::args::ValidateArgs;
use crate::commands::load_spec;

pub fn run(args: &ValidateArgs) -> anyhow::Result<()> {
    let spec = load_spec(&args.spec)?;
    let dataset = read_dataset(&args.data, &spec)
        .with_context(|| format!("reading dataset from {}", args.data.display()))?;

    let report = validate::validate(&spec, &dataset);

    let mut table = TerminalTable::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["status", "check", "table", "message"]);
    for check in &report.checks {
        let status = match check.status {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "FAIL",
        };
        table.add_row([
            status,
            check.name.as_str(),
            check.table.as_str(),
            check.message.as_str(),
        ]);
    }
    println!("{}", table);
    println!(
        "{}/{} checks passed, quality score {:.1}",
        report.summary.passed, report.summary.total_checks, report.summary.quality_score
    );

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    if !report.meets_threshold(args.threshold) {
        bail!(
            "validation below threshold: structural_ok={}, score {:.1} < {}",
            report.structural_ok(),
            report.summary.quality_score,
            args.threshold
        );
    }
    Ok(())
}
