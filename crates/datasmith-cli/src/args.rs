use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "datasmith",
    version,
    about = "Generate large, reproducible, relational synthetic datasets"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a dataset from a specification
    Generate(GenerateArgs),
    /// Validate an emitted dataset against its specification
    Validate(ValidateArgs),
    /// Preflight a specification without generating
    Check(CheckArgs),
    /// Print the dependency plan as topological generations
    Graph(GraphArgs),
}

#[derive(Args)]
pub struct GenerateArgs {
    /// Path to the JSON specification
    #[arg(long)]
    pub spec: PathBuf,

    /// Output directory for CSV files and sidecars
    #[arg(long)]
    pub out: PathBuf,

    /// Master seed; the same seed and spec reproduce identical files
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Run the validator against the emitted dataset afterwards
    #[arg(long)]
    pub validate: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Path to the JSON specification
    #[arg(long)]
    pub spec: PathBuf,

    /// Directory holding the emitted dataset
    #[arg(long)]
    pub data: PathBuf,

    /// Minimum quality score for a zero exit status
    #[arg(long, default_value_t = 80.0)]
    pub threshold: f64,

    /// Write the full JSON report here
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Path to the JSON specification
    #[arg(long)]
    pub spec: PathBuf,
}

#[derive(Args)]
pub struct GraphArgs {
    /// Path to the JSON specification
    #[arg(long)]
    pub spec: PathBuf,
}
