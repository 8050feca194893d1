pub mod check;
pub mod generate;
pub mod graph;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use datasmith_core::Specification;

/// Load and parse a specification file.
pub fn load_spec(path: &Path) -> anyhow::Result<Specification> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading specification {}", path.display()))?;
    Specification::from_json(&json)
        .with_context(|| format!("parsing specification {}", path.display()))
}
