pub mod error;
pub mod generate;
pub mod graph;
pub mod output;
pub mod seed;
pub mod spec;
pub mod validate;

// Re-export key types for convenience
pub use error::{DatasmithError, Result};
pub use generate::{Dataset, Table};
pub use spec::Specification;
