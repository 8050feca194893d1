//! # Error Types
//!
//! Defines `DatasmithError`, the unified error enum for every failure mode
//! in the generation pipeline. Every variant includes enough context (node
//! name, column name, offending path) to debug immediately without digging
//! through logs.

use thiserror::Error;

/// All errors that can occur in Datasmith operations.
#[derive(Error, Debug)]
pub enum DatasmithError {
    #[error("Invalid specification: {message}")]
    SpecInvalid { message: String },

    #[error("Inconsistent specification at {path}: {message}")]
    SpecInconsistent { path: String, message: String },

    #[error("Dependency cycle between nodes: {nodes}\n  Every fact must ultimately depend on acyclic parents; self-references are\n  allowed only through a column-level lookup of the node's own primary key.")]
    CyclicPlan { nodes: String },

    #[error("Generation failed on {node}.{column}: {cause}")]
    GenerationFailure {
        node: String,
        column: String,
        cause: String,
    },

    #[error("Primary key collided on {node}.{column}: {attempts} regeneration passes exhausted\n  Widen the generator's value space or switch the key to a sequence generator")]
    UniquenessViolated {
        node: String,
        column: String,
        attempts: usize,
    },

    #[error("Output error: {message}: {source}")]
    Output {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

impl DatasmithError {
    /// Attach node/column context to a bare cause, for use inside the
    /// executor where the offending column is known at the call site.
    pub fn generation(node: &str, column: &str, cause: impl std::fmt::Display) -> Self {
        DatasmithError::GenerationFailure {
            node: node.to_string(),
            column: column.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn inconsistent(path: impl Into<String>, message: impl Into<String>) -> Self {
        DatasmithError::SpecInconsistent {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DatasmithError>;
