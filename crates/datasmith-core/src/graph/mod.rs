pub mod dag;
pub mod topo;

pub use dag::DependencyGraph;
pub use topo::{plan, GenerationPlan};
