pub mod column;
pub mod effects;
pub mod executor;
pub mod expr;
pub mod faker;
pub mod modifiers;
pub mod primitives;
pub mod stages;
pub mod states;

pub use column::{ColumnData, Dataset, Table, Value};
pub use executor::generate;
