//! # Output Sink
//!
//! The contract between the executor and columnar writers: each fully
//! materialized table is handed over once, followed by a dataset-level
//! sidecar describing names, types, row counts, and the master seed. The
//! CSV sink in [`csv`] is the reference implementation; the validator
//! reads datasets back through it.

pub mod csv;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::generate::{Dataset, Table};

/// Consumes completed tables. Tables arrive in specification node order,
/// each exactly once, followed by a single `finish`.
pub trait OutputSink {
    fn write_table(&mut self, table: &Table) -> Result<()>;
    fn finish(&mut self, dataset: &Dataset) -> Result<()>;
}

/// Drive a sink over a whole dataset.
pub fn write_dataset(sink: &mut dyn OutputSink, dataset: &Dataset) -> Result<()> {
    for table in dataset.tables.values() {
        sink.write_table(table)?;
    }
    sink.finish(dataset)
}

/// The `dataset.json` sidecar. Deliberately free of wall-clock fields so
/// reruns with the same seed produce byte-identical sidecars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub name: String,
    pub version: String,
    pub master_seed: u64,
    pub tables: Vec<TableMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub rows: usize,
    pub primary_key: String,
    pub columns: Vec<ColumnMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub logical_type: String,
}

impl DatasetMeta {
    pub fn describe(dataset: &Dataset) -> Self {
        Self {
            name: dataset.name.clone(),
            version: dataset.version.clone(),
            master_seed: dataset.master_seed,
            tables: dataset
                .tables
                .values()
                .map(|table| TableMeta {
                    name: table.name.clone(),
                    rows: table.row_count(),
                    primary_key: table.primary_key.clone(),
                    columns: table
                        .columns
                        .iter()
                        .map(|(name, data)| ColumnMeta {
                            name: name.clone(),
                            logical_type: data.logical_type().to_string(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
