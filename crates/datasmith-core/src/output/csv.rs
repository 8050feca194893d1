//! CSV sink: one file per table with an RFC-4180-style quoting rule, a
//! per-table manifest sidecar, and the dataset metadata document. The
//! matching reader reconstructs a typed dataset for validation.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DatasmithError, Result};
use crate::generate::column::{ColumnData, Dataset, Table, Value};
use crate::output::{DatasetMeta, OutputSink};
use crate::spec::{LogicalType, Specification};

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// Per-table manifest sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableManifest {
    pub table: String,
    pub primary_key: String,
    pub delimiter: String,
    pub quote: String,
}

/// Writes `<dir>/<table>.csv`, `<dir>/<table>.manifest.json`, and
/// `<dir>/dataset.json`.
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| DatasmithError::Output {
            message: format!("creating output directory {}", dir.display()),
            source: e,
        })?;
        Ok(Self { dir })
    }
}

impl OutputSink for CsvSink {
    fn write_table(&mut self, table: &Table) -> Result<()> {
        let csv_path = self.dir.join(format!("{}.csv", table.name));
        let file = File::create(&csv_path).map_err(|e| DatasmithError::Output {
            message: format!("creating {}", csv_path.display()),
            source: e,
        })?;
        let mut writer = BufWriter::new(file);
        write_csv_table(&mut writer, table)?;
        writer.flush().map_err(|e| DatasmithError::Output {
            message: format!("flushing {}", csv_path.display()),
            source: e,
        })?;

        let manifest = TableManifest {
            table: table.name.clone(),
            primary_key: table.primary_key.clone(),
            delimiter: DELIMITER.to_string(),
            quote: QUOTE.to_string(),
        };
        let manifest_path = self.dir.join(format!("{}.manifest.json", table.name));
        write_json(&manifest_path, &manifest)
    }

    fn finish(&mut self, dataset: &Dataset) -> Result<()> {
        let meta = DatasetMeta::describe(dataset);
        write_json(&self.dir.join("dataset.json"), &meta)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| DatasmithError::Output {
        message: format!("serializing {}", path.display()),
        source: std::io::Error::other(e),
    })?;
    fs::write(path, json).map_err(|e| DatasmithError::Output {
        message: format!("writing {}", path.display()),
        source: e,
    })
}

/// Write one table: header row, then data rows.
pub fn write_csv_table<W: Write>(writer: &mut W, table: &Table) -> Result<()> {
    let io_err = |message: String| {
        move |e: std::io::Error| DatasmithError::Output { message, source: e }
    };

    let header: Vec<String> = table
        .columns
        .keys()
        .map(|name| csv_field(name.clone()))
        .collect();
    writeln!(writer, "{}", header.join(",")).map_err(io_err(format!(
        "writing CSV header for {}",
        table.name
    )))?;

    for row in 0..table.row_count() {
        let cells: Vec<String> = table
            .columns
            .values()
            .map(|column| csv_field(column.value_at(row).to_csv_string()))
            .collect();
        writeln!(writer, "{}", cells.join(",")).map_err(io_err(format!(
            "writing CSV row for {}",
            table.name
        )))?;
    }
    Ok(())
}

/// Render one field. Fields that would break the record structure —
/// embedded delimiter, quote, or line break — are wrapped in quotes, with
/// inner quotes doubled; everything else passes through untouched.
fn csv_field(raw: String) -> String {
    let structural = |c: char| matches!(c, DELIMITER | QUOTE | '\n' | '\r');
    if !raw.chars().any(structural) {
        return raw;
    }
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push(QUOTE);
    for c in raw.chars() {
        if c == QUOTE {
            quoted.push(QUOTE);
        }
        quoted.push(c);
    }
    quoted.push(QUOTE);
    quoted
}

/// Load a dataset back from a sink directory. Column types come from the
/// specification; the sidecar supplies the master seed and identity.
pub fn read_dataset(dir: &Path, spec: &Specification) -> Result<Dataset> {
    let meta_path = dir.join("dataset.json");
    let meta_json = fs::read_to_string(&meta_path).map_err(|e| DatasmithError::Output {
        message: format!("reading {}", meta_path.display()),
        source: e,
    })?;
    let meta: DatasetMeta =
        serde_json::from_str(&meta_json).map_err(|e| DatasmithError::Output {
            message: format!("parsing {}", meta_path.display()),
            source: std::io::Error::other(e),
        })?;

    let mut tables = IndexMap::new();
    for node in &spec.nodes {
        let csv_path = dir.join(format!("{}.csv", node.name));
        let text = fs::read_to_string(&csv_path).map_err(|e| DatasmithError::Output {
            message: format!("reading {}", csv_path.display()),
            source: e,
        })?;
        let records = parse_csv(&text);
        let mut table = Table::new(&node.name, &node.primary_key);

        let header = records.first().cloned().unwrap_or_default();
        let mut columns: IndexMap<String, ColumnData> = header
            .iter()
            .map(|name| {
                let ty = node
                    .column(name)
                    .map(|c| c.logical_type)
                    .unwrap_or(LogicalType::String);
                (name.clone(), ColumnData::empty(ty))
            })
            .collect();

        for record in records.iter().skip(1) {
            for (i, cell) in record.iter().enumerate() {
                let Some(name) = header.get(i) else { continue };
                let Some(column) = columns.get_mut(name) else { continue };
                let value = parse_cell(cell, column.logical_type()).ok_or_else(|| {
                    DatasmithError::Output {
                        message: format!(
                            "cell '{}' does not parse as {} in {}.{}",
                            cell,
                            column.logical_type(),
                            node.name,
                            name
                        ),
                        source: std::io::Error::other("type mismatch"),
                    }
                })?;
                column.push(value);
            }
        }

        table.columns = columns;
        tables.insert(node.name.clone(), table);
    }

    Ok(Dataset {
        name: meta.name,
        version: meta.version,
        master_seed: meta.master_seed,
        tables,
    })
}

fn parse_cell(cell: &str, ty: LogicalType) -> Option<Value> {
    if cell.is_empty() {
        return Some(Value::Null);
    }
    match ty {
        LogicalType::Integer => cell.parse().ok().map(Value::Int),
        LogicalType::Floating => cell.parse().ok().map(Value::Float),
        LogicalType::Boolean => match cell {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        LogicalType::String => Some(Value::Str(cell.to_string())),
        LogicalType::Datetime => chrono::DateTime::parse_from_rfc3339(cell)
            .ok()
            .map(|ts| Value::DateTime(ts.with_timezone(&chrono::Utc))),
        LogicalType::Date => chrono::NaiveDate::parse_from_str(cell, "%Y-%m-%d")
            .ok()
            .map(Value::Date),
    }
}

/// Minimal RFC-4180 reader: quoted fields may contain delimiters,
/// doubled quotes, and newlines.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                QUOTE => {
                    if chars.peek() == Some(&QUOTE) {
                        chars.next();
                        field.push(QUOTE);
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            QUOTE => in_quotes = true,
            DELIMITER => record.push(std::mem::take(&mut field)),
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            '\r' => {}
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}
