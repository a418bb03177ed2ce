//! CSV file source for the raw-data ingest
//!
//! Each file becomes one [`Dataset`]. The header row names the columns,
//! empty fields are NULL, and every column gets the narrowest type that
//! fits all of its non-empty fields: `BIGINT`, then `DOUBLE PRECISION`,
//! then `BOOLEAN`, otherwise `TEXT`.

use dataferry_rdbc::types::{ColumnMetadata, Value};
use dataferry_rdbc::Dataset;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{MigrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Text,
}

impl ColumnKind {
    /// `None` when there are no non-empty fields
    fn infer<'a, I>(fields: I) -> Option<Self>
    where
        I: Iterator<Item = &'a str> + Clone,
    {
        fields.clone().next()?;

        let kind = if fields.clone().all(|f| f.parse::<i64>().is_ok()) {
            Self::Integer
        } else if fields.clone().all(|f| f.parse::<f64>().is_ok()) {
            Self::Float
        } else if fields.clone().all(|f| parse_bool(f).is_some()) {
            Self::Boolean
        } else {
            Self::Text
        };
        Some(kind)
    }

    fn type_name(self) -> &'static str {
        match self {
            Self::Integer => "BIGINT",
            Self::Float => "DOUBLE PRECISION",
            Self::Boolean => "BOOLEAN",
            Self::Text => "TEXT",
        }
    }

    fn convert(self, field: &str) -> Value {
        if field.is_empty() {
            return Value::Null;
        }
        match self {
            Self::Integer => field.parse().map(Value::Int64).unwrap_or(Value::Null),
            Self::Float => field.parse().map(Value::Float64).unwrap_or(Value::Null),
            Self::Boolean => parse_bool(field).map(Value::Bool).unwrap_or(Value::Null),
            Self::Text => Value::String(field.to_string()),
        }
    }
}

fn parse_bool(field: &str) -> Option<bool> {
    if field.eq_ignore_ascii_case("true") {
        Some(true)
    } else if field.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse a CSV file into a dataset
pub fn read_csv(path: &Path) -> Result<Dataset> {
    let file = File::open(path).map_err(|e| MigrationError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(file);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| MigrationError::csv(path, e))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record.map_err(|e| MigrationError::csv(path, e))?);
    }

    let kinds: Vec<Option<ColumnKind>> = (0..headers.len())
        .map(|col| {
            let fields = records
                .iter()
                .map(move |r| r.get(col).unwrap_or(""))
                .filter(|f| !f.is_empty());
            ColumnKind::infer(fields)
        })
        .collect();

    let columns: Vec<ColumnMetadata> = headers
        .iter()
        .zip(&kinds)
        .enumerate()
        .map(|(i, (name, kind))| {
            ColumnMetadata::new(name.as_str(), kind.map(ColumnKind::type_name).unwrap_or(""))
                .with_ordinal(i as u32 + 1)
        })
        .collect();

    let rows: Vec<Vec<Value>> = records
        .iter()
        .map(|record| {
            kinds
                .iter()
                .enumerate()
                .map(|(col, kind)| {
                    let field = record.get(col).unwrap_or("");
                    kind.map(|k| k.convert(field)).unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect();

    let dataset = Dataset::new(columns, rows)?;
    debug!(path = %path.display(), rows = dataset.len(), columns = headers.len(), "Parsed CSV file");
    Ok(dataset)
}

/// Regular files in `dir`, in directory order
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| MigrationError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| MigrationError::io(dir, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| MigrationError::io(entry.path(), e))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

/// Table name for a file: its name up to the first `.`
pub fn table_name_for(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .unwrap_or("");

    if name.is_empty() {
        return Err(MigrationError::config(format!(
            "cannot derive a table name from '{}'",
            path.display()
        )));
    }
    Ok(name.to_string())
}
