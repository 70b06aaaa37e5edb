//! CSV and JSON helpers shared by the pipeline stages

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, error};

/// Read every record of a headed CSV file
pub fn read_csv<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV {}", path.display()))?;

    let mut rows = Vec::new();
    for (line, record) in reader.deserialize().enumerate() {
        let row: T = record
            .with_context(|| format!("Malformed row {} in {}", line + 2, path.display()))?;
        rows.push(row);
    }
    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// A serializable CSV row with a fixed column list.
///
/// `HEADER` must list the serialized field names in declaration order.
pub trait CsvRecord: Serialize {
    const HEADER: &'static [&'static str];
}

/// Write records to a CSV file. The header line is always written, so an
/// empty table still names its columns.
///
/// Parent directories are created as needed.
pub fn write_csv<T: CsvRecord>(path: impl AsRef<Path>, rows: &[T]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create CSV {}", path.display()))?;
    writer.write_record(T::HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    debug!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Read a JSON file, logging and returning `None` when it is missing or invalid
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Option<T> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!("File not found - {}", path.display());
            return None;
        }
        Err(e) => {
            error!("Failed to read {}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("File is not valid JSON - {}: {e}", path.display());
            None
        }
    }
}

/// Pretty-print a value to a JSON file (4-space indentation)
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;

    fs::write(path, buf).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}
