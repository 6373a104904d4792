//! CSV import and export
//!
//! Headers are trimmed. Cells go through `Value::infer`. Rows shorter than the
//! header are padded with nulls and longer rows are an error.

use super::{Table, TableError, TableResult, Value};
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

/// Read a CSV document into a table
pub fn read_csv<R: Read>(reader: R) -> TableResult<Table> {
    let mut reader = ::csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let width = headers.len();
    let mut table = Table::new(headers);

    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() > width {
            return Err(TableError::RaggedRow {
                row: idx,
                expected: width,
                found: record.len(),
            });
        }
        let mut row: Vec<Value> = record.iter().map(Value::infer).collect();
        row.resize(width, Value::Null);
        table.push_row(row)?;
    }

    debug!("Loaded CSV with {} rows and {} columns", table.len(), width);
    Ok(table)
}

pub fn read_csv_path(path: impl AsRef<Path>) -> TableResult<Table> {
    let file = std::fs::File::open(path)?;
    read_csv(file)
}

pub fn read_csv_str(text: &str) -> TableResult<Table> {
    read_csv(text.as_bytes())
}

/// Write a table as CSV. Nulls become empty cells.
pub fn write_csv<W: Write>(table: &Table, writer: W) -> TableResult<()> {
    let mut writer = ::csv::Writer::from_writer(writer);
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv_path(table: &Table, path: impl AsRef<Path>) -> TableResult<()> {
    let file = std::fs::File::create(path)?;
    write_csv(table, file)
}
