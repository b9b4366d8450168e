//! Reading source rows from a CSV file.

use std::path::{Path, PathBuf};

use bulkdml_engine::{ColumnSchema, ConstantScan, LogicalRow, Value};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// Read every row of the CSV file at `path`
pub(crate) async fn read(path: &Path) -> Result<ConstantScan> {
    let data = tokio::fs::read(path).await.map_err(|source| Error::Read {
        path: path.to_owned(),
        source,
    })?;
    parse(&data)
}

/// Parse CSV with a header line into a scan over its rows
///
/// Each column is typed by its first non-empty cell. Empty cells are nulls.
pub(crate) fn parse(data: &[u8]) -> Result<ConstantScan> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();

    let mut rows = vec![];
    for record in reader.records() {
        let record = record?;
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(name, cell)| (name.clone(), parse_value(cell)))
                .collect::<LogicalRow>(),
        );
    }

    let schema = headers.iter().fold(ColumnSchema::new(), |schema, name| {
        let column_type = rows
            .iter()
            .find_map(|row| row.get(name).and_then(Value::column_type));
        schema.with_column(name.clone(), column_type)
    });
    Ok(ConstantScan::new(schema, rows))
}

fn parse_value(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if cell.eq_ignore_ascii_case("true") {
        return Value::Boolean(true);
    }
    if cell.eq_ignore_ascii_case("false") {
        return Value::Boolean(false);
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(u) = Uuid::parse_str(cell) {
        return Value::Uuid(u);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() {
            return Value::Float(f);
        }
    }
    Value::String(cell.to_owned())
}
