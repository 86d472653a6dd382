use super::{DataError, DataResult, TimeSeries};
use csv::{ReaderBuilder, WriterBuilder};
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Loads a univariate series from a CSV file with a header row.
///
/// Reads `column` when given, otherwise the first column whose first record
/// parses as a number. At most `max_length` rows are kept.
pub fn load_series<P: AsRef<Path>>(
    path: P,
    column: Option<&str>,
    max_length: usize,
) -> DataResult<TimeSeries> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader.headers()?.clone();
    let mut records = reader.records();

    let first = match records.next() {
        Some(record) => record?,
        None => {
            return Err(DataError::InsufficientData(format!(
                "{} contains no data rows",
                path.display()
            )))
        }
    };

    let index = match column {
        Some(name) => headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::MissingColumn(name.to_string()))?,
        None => first
            .iter()
            .position(|cell| cell.parse::<f64>().is_ok())
            .ok_or_else(|| {
                DataError::InvalidFormat(format!("{} has no numeric column", path.display()))
            })?,
    };

    let mut values = Vec::new();
    values.push(parse_cell(&first, index, 1)?);
    for (row, record) in records.enumerate() {
        if values.len() >= max_length {
            break;
        }
        let record = record?;
        values.push(parse_cell(&record, index, row + 2)?);
    }
    values.truncate(max_length);

    if values.is_empty() {
        return Err(DataError::InsufficientData(
            "max_length of zero leaves no data".to_string(),
        ));
    }

    debug!("Loaded {} values from column {} of {}", values.len(), index, path.display());
    Ok(TimeSeries::univariate(values))
}

fn parse_cell(record: &csv::StringRecord, index: usize, row: usize) -> DataResult<f64> {
    let cell = record
        .get(index)
        .ok_or_else(|| DataError::InvalidFormat(format!("row {} has no column {}", row, index)))?;
    let value = cell
        .parse::<f64>()
        .map_err(|_| DataError::InvalidValue(format!("row {}: '{}' is not a number", row, cell)))?;
    if !value.is_finite() {
        return Err(DataError::InvalidValue(format!("row {}: non-finite value", row)));
    }
    Ok(value)
}

/// Writes a single-column CSV with a header.
pub fn write_series<P: AsRef<Path>>(path: P, column: &str, values: &[f64]) -> DataResult<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record([column])?;
    for value in values {
        writer.write_record([value.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}
