//! CSV data loading.
//!
//! The file needs a header row. One column holds the integer time index and
//! one holds the measured value; every other column becomes a covariate.
//! A covariate column is numeric when every non-empty cell parses as `f64`,
//! otherwise categorical. Empty cells leave the covariate unset for that row.
//! The time column is also exposed as a numeric covariate under its own
//! name so formulas can use it as a trend term.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use thiserror::Error;
use zi_common::Error;

use super::observation::{CovariateValue, Covariates, Observation};

/// Error type for data loading.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("column '{0}' not found in header")]
    MissingColumn(String),

    #[error("row {row}: time index '{raw}' is not an integer")]
    InvalidTime { row: usize, raw: String },

    #[error("row {row}: value '{raw}' is not a number")]
    InvalidValue { row: usize, raw: String },

    #[error("no data rows")]
    Empty,
}

impl From<LoadError> for Error {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Open { source, .. } => Error::Io(source),
            LoadError::InvalidTime { row, .. } | LoadError::InvalidValue { row, .. } => {
                Error::validation(Some(row), err.to_string())
            }
            LoadError::Empty => Error::validation(None, "input has no data rows"),
            LoadError::Csv(_) | LoadError::MissingColumn(_) => Error::Csv(err.to_string()),
        }
    }
}

/// Which columns hold the time index and the measured value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataColumns {
    pub time_column: String,
    pub value_column: String,
}

impl Default for DataColumns {
    fn default() -> Self {
        DataColumns {
            time_column: "time".to_string(),
            value_column: "value".to_string(),
        }
    }
}

/// Load observations from a CSV file.
pub fn load_csv(path: &Path, columns: &DataColumns) -> Result<Vec<Observation>, LoadError> {
    let file = File::open(path).map_err(|e| LoadError::Open {
        path: path.display().to_string(),
        source: e,
    })?;
    load_csv_reader(BufReader::new(file), columns)
}

/// Load observations from any CSV source.
pub fn load_csv_reader<R: Read>(
    reader: R,
    columns: &DataColumns,
) -> Result<Vec<Observation>, LoadError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = reader.headers()?.clone();

    let time_idx = headers
        .iter()
        .position(|h| h == columns.time_column)
        .ok_or_else(|| LoadError::MissingColumn(columns.time_column.clone()))?;
    let value_idx = headers
        .iter()
        .position(|h| h == columns.value_column)
        .ok_or_else(|| LoadError::MissingColumn(columns.value_column.clone()))?;

    let records = reader
        .records()
        .collect::<Result<Vec<csv::StringRecord>, csv::Error>>()?;
    if records.is_empty() {
        return Err(LoadError::Empty);
    }

    let covariate_columns: Vec<(usize, &str, bool)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != time_idx && *i != value_idx)
        .map(|(i, name)| (i, name, column_is_numeric(&records, i)))
        .collect();

    let mut observations = Vec::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        let raw_time = record.get(time_idx).unwrap_or("");
        let time_index = parse_time(raw_time).ok_or_else(|| LoadError::InvalidTime {
            row,
            raw: raw_time.to_string(),
        })?;

        let raw_value = record.get(value_idx).unwrap_or("");
        let value = raw_value
            .parse::<f64>()
            .map_err(|_| LoadError::InvalidValue {
                row,
                raw: raw_value.to_string(),
            })?;

        let mut covariates = Covariates::new();
        covariates.insert(
            columns.time_column.clone(),
            CovariateValue::Numeric(time_index as f64),
        );
        for &(idx, name, numeric) in &covariate_columns {
            let cell = record.get(idx).unwrap_or("");
            if cell.is_empty() {
                continue;
            }
            let value = match (numeric, cell.parse::<f64>()) {
                (true, Ok(v)) => CovariateValue::Numeric(v),
                _ => CovariateValue::Categorical(cell.to_string()),
            };
            covariates.insert(name.to_string(), value);
        }

        observations.push(Observation {
            time_index,
            covariates,
            value,
        });
    }

    Ok(observations)
}

fn column_is_numeric(records: &[csv::StringRecord], idx: usize) -> bool {
    records
        .iter()
        .filter_map(|r| r.get(idx))
        .filter(|cell| !cell.is_empty())
        .all(|cell| cell.parse::<f64>().is_ok())
}

fn parse_time(raw: &str) -> Option<i64> {
    if let Ok(t) = raw.parse::<i64>() {
        return Some(t);
    }
    // Accept integral floats such as "2001.0" written by spreadsheet exports.
    let f = raw.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(f as i64)
    } else {
        None
    }
}
