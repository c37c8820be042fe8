//! # Data Loading and Validation Module
//!
//! The exclusive entry point for the wine-quality tables. Its responsibility is to
//! read a delimited file, validate it against the fixed 12-column schema (11
//! physicochemical predictors followed by the `quality` score), and hand back the
//! clean `ndarray` structures the statistical core works on.
//!
//! - Strict Schema: column names are not configurable. Both wine colors share the
//!   same header, and downstream steps address predictors positionally.
//! - User-Centric Errors: failures are assumed to be input errors. `DataError`
//!   names the offending column whenever one is known.
//! - Outlier thresholds are data, not code: they arrive as [`OutlierFilter`] values
//!   from the analysis configuration.

use ndarray::{Array1, Array2, Axis, concatenate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

pub mod scale;

#[cfg(test)]
pub(crate) mod test_fixtures;

/// Header names of the 11 predictors, in file order.
pub const PREDICTOR_NAMES: [&str; 11] = [
    "fixed acidity",
    "volatile acidity",
    "citric acid",
    "residual sugar",
    "chlorides",
    "free sulfur dioxide",
    "total sulfur dioxide",
    "density",
    "pH",
    "sulphates",
    "alcohol",
];

/// Header name of the expert quality score.
pub const OUTCOME_NAME: &str = "quality";

const MINIMUM_ROWS: usize = 20;

/// The two data sets analysed side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WineColor {
    Red,
    White,
}

impl WineColor {
    pub const ALL: [WineColor; 2] = [WineColor::Red, WineColor::White];

    pub fn name(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::White => "white",
        }
    }

    /// File name used by the public UCI distribution of the data set.
    pub fn default_file_name(self) -> &'static str {
        match self {
            Self::Red => "winequality-red.csv",
            Self::White => "winequality-white.csv",
        }
    }
}

impl fmt::Display for WineColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("The input file has {found} columns, but exactly {expected} are required.")]
    ColumnCount { found: usize, expected: usize },
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Input contains only {found} data rows, but at least {required} are required.")]
    InsufficientRows { found: usize, required: usize },
    #[error("Outlier filter refers to unknown column '{0}'.")]
    UnknownFilterColumn(String),
    #[error("The delimiter {0:?} is not a single-byte ASCII character.")]
    InvalidDelimiter(char),
    #[error("Feature matrix has {rows} rows but the outcome vector has {outcome_len} entries.")]
    ShapeMismatch { rows: usize, outcome_len: usize },
    #[error("Feature matrix has {columns} columns but {names} feature names were given.")]
    NameCountMismatch { columns: usize, names: usize },
    #[error("Tables with different schemas cannot be concatenated.")]
    SchemaMismatch,
    #[error("At least one table is required for concatenation.")]
    NoTables,
}

/// An in-memory observation table: positional predictor columns plus one outcome.
#[derive(Debug, Clone)]
pub struct ObservationTable {
    pub feature_names: Vec<String>,
    /// Shape: [n_rows, n_features].
    pub features: Array2<f64>,
    pub outcome_name: String,
    pub outcome: Array1<f64>,
}

impl ObservationTable {
    pub fn new(
        feature_names: Vec<String>,
        features: Array2<f64>,
        outcome_name: impl Into<String>,
        outcome: Array1<f64>,
    ) -> Result<Self, DataError> {
        if features.nrows() != outcome.len() {
            return Err(DataError::ShapeMismatch {
                rows: features.nrows(),
                outcome_len: outcome.len(),
            });
        }
        if features.ncols() != feature_names.len() {
            return Err(DataError::NameCountMismatch {
                columns: features.ncols(),
                names: feature_names.len(),
            });
        }
        for (name, column) in feature_names.iter().zip(features.columns()) {
            if column.iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(name.clone()));
            }
        }
        let outcome_name = outcome_name.into();
        if outcome.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(outcome_name));
        }
        Ok(Self {
            feature_names,
            features,
            outcome_name,
            outcome,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|n| n == name)
    }

    /// Returns a table holding only the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            feature_names: self.feature_names.clone(),
            features: self.features.select(Axis(0), indices),
            outcome_name: self.outcome_name.clone(),
            outcome: self.outcome.select(Axis(0), indices),
        }
    }

    /// Stacks tables with identical schemas on top of each other.
    pub fn concat(tables: &[&ObservationTable]) -> Result<Self, DataError> {
        let first = tables.first().ok_or(DataError::NoTables)?;
        if tables.iter().any(|t| {
            t.feature_names != first.feature_names || t.outcome_name != first.outcome_name
        }) {
            return Err(DataError::SchemaMismatch);
        }
        let feature_views: Vec<_> = tables.iter().map(|t| t.features.view()).collect();
        let outcome_views: Vec<_> = tables.iter().map(|t| t.outcome.view()).collect();
        let features =
            concatenate(Axis(0), &feature_views).map_err(|_| DataError::SchemaMismatch)?;
        let outcome =
            concatenate(Axis(0), &outcome_views).map_err(|_| DataError::SchemaMismatch)?;
        Ok(Self {
            feature_names: first.feature_names.clone(),
            features,
            outcome_name: first.outcome_name.clone(),
            outcome,
        })
    }
}

/// Drops every row whose value in `column` is strictly greater than `max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierFilter {
    pub column: String,
    pub max: f64,
}

impl OutlierFilter {
    pub fn new(column: impl Into<String>, max: f64) -> Self {
        Self {
            column: column.into(),
            max,
        }
    }

    /// Thresholds picked by inspecting the scatter matrices of the public data set.
    pub fn defaults_for(color: WineColor) -> Vec<OutlierFilter> {
        match color {
            WineColor::Red => vec![OutlierFilter::new("total sulfur dioxide", 250.0)],
            WineColor::White => vec![
                OutlierFilter::new("free sulfur dioxide", 200.0),
                OutlierFilter::new("density", 1.01),
                OutlierFilter::new("residual sugar", 40.0),
            ],
        }
    }
}

/// Applies every filter and returns the surviving rows with the number dropped.
/// Fewer than `MINIMUM_ROWS` survivors is an error.
pub fn apply_outlier_filters(
    table: &ObservationTable,
    filters: &[OutlierFilter],
) -> Result<(ObservationTable, usize), DataError> {
    let mut columns = Vec::with_capacity(filters.len());
    for filter in filters {
        let idx = if filter.column == table.outcome_name {
            None
        } else {
            Some(
                table
                    .feature_index(&filter.column)
                    .ok_or_else(|| DataError::UnknownFilterColumn(filter.column.clone()))?,
            )
        };
        columns.push((idx, filter.max));
    }

    let keep: Vec<usize> = (0..table.n_rows())
        .filter(|&row| {
            columns.iter().all(|&(idx, max)| {
                let value = match idx {
                    Some(col) => table.features[[row, col]],
                    None => table.outcome[row],
                };
                value <= max
            })
        })
        .collect();

    let dropped = table.n_rows() - keep.len();
    if dropped > 0 {
        log::warn!(
            "Outlier filters dropped {dropped} of {} rows",
            table.n_rows()
        );
    }
    if keep.len() < MINIMUM_ROWS {
        return Err(DataError::InsufficientRows {
            found: keep.len(),
            required: MINIMUM_ROWS,
        });
    }
    Ok((table.select_rows(&keep), dropped))
}

/// Loads a wine table and validates it against the fixed schema.
pub fn load_table(path: &Path, delimiter: char) -> Result<ObservationTable, DataError> {
    if !delimiter.is_ascii() {
        return Err(DataError::InvalidDelimiter(delimiter));
    }
    let separator = delimiter as u8;

    log::info!("Loading data from '{}'", path.display());
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;

    let expected = PREDICTOR_NAMES.len() + 1;
    if df.width() != expected {
        return Err(DataError::ColumnCount {
            found: df.width(),
            expected,
        });
    }
    let present: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|c| c.as_str().to_string())
        .collect();
    for name in PREDICTOR_NAMES.iter().chain(std::iter::once(&OUTCOME_NAME)) {
        if !present.iter().any(|c| c == name) {
            return Err(DataError::ColumnNotFound((*name).to_string()));
        }
    }

    if df.height() < MINIMUM_ROWS {
        return Err(DataError::InsufficientRows {
            found: df.height(),
            required: MINIMUM_ROWS,
        });
    }

    let n = df.height();
    let mut features = Array2::<f64>::zeros((n, PREDICTOR_NAMES.len()));
    for (j, name) in PREDICTOR_NAMES.iter().enumerate() {
        let values = extract_numeric_column(&df, name)?;
        features.column_mut(j).assign(&Array1::from(values));
    }
    let outcome = Array1::from(extract_numeric_column(&df, OUTCOME_NAME)?);

    log::info!("Loaded {n} rows from '{}'", path.display());
    ObservationTable::new(
        PREDICTOR_NAMES.iter().map(|s| s.to_string()).collect(),
        features,
        OUTCOME_NAME,
        outcome,
    )
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        })?;
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        });
    }

    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}
