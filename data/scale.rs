//! Per-column standardization.
//!
//! Every modeling step works on standardized columns. The fitted means and scales are
//! kept on the [`Standardizer`] so the same affine map can be applied to other rows.

use super::ObservationTable;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Columns whose sample standard deviation falls below this are rejected.
pub const SCALE_EPSILON: f64 = 1.0e-12;

#[derive(Error, Debug)]
pub enum ScaleError {
    #[error("Column {index} ('{name}') has zero variance and cannot be standardized.")]
    DegenerateColumn { index: usize, name: String },
    #[error("At least two rows are required to estimate a standard deviation, found {0}.")]
    TooFewRows(usize),
    #[error("Column index {index} is out of range for a table with {columns} columns.")]
    ColumnOutOfRange { index: usize, columns: usize },
}

/// Fitted column means and sample standard deviations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standardizer {
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl Standardizer {
    /// Estimates means and sample standard deviations (n - 1 denominator).
    ///
    /// `names` is only used to label a degenerate column in the error.
    pub fn fit(features: ArrayView2<'_, f64>, names: &[String]) -> Result<Self, ScaleError> {
        let n = features.nrows();
        if n < 2 {
            return Err(ScaleError::TooFewRows(n));
        }
        let means = features
            .mean_axis(Axis(0))
            .ok_or(ScaleError::TooFewRows(n))?;
        let scales = features.std_axis(Axis(0), 1.0);
        for (index, &s) in scales.iter().enumerate() {
            if !s.is_finite() || s < SCALE_EPSILON {
                return Err(ScaleError::DegenerateColumn {
                    index,
                    name: names.get(index).cloned().unwrap_or_else(|| index.to_string()),
                });
            }
        }
        Ok(Self { means, scales })
    }

    pub fn means(&self) -> &Array1<f64> {
        &self.means
    }

    pub fn scales(&self) -> &Array1<f64> {
        &self.scales
    }

    pub fn transform(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = features.to_owned();
        for ((mut column, &mean), &scale) in out
            .columns_mut()
            .into_iter()
            .zip(self.means.iter())
            .zip(self.scales.iter())
        {
            column.mapv_inplace(|v| (v - mean) / scale);
        }
        out
    }
}

/// Returns a copy of `table` in which only the predictor columns listed in `indices`
/// are standardized.
pub fn scale_columns(
    table: &ObservationTable,
    indices: &[usize],
) -> Result<ObservationTable, ScaleError> {
    let columns = table.n_features();
    if let Some(&index) = indices.iter().find(|&&i| i >= columns) {
        return Err(ScaleError::ColumnOutOfRange { index, columns });
    }
    let selected = table.features.select(Axis(1), indices);
    let names: Vec<String> = indices
        .iter()
        .map(|&i| table.feature_names[i].clone())
        .collect();
    let scaler = Standardizer::fit(selected.view(), &names).map_err(|err| match err {
        ScaleError::DegenerateColumn { index, name } => ScaleError::DegenerateColumn {
            index: indices[index],
            name,
        },
        other => other,
    })?;
    let scaled = scaler.transform(selected.view());

    let mut out = table.clone();
    for (k, &col) in indices.iter().enumerate() {
        out.features.column_mut(col).assign(&scaled.column(k));
    }
    Ok(out)
}

/// Standardizes every predictor and, when `include_outcome` is set, the outcome.
pub fn standardize_table(
    table: &ObservationTable,
    include_outcome: bool,
) -> Result<ObservationTable, ScaleError> {
    let all: Vec<usize> = (0..table.n_features()).collect();
    let mut out = scale_columns(table, &all)?;
    if include_outcome {
        let column = table.outcome.view().insert_axis(Axis(1));
        let scaler = Standardizer::fit(column, std::slice::from_ref(&table.outcome_name))
            .map_err(|err| match err {
                ScaleError::DegenerateColumn { name, .. } => ScaleError::DegenerateColumn {
                    index: table.n_features(),
                    name,
                },
                other => other,
            })?;
        out.outcome = scaler.transform(column).column(0).to_owned();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_fixtures::signal_table;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn standardized_columns_have_zero_mean_and_unit_variance() {
        let table = signal_table(200, 0.3, 7);
        let mut shifted = table.clone();
        shifted.features.mapv_inplace(|v| 3.0 * v + 10.0);
        let scaled = standardize_table(&shifted, true).unwrap();

        for column in scaled.features.columns() {
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-10);
            assert_abs_diff_eq!(column.var(1.0), 1.0, epsilon = 1e-10);
        }
        assert_abs_diff_eq!(scaled.outcome.mean().unwrap(), 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(scaled.outcome.var(1.0), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn scale_columns_leaves_other_columns_untouched() {
        let table = signal_table(50, 0.1, 3);
        let scaled = scale_columns(&table, &[1, 4]).unwrap();
        assert_eq!(scaled.features.column(0), table.features.column(0));
        assert_eq!(scaled.outcome, table.outcome);
        assert_abs_diff_eq!(scaled.features.column(4).var(1.0), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn zero_variance_column_is_reported_with_its_position() {
        let table = ObservationTable::new(
            vec!["a".into(), "b".into(), "c".into()],
            array![[1.0, 2.0, 3.0], [2.0, 2.0, 1.0], [3.0, 2.0, 2.0]],
            "quality",
            array![1.0, 2.0, 3.0],
        )
        .unwrap();
        match scale_columns(&table, &[0, 1]) {
            Err(ScaleError::DegenerateColumn { index, name }) => {
                assert_eq!(index, 1);
                assert_eq!(name, "b");
            }
            other => panic!("expected DegenerateColumn, got {other:?}"),
        }
        assert!(matches!(
            scale_columns(&table, &[5]),
            Err(ScaleError::ColumnOutOfRange { index: 5, columns: 3 })
        ));
    }

    #[test]
    fn transform_reuses_fitted_parameters() {
        let train = array![[1.0], [3.0]];
        let scaler = Standardizer::fit(train.view(), &["x".to_string()]).unwrap();
        let other = scaler.transform(array![[2.0], [5.0]].view());
        assert_abs_diff_eq!(other[[0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(other[[1, 0]], 3.0 / 2.0_f64.sqrt(), epsilon = 1e-12);
    }
}
