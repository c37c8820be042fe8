//! Least-squares core shared by the subset searches.
//!
//! All candidate models of one table are fitted from a single set of centered
//! cross-products, so an individual fit costs a k-by-k Cholesky solve instead of a
//! pass over the rows. Every model carries an intercept.

use super::faer_ndarray::FaerCholesky;
use super::subset::SelectionError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Squared pivot ratio below which a predictor subset is treated as collinear.
pub const SINGULAR_PIVOT_RATIO: f64 = 1.0e-12;

/// Centered sufficient statistics of a design matrix and response.
#[derive(Debug, Clone)]
pub struct CrossProducts {
    n: usize,
    x_mean: Array1<f64>,
    y_mean: f64,
    /// Centered `X'X`.
    gram: Array2<f64>,
    /// Centered `X'y`.
    xty: Array1<f64>,
    /// Centered `y'y`, the total sum of squares.
    tss: f64,
}

impl CrossProducts {
    pub fn new(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<Self, SelectionError> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(SelectionError::InsufficientRows {
                rows: n,
                required: 1,
            });
        }
        let x_mean = x.mean_axis(Axis(0)).ok_or(SelectionError::InsufficientRows {
            rows: n,
            required: 1,
        })?;
        let y_mean = y.sum() / n as f64;
        let xc = &x - &x_mean.view().insert_axis(Axis(0));
        let yc = y.mapv(|v| v - y_mean);
        let gram = xc.t().dot(&xc);
        let xty = xc.t().dot(&yc);
        let tss = yc.dot(&yc);
        Ok(Self {
            n,
            x_mean,
            y_mean,
            gram,
            xty,
            tss,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.n
    }

    pub fn n_predictors(&self) -> usize {
        self.gram.nrows()
    }

    pub fn total_sum_of_squares(&self) -> f64 {
        self.tss
    }

    /// Least-squares fit using only the predictor columns in `members`.
    pub fn fit_subset(&self, members: &[usize]) -> Result<LinearFit, SelectionError> {
        let mut members = members.to_vec();
        members.sort_unstable();

        if members.is_empty() {
            return Ok(LinearFit {
                members,
                intercept: self.y_mean,
                slopes: Array1::zeros(0),
                rss: self.tss,
            });
        }

        let k = members.len();
        let gram = Array2::from_shape_fn((k, k), |(a, b)| self.gram[[members[a], members[b]]]);
        let rhs = Array1::from_shape_fn(k, |a| self.xty[members[a]]);
        let factor = gram
            .cholesky_checked(SINGULAR_PIVOT_RATIO)
            .map_err(|source| SelectionError::SingularModel {
                members: members.clone(),
                source,
            })?;
        let slopes = factor.solve_vec(&rhs);
        let explained = rhs.dot(&slopes);
        let rss = (self.tss - explained).max(0.0);
        let intercept = self.y_mean
            - members
                .iter()
                .zip(slopes.iter())
                .map(|(&j, &b)| self.x_mean[j] * b)
                .sum::<f64>();

        Ok(LinearFit {
            members,
            intercept,
            slopes,
            rss,
        })
    }
}

/// A fitted linear model over a subset of the predictor columns.
#[derive(Debug, Clone)]
pub struct LinearFit {
    /// Sorted column indices of the included predictors.
    pub members: Vec<usize>,
    pub intercept: f64,
    /// One slope per entry of `members`.
    pub slopes: Array1<f64>,
    /// Residual sum of squares on the fitting data.
    pub rss: f64,
}

impl LinearFit {
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut out = Array1::from_elem(features.nrows(), self.intercept);
        for (&j, &b) in self.members.iter().zip(self.slopes.iter()) {
            out.scaled_add(b, &features.column(j));
        }
        out
    }
}

pub fn mean_squared_error(predicted: ArrayView1<'_, f64>, actual: ArrayView1<'_, f64>) -> f64 {
    let n = actual.len();
    if n == 0 {
        return f64::NAN;
    }
    predicted
        .iter()
        .zip(actual.iter())
        .map(|(p, a)| (p - a).powi(2))
        .sum::<f64>()
        / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn exact_linear_relation_is_recovered() {
        let x = array![
            [1.0, 0.0],
            [2.0, 1.0],
            [3.0, 0.0],
            [4.0, 1.0],
            [5.0, 3.0]
        ];
        let y = x.column(0).mapv(|v| 2.0 * v) + x.column(1).mapv(|v| -0.5 * v) + 1.0;
        let cross = CrossProducts::new(x.view(), y.view()).unwrap();
        let fit = cross.fit_subset(&[1, 0]).unwrap();

        assert_eq!(fit.members, vec![0, 1]);
        assert_abs_diff_eq!(fit.intercept, 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.slopes[0], 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.slopes[1], -0.5, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.rss, 0.0, epsilon = 1e-9);

        let predicted = fit.predict(x.view());
        assert_abs_diff_eq!(mean_squared_error(predicted.view(), y.view()), 0.0, epsilon = 1e-18);
    }

    #[test]
    fn empty_model_is_the_mean() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![1.0, 2.0, 6.0];
        let cross = CrossProducts::new(x.view(), y.view()).unwrap();
        let fit = cross.fit_subset(&[]).unwrap();
        assert_abs_diff_eq!(fit.intercept, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.rss, cross.total_sum_of_squares(), epsilon = 1e-12);
        assert_abs_diff_eq!(fit.rss, 14.0, epsilon = 1e-12);
    }

    #[test]
    fn collinear_columns_are_singular() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]];
        let y = array![1.0, 3.0, 2.0, 5.0];
        let cross = CrossProducts::new(x.view(), y.view()).unwrap();
        assert!(matches!(
            cross.fit_subset(&[0, 1]),
            Err(SelectionError::SingularModel { .. })
        ));
        assert!(cross.fit_subset(&[1]).is_ok());
    }
}
