//! Ridge and lasso regularization paths with k-fold cross-validation.
//!
//! The objective is `(1/2n)·‖y − β₀ − Xβ‖² + λ·P(β)` with `P = ½‖β‖²` for ridge and
//! `‖β‖₁` for the lasso. Predictors are standardized internally with the population
//! standard deviation and coefficients are mapped back to the input scale. Both solvers
//! only touch the centered Gram matrix `X'X/n` and `X'y/n`, so one pass over the rows
//! serves the whole path.

use super::faer_ndarray::{FaerCholesky, FaerLinalgError};
use super::ols::mean_squared_error;
use super::resample::{DistributionSummary, ResamplingConfig, TrainTestSplit, trial_progress};
use crate::data::ObservationTable;
use faer::Side;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Ridge has no finite λ that zeroes every coefficient; its grid starts at the lasso
/// bound divided by this factor.
const RIDGE_LAMBDA_DIVISOR: f64 = 1.0e-3;
const SCALE_EPSILON: f64 = 1.0e-12;

#[derive(Error, Debug)]
pub enum PenaltyError {
    #[error("Need at least {required} rows for this fit, found {rows}.")]
    InsufficientRows { rows: usize, required: usize },
    #[error("Predictor column {index} has zero variance.")]
    DegenerateColumn { index: usize },
    #[error("The response is constant or uncorrelated with every predictor; no penalty path exists.")]
    DegenerateResponse,
    #[error("Invalid path configuration: {0}")]
    InvalidConfig(String),
    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Penalty {
    Ridge,
    Lasso,
}

impl Penalty {
    pub const ALL: [Penalty; 2] = [Penalty::Ridge, Penalty::Lasso];

    pub fn name(self) -> &'static str {
        match self {
            Self::Ridge => "ridge",
            Self::Lasso => "lasso",
        }
    }
}

impl fmt::Display for Penalty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathConfig {
    pub n_lambda: usize,
    /// Smallest λ as a fraction of the largest. Chosen from the table shape when unset.
    pub lambda_min_ratio: Option<f64>,
    pub n_folds: usize,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            n_lambda: 100,
            lambda_min_ratio: None,
            n_folds: 10,
            tolerance: 1.0e-7,
            max_iterations: 10_000,
        }
    }
}

impl PathConfig {
    pub fn validate(&self) -> Result<(), PenaltyError> {
        if self.n_lambda == 0 {
            return Err(PenaltyError::InvalidConfig("n_lambda must be at least 1".into()));
        }
        if self.n_folds < 2 {
            return Err(PenaltyError::InvalidConfig(format!(
                "need at least 2 folds, got {}",
                self.n_folds
            )));
        }
        if let Some(ratio) = self.lambda_min_ratio {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(PenaltyError::InvalidConfig(format!(
                    "lambda_min_ratio must lie in (0, 1), got {ratio}"
                )));
            }
        }
        Ok(())
    }

    fn min_ratio(&self, rows: usize, predictors: usize) -> f64 {
        self.lambda_min_ratio
            .unwrap_or(if rows > predictors { 1.0e-4 } else { 1.0e-2 })
    }
}

/// Standardized sufficient statistics of one design.
struct StandardizedDesign {
    x_mean: Array1<f64>,
    x_scale: Array1<f64>,
    y_mean: f64,
    /// `Xs'Xs / n` for the standardized predictors.
    gram: Array2<f64>,
    /// `Xs'(y − ȳ) / n`.
    xty: Array1<f64>,
}

impl StandardizedDesign {
    fn new(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<Self, PenaltyError> {
        let n = x.nrows();
        if n < 2 || n != y.len() {
            return Err(PenaltyError::InsufficientRows { rows: n, required: 2 });
        }
        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or(PenaltyError::InsufficientRows { rows: n, required: 2 })?;
        let x_scale = x.std_axis(Axis(0), 0.0);
        if let Some(index) = x_scale.iter().position(|&s| s.is_nan() || s <= SCALE_EPSILON) {
            return Err(PenaltyError::DegenerateColumn { index });
        }
        let y_mean = y.sum() / n as f64;
        let mut xs = &x - &x_mean.view().insert_axis(Axis(0));
        xs /= &x_scale.view().insert_axis(Axis(0));
        let yc = y.mapv(|v| v - y_mean);
        let gram = xs.t().dot(&xs) / n as f64;
        let xty = xs.t().dot(&yc) / n as f64;
        Ok(Self {
            x_mean,
            x_scale,
            y_mean,
            gram,
            xty,
        })
    }

    fn lambda_max(&self, penalty: Penalty) -> f64 {
        let lasso_max = self.xty.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        match penalty {
            Penalty::Lasso => lasso_max,
            Penalty::Ridge => lasso_max / RIDGE_LAMBDA_DIVISOR,
        }
    }

    fn to_input_scale(&self, lambda: f64, standardized: &Array1<f64>) -> RegularizedFit {
        let coefficients = standardized / &self.x_scale;
        let intercept = self.y_mean - coefficients.dot(&self.x_mean);
        RegularizedFit {
            lambda,
            intercept,
            coefficients,
        }
    }
}

fn soft_threshold(z: f64, gamma: f64) -> f64 {
    if z > gamma {
        z - gamma
    } else if z < -gamma {
        z + gamma
    } else {
        0.0
    }
}

/// Log-spaced descending grid from `lambda_max` to `lambda_max * min_ratio`.
fn log_grid(lambda_max: f64, n_lambda: usize, min_ratio: f64) -> Vec<f64> {
    if n_lambda == 1 {
        return vec![lambda_max];
    }
    let step = min_ratio.ln() / (n_lambda - 1) as f64;
    (0..n_lambda)
        .map(|i| lambda_max * (step * i as f64).exp())
        .collect()
}

/// Descending λ grid for `penalty` on this design.
pub fn lambda_sequence(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    penalty: Penalty,
    config: &PathConfig,
) -> Result<Vec<f64>, PenaltyError> {
    config.validate()?;
    let design = StandardizedDesign::new(x, y)?;
    let lambda_max = design.lambda_max(penalty);
    if !lambda_max.is_finite() || lambda_max <= 0.0 {
        return Err(PenaltyError::DegenerateResponse);
    }
    Ok(log_grid(
        lambda_max,
        config.n_lambda,
        config.min_ratio(x.nrows(), x.ncols()),
    ))
}

/// Coefficients of one penalized fit, on the input scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegularizedFit {
    pub lambda: f64,
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

impl RegularizedFit {
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> Array1<f64> {
        features.dot(&self.coefficients) + self.intercept
    }

    pub fn nonzero_count(&self) -> usize {
        self.coefficients.iter().filter(|&&b| b != 0.0).count()
    }

    pub fn l2_norm(&self) -> f64 {
        self.coefficients.dot(&self.coefficients).sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct RegularizationPath {
    pub penalty: Penalty,
    /// Descending.
    pub lambdas: Vec<f64>,
    pub fits: Vec<RegularizedFit>,
}

impl RegularizationPath {
    /// The fit whose λ is closest to `lambda` on the log scale.
    pub fn coefficients_at(&self, lambda: f64) -> Option<&RegularizedFit> {
        let target = lambda.max(f64::MIN_POSITIVE).ln();
        self.fits
            .iter()
            .min_by(|a, b| {
                let da = (a.lambda.ln() - target).abs();
                let db = (b.lambda.ln() - target).abs();
                da.total_cmp(&db)
            })
    }

    /// Rows follow `lambdas`, columns the predictors.
    pub fn coefficient_matrix(&self) -> Array2<f64> {
        let p = self.fits.first().map_or(0, |f| f.coefficients.len());
        let mut out = Array2::zeros((self.fits.len(), p));
        for (mut row, fit) in out.rows_mut().into_iter().zip(&self.fits) {
            row.assign(&fit.coefficients);
        }
        out
    }
}

fn ridge_path(
    design: &StandardizedDesign,
    lambdas: &[f64],
) -> Result<Vec<Array1<f64>>, PenaltyError> {
    let mut out = Vec::with_capacity(lambdas.len());
    for &lambda in lambdas {
        let mut system = design.gram.clone();
        system.diag_mut().mapv_inplace(|d| d + lambda);
        let factor = system.cholesky(Side::Lower)?;
        out.push(factor.solve_vec(&design.xty));
    }
    Ok(out)
}

/// Cyclic coordinate descent on the covariance form, warm-started along the path.
fn lasso_path(
    design: &StandardizedDesign,
    lambdas: &[f64],
    tolerance: f64,
    max_iterations: usize,
) -> Vec<Array1<f64>> {
    let gram = &design.gram;
    let p = gram.nrows();
    let mut beta = Array1::<f64>::zeros(p);
    // Partial residual correlations: xty − gram·beta.
    let mut residual = design.xty.clone();
    let mut out = Vec::with_capacity(lambdas.len());

    for &lambda in lambdas {
        let mut converged = false;
        for _ in 0..max_iterations {
            let mut max_change = 0.0_f64;
            for j in 0..p {
                let gjj = gram[[j, j]];
                let old = beta[j];
                let updated = soft_threshold(residual[j] + gjj * old, lambda) / gjj;
                let delta = updated - old;
                if delta != 0.0 {
                    beta[j] = updated;
                    residual.scaled_add(-delta, &gram.column(j));
                    max_change = max_change.max(gjj * delta * delta);
                }
            }
            if max_change < tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!(
                "Lasso coordinate descent did not converge within {} sweeps at lambda {:.4e}",
                max_iterations,
                lambda
            );
        }
        out.push(beta.clone());
    }
    out
}

/// Fits `penalty` at every λ in `lambdas`.
pub fn fit_path(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    penalty: Penalty,
    lambdas: &[f64],
    config: &PathConfig,
) -> Result<RegularizationPath, PenaltyError> {
    let design = StandardizedDesign::new(x, y)?;
    let standardized = match penalty {
        Penalty::Ridge => ridge_path(&design, lambdas)?,
        Penalty::Lasso => lasso_path(&design, lambdas, config.tolerance, config.max_iterations),
    };
    let fits = lambdas
        .iter()
        .zip(&standardized)
        .map(|(&lambda, beta)| design.to_input_scale(lambda, beta))
        .collect();
    Ok(RegularizationPath {
        penalty,
        lambdas: lambdas.to_vec(),
        fits,
    })
}

/// Fold label per row: a random permutation dealt round-robin, so fold sizes differ
/// by at most one.
pub fn fold_assignment<R: Rng + ?Sized>(n: usize, folds: usize, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let mut labels = vec![0; n];
    for (position, &row) in order.iter().enumerate() {
        labels[row] = position % folds;
    }
    labels
}

/// Cross-validated error curve plus the full-data path it was computed for.
#[derive(Debug, Clone)]
pub struct CvPath {
    pub path: RegularizationPath,
    pub cv_mean: Vec<f64>,
    pub cv_se: Vec<f64>,
    pub index_min: usize,
    pub index_1se: usize,
}

impl CvPath {
    pub fn lambda_min(&self) -> f64 {
        self.path.lambdas[self.index_min]
    }

    pub fn lambda_1se(&self) -> f64 {
        self.path.lambdas[self.index_1se]
    }

    pub fn fit_min(&self) -> &RegularizedFit {
        &self.path.fits[self.index_min]
    }

    pub fn fit_1se(&self) -> &RegularizedFit {
        &self.path.fits[self.index_1se]
    }
}

pub fn cross_validate<R: Rng + ?Sized>(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    penalty: Penalty,
    config: &PathConfig,
    rng: &mut R,
) -> Result<CvPath, PenaltyError> {
    config.validate()?;
    let n = x.nrows();
    let k = config.n_folds;
    if n < k.max(2) * 2 {
        return Err(PenaltyError::InsufficientRows {
            rows: n,
            required: k.max(2) * 2,
        });
    }
    let lambdas = lambda_sequence(x, y, penalty, config)?;
    let labels = fold_assignment(n, k, rng);

    let mut fold_mse = Array2::<f64>::zeros((k, lambdas.len()));
    let mut weights = Array1::<f64>::zeros(k);
    for fold in 0..k {
        let (held, kept): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|&i| labels[i] == fold);
        let train_x = x.select(Axis(0), &kept);
        let train_y = y.select(Axis(0), &kept);
        let test_x = x.select(Axis(0), &held);
        let test_y = y.select(Axis(0), &held);
        let path = fit_path(train_x.view(), train_y.view(), penalty, &lambdas, config)?;
        for (l, fit) in path.fits.iter().enumerate() {
            let predicted = fit.predict(test_x.view());
            fold_mse[[fold, l]] = mean_squared_error(predicted.view(), test_y.view());
        }
        weights[fold] = held.len() as f64;
    }

    let total_weight = weights.sum();
    let cv_mean: Vec<f64> = fold_mse
        .columns()
        .into_iter()
        .map(|col| col.dot(&weights) / total_weight)
        .collect();
    let cv_se: Vec<f64> = fold_mse
        .columns()
        .into_iter()
        .zip(&cv_mean)
        .map(|(col, &mean)| {
            let spread = col
                .iter()
                .zip(weights.iter())
                .map(|(&m, &w)| w * (m - mean).powi(2))
                .sum::<f64>()
                / total_weight;
            (spread / (k - 1) as f64).sqrt()
        })
        .collect();

    let index_min = cv_mean
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let threshold = cv_mean[index_min] + cv_se[index_min];
    // Lambdas are descending, so the first admissible index is the largest λ.
    let index_1se = cv_mean
        .iter()
        .position(|&m| m <= threshold)
        .unwrap_or(index_min);

    let path = fit_path(x, y, penalty, &lambdas, config)?;
    log::debug!(
        "{} cross-validation: lambda_min {:.4e}, lambda_1se {:.4e}",
        penalty,
        lambdas[index_min],
        lambdas[index_1se]
    );
    Ok(CvPath {
        path,
        cv_mean,
        cv_se,
        index_min,
        index_1se,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct PenalizedTrial {
    pub trial: usize,
    pub lambda_min: f64,
    pub lambda_1se: f64,
    pub train_mse: f64,
    pub test_mse: f64,
    /// Input-scale coefficients of the λ_1se fit on the training half.
    pub coefficients: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct PenalizedReport {
    pub penalty: Penalty,
    pub feature_names: Vec<String>,
    pub trials: Vec<PenalizedTrial>,
}

impl PenalizedReport {
    pub fn test_mse_summary(&self) -> DistributionSummary {
        let values: Vec<f64> = self.trials.iter().map(|t| t.test_mse).collect();
        DistributionSummary::from_values(&values)
    }

    pub fn train_mse_summary(&self) -> DistributionSummary {
        let values: Vec<f64> = self.trials.iter().map(|t| t.train_mse).collect();
        DistributionSummary::from_values(&values)
    }

    pub fn lambda_summary(&self) -> DistributionSummary {
        let values: Vec<f64> = self.trials.iter().map(|t| t.lambda_1se).collect();
        DistributionSummary::from_values(&values)
    }

    /// Fraction of trials in which each predictor kept a non-zero coefficient.
    pub fn selection_frequency(&self) -> Array1<f64> {
        let mut counts = Array1::<f64>::zeros(self.feature_names.len());
        for trial in &self.trials {
            for (c, &b) in counts.iter_mut().zip(trial.coefficients.iter()) {
                if b != 0.0 {
                    *c += 1.0;
                }
            }
        }
        counts / self.trials.len().max(1) as f64
    }

    pub fn mean_abs_coefficients(&self) -> Array1<f64> {
        let mut sums = Array1::<f64>::zeros(self.feature_names.len());
        for trial in &self.trials {
            sums += &trial.coefficients.mapv(f64::abs);
        }
        sums / self.trials.len().max(1) as f64
    }
}

/// Cross-validates `penalty` on the training half of every resampling trial and scores
/// the λ_1se fit on the held-out half.
pub fn evaluate_penalized(
    table: &ObservationTable,
    penalty: Penalty,
    resampling: &ResamplingConfig,
    path_config: &PathConfig,
) -> Result<PenalizedReport, PenaltyError> {
    let n = table.n_rows();
    let mut rng = resampling.rng();
    let mut trials = Vec::with_capacity(resampling.trials);

    log::info!(
        "Resampling {} regression: {} trials, {}-fold cross-validation",
        penalty,
        resampling.trials,
        path_config.n_folds
    );
    let progress = trial_progress(resampling.trials, &format!("{penalty} resampling"));
    for trial in 0..resampling.trials {
        let split = TrainTestSplit::random(n, &mut rng);
        let train = table.select_rows(&split.train);
        let test = table.select_rows(&split.test);
        let cv = cross_validate(
            train.features.view(),
            train.outcome.view(),
            penalty,
            path_config,
            &mut rng,
        )?;
        let fit = cv.fit_1se();
        let train_mse = mean_squared_error(
            fit.predict(train.features.view()).view(),
            train.outcome.view(),
        );
        let test_mse =
            mean_squared_error(fit.predict(test.features.view()).view(), test.outcome.view());
        trials.push(PenalizedTrial {
            trial,
            lambda_min: cv.lambda_min(),
            lambda_1se: cv.lambda_1se(),
            train_mse,
            test_mse,
            coefficients: fit.coefficients.clone(),
        });
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(PenalizedReport {
        penalty,
        feature_names: table.feature_names.clone(),
        trials,
    })
}
