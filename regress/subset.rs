//! # Best-Subset and Stepwise Selection
//!
//! For every model size `k` the runner finds the linear model with exactly `k`
//! predictors that minimizes the residual sum of squares, using one of three search
//! strategies:
//!
//! - Exhaustive: every one of the C(p, k) subsets is fitted.
//! - Forward: start from the intercept-only model and greedily add the predictor
//!   that lowers RSS the most.
//! - Backward: start from the full model and greedily drop the predictor whose
//!   removal raises RSS the least.
//!
//! The three strategies share the objective and differ only in search. Each path
//! records the selected predictors and five fit metrics per size.

use super::faer_ndarray::FaerLinalgError;
use super::ols::{CrossProducts, LinearFit};
use crate::data::ObservationTable;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Exhaustive enumeration is refused above this many predictors.
pub const MAX_EXHAUSTIVE_PREDICTORS: usize = 20;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error(
        "The predictor subset {members:?} is singular; the columns are linearly dependent. Error: {source}"
    )]
    SingularModel {
        members: Vec<usize>,
        source: FaerLinalgError,
    },
    #[error("Subset selection needs at least {required} rows, but only {rows} are available.")]
    InsufficientRows { rows: usize, required: usize },
    #[error(
        "Exhaustive search over {found} predictors is not supported (limit {limit})."
    )]
    TooManyPredictors { found: usize, limit: usize },
    #[error("Requested model size {requested} exceeds the {available} available predictors.")]
    InvalidModelSize { requested: usize, available: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    Exhaustive,
    Forward,
    Backward,
}

impl SelectionStrategy {
    pub const ALL: [SelectionStrategy; 3] = [
        SelectionStrategy::Exhaustive,
        SelectionStrategy::Forward,
        SelectionStrategy::Backward,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Exhaustive => "exhaustive",
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    RSquared,
    Rss,
    AdjRSquared,
    Cp,
    Bic,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::RSquared,
        MetricKind::Rss,
        MetricKind::AdjRSquared,
        MetricKind::Cp,
        MetricKind::Bic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::RSquared => "rsq",
            Self::Rss => "rss",
            Self::AdjRSquared => "adjr2",
            Self::Cp => "cp",
            Self::Bic => "bic",
        }
    }

    /// Whether a larger value of this metric indicates a better model.
    pub fn higher_is_better(self) -> bool {
        matches!(self, Self::RSquared | Self::AdjRSquared)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// In-sample fit quality of one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitMetrics {
    pub rss: f64,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    /// Mallows' Cp against the full-model error variance.
    pub cp: f64,
    pub bic: f64,
}

impl FitMetrics {
    pub fn value(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::RSquared => self.r_squared,
            MetricKind::Rss => self.rss,
            MetricKind::AdjRSquared => self.adj_r_squared,
            MetricKind::Cp => self.cp,
            MetricKind::Bic => self.bic,
        }
    }
}

/// The best model of one size found by one strategy.
#[derive(Debug, Clone)]
pub struct SubsetModel {
    pub size: usize,
    pub fit: LinearFit,
    pub metrics: FitMetrics,
}

impl SubsetModel {
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> Array1<f64> {
        self.fit.predict(features)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub strategy: SelectionStrategy,
    pub size: usize,
    pub metric: MetricKind,
    pub value: f64,
}

/// One strategy's best models for sizes `1..=max_size`, ordered by size.
#[derive(Debug, Clone)]
pub struct SubsetPath {
    pub strategy: SelectionStrategy,
    pub feature_names: Vec<String>,
    pub models: Vec<SubsetModel>,
}

impl SubsetPath {
    pub fn max_size(&self) -> usize {
        self.models.len()
    }

    pub fn model(&self, size: usize) -> Option<&SubsetModel> {
        size.checked_sub(1).and_then(|idx| self.models.get(idx))
    }

    /// `membership[[k - 1, j]]` is true when predictor `j` is in the best size-`k` model.
    pub fn membership(&self) -> Array2<bool> {
        let mut out = Array2::from_elem((self.models.len(), self.feature_names.len()), false);
        for (row, model) in self.models.iter().enumerate() {
            for &j in &model.fit.members {
                out[[row, j]] = true;
            }
        }
        out
    }

    pub fn metric_series(&self, kind: MetricKind) -> Vec<f64> {
        self.models.iter().map(|m| m.metrics.value(kind)).collect()
    }

    /// Every (size, metric) value in size-major, metric-minor order.
    pub fn metric_records(&self) -> Vec<MetricRecord> {
        self.models
            .iter()
            .flat_map(|model| {
                MetricKind::ALL.iter().map(move |&metric| MetricRecord {
                    strategy: self.strategy,
                    size: model.size,
                    metric,
                    value: model.metrics.value(metric),
                })
            })
            .collect()
    }

    /// Size of the best model under `kind`; ties resolve to the smaller model.
    pub fn best_size_by(&self, kind: MetricKind) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for model in &self.models {
            let v = model.metrics.value(kind);
            if !v.is_finite() {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, current)) if kind.higher_is_better() => v > current,
                Some((_, current)) => v < current,
            };
            if better {
                best = Some((model.size, v));
            }
        }
        best.map(|(size, _)| size)
    }
}

/// Runs the subset searches of one table.
pub struct SubsetSelector {
    cross: CrossProducts,
    feature_names: Vec<String>,
    full_sigma2: f64,
}

impl SubsetSelector {
    pub fn new(table: &ObservationTable) -> Result<Self, SelectionError> {
        Self::from_parts(
            table.features.view(),
            table.outcome.view(),
            table.feature_names.clone(),
        )
    }

    pub fn from_parts(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        feature_names: Vec<String>,
    ) -> Result<Self, SelectionError> {
        let p = x.ncols();
        let required = p + 2;
        if x.nrows() < required {
            return Err(SelectionError::InsufficientRows {
                rows: x.nrows(),
                required,
            });
        }
        let cross = CrossProducts::new(x, y)?;
        let all: Vec<usize> = (0..p).collect();
        let full = cross.fit_subset(&all)?;
        let full_sigma2 = full.rss / (cross.n_samples() - p - 1) as f64;
        Ok(Self {
            cross,
            feature_names,
            full_sigma2,
        })
    }

    pub fn n_predictors(&self) -> usize {
        self.cross.n_predictors()
    }

    pub fn select(
        &self,
        strategy: SelectionStrategy,
        max_size: usize,
    ) -> Result<SubsetPath, SelectionError> {
        let p = self.n_predictors();
        if max_size > p {
            return Err(SelectionError::InvalidModelSize {
                requested: max_size,
                available: p,
            });
        }
        log::debug!("Running {strategy} subset search up to size {max_size}");
        let fits = match strategy {
            SelectionStrategy::Exhaustive => self.exhaustive(max_size)?,
            SelectionStrategy::Forward => self.forward(max_size)?,
            SelectionStrategy::Backward => self.backward(max_size)?,
        };
        let models = fits
            .into_iter()
            .map(|fit| {
                let size = fit.members.len();
                let metrics = self.metrics(fit.rss, size);
                SubsetModel { size, fit, metrics }
            })
            .collect();
        Ok(SubsetPath {
            strategy,
            feature_names: self.feature_names.clone(),
            models,
        })
    }

    fn metrics(&self, rss: f64, k: usize) -> FitMetrics {
        let n = self.cross.n_samples() as f64;
        let k_f = k as f64;
        let tss = self.cross.total_sum_of_squares();
        let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { 0.0 };
        let adj_r_squared = 1.0 - (1.0 - r_squared) * (n - 1.0) / (n - k_f - 1.0);
        let cp = if self.full_sigma2 > 0.0 {
            rss / self.full_sigma2 + 2.0 * (k_f + 1.0) - n
        } else {
            f64::NAN
        };
        let bic = n * (rss / n).ln() + (k_f + 1.0) * n.ln();
        FitMetrics {
            rss,
            r_squared,
            adj_r_squared,
            cp,
            bic,
        }
    }

    fn exhaustive(&self, max_size: usize) -> Result<Vec<LinearFit>, SelectionError> {
        let p = self.n_predictors();
        if p > MAX_EXHAUSTIVE_PREDICTORS {
            return Err(SelectionError::TooManyPredictors {
                found: p,
                limit: MAX_EXHAUSTIVE_PREDICTORS,
            });
        }
        let mut out = Vec::with_capacity(max_size);
        for k in 1..=max_size {
            let mut best: Option<LinearFit> = None;
            for members in (0..p).combinations(k) {
                let fit = self.cross.fit_subset(&members)?;
                if best.as_ref().is_none_or(|b| fit.rss < b.rss) {
                    best = Some(fit);
                }
            }
            if let Some(fit) = best {
                out.push(fit);
            }
        }
        Ok(out)
    }

    fn forward(&self, max_size: usize) -> Result<Vec<LinearFit>, SelectionError> {
        let p = self.n_predictors();
        let mut current: Vec<usize> = Vec::with_capacity(max_size);
        let mut out = Vec::with_capacity(max_size);
        for _ in 0..max_size {
            let mut best: Option<(usize, LinearFit)> = None;
            for candidate in (0..p).filter(|j| !current.contains(j)) {
                let mut members = current.clone();
                members.push(candidate);
                let fit = self.cross.fit_subset(&members)?;
                if best.as_ref().is_none_or(|(_, b)| fit.rss < b.rss) {
                    best = Some((candidate, fit));
                }
            }
            match best {
                Some((added, fit)) => {
                    current.push(added);
                    out.push(fit);
                }
                None => break,
            }
        }
        Ok(out)
    }

    fn backward(&self, max_size: usize) -> Result<Vec<LinearFit>, SelectionError> {
        let p = self.n_predictors();
        let mut current: Vec<usize> = (0..p).collect();
        let mut by_size: Vec<LinearFit> = Vec::with_capacity(p);
        by_size.push(self.cross.fit_subset(&current)?);
        while current.len() > 1 {
            let mut best: Option<(usize, LinearFit)> = None;
            for pos in 0..current.len() {
                let mut members = current.clone();
                members.remove(pos);
                let fit = self.cross.fit_subset(&members)?;
                if best.as_ref().is_none_or(|(_, b)| fit.rss < b.rss) {
                    best = Some((pos, fit));
                }
            }
            match best {
                Some((pos, fit)) => {
                    current.remove(pos);
                    by_size.push(fit);
                }
                None => break,
            }
        }
        by_size.reverse();
        by_size.truncate(max_size);
        Ok(by_size)
    }
}

/// Runs all three strategies up to `max_size` (all predictors when `None`), in the
/// order exhaustive, forward, backward.
pub fn run_all_strategies(
    table: &ObservationTable,
    max_size: Option<usize>,
) -> Result<Vec<SubsetPath>, SelectionError> {
    let selector = SubsetSelector::new(table)?;
    let max_size = max_size.unwrap_or(selector.n_predictors());
    SelectionStrategy::ALL
        .iter()
        .map(|&strategy| selector.select(strategy, max_size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_fixtures::{signal_table, sparse_signal_table};
    use approx::assert_abs_diff_eq;

    #[test]
    fn rss_is_non_increasing_in_model_size() {
        let table = sparse_signal_table(120, 11);
        for path in run_all_strategies(&table, None).unwrap() {
            let rss = path.metric_series(MetricKind::Rss);
            assert_eq!(rss.len(), 11);
            for pair in rss.windows(2) {
                assert!(
                    pair[1] <= pair[0] + 1e-9,
                    "{} path RSS increased: {:?}",
                    path.strategy,
                    rss
                );
            }
        }
    }

    #[test]
    fn exhaustive_search_is_never_worse_than_stepwise() {
        let table = sparse_signal_table(80, 5);
        let paths = run_all_strategies(&table, None).unwrap();
        let exhaustive = paths[0].metric_series(MetricKind::Rss);
        for path in &paths[1..] {
            for (e, s) in exhaustive.iter().zip(path.metric_series(MetricKind::Rss)) {
                assert!(*e <= s + 1e-9);
            }
        }
    }

    #[test]
    fn best_single_predictor_is_the_signal_column() {
        let table = signal_table(100, 0.05, 42);
        let selector = SubsetSelector::new(&table).unwrap();
        let path = selector.select(SelectionStrategy::Exhaustive, 11).unwrap();
        let model = path.model(1).unwrap();
        assert_eq!(model.fit.members, vec![0]);
        assert_abs_diff_eq!(model.fit.slopes[0], 1.0, epsilon = 0.05);
        assert!(model.metrics.r_squared > 0.99);
    }

    #[test]
    fn membership_matrix_matches_model_sizes() {
        let table = sparse_signal_table(100, 9);
        let paths = run_all_strategies(&table, Some(6)).unwrap();
        for path in &paths {
            let membership = path.membership();
            assert_eq!(membership.dim(), (6, 11));
            for (k, row) in membership.rows().into_iter().enumerate() {
                assert_eq!(row.iter().filter(|&&b| b).count(), k + 1);
            }
        }
        assert!(paths[1].membership()[[0, 0]]);
    }

    #[test]
    fn backward_path_starts_from_the_full_model() {
        let table = sparse_signal_table(60, 2);
        let selector = SubsetSelector::new(&table).unwrap();
        let path = selector.select(SelectionStrategy::Backward, 11).unwrap();
        assert_eq!(path.models.len(), 11);
        assert_eq!(path.model(11).unwrap().fit.members, (0..11).collect::<Vec<_>>());
        let full = selector.select(SelectionStrategy::Exhaustive, 11).unwrap();
        assert_abs_diff_eq!(
            path.model(11).unwrap().metrics.rss,
            full.model(11).unwrap().metrics.rss,
            epsilon = 1e-9
        );
    }

    #[test]
    fn information_criteria_prefer_the_true_support() {
        let table = sparse_signal_table(400, 21);
        let path = SubsetSelector::new(&table)
            .unwrap()
            .select(SelectionStrategy::Exhaustive, 11)
            .unwrap();
        assert_eq!(path.model(3).unwrap().fit.members, vec![0, 3, 7]);
        let best = path.best_size_by(MetricKind::Bic).unwrap();
        assert!((3..=4).contains(&best), "BIC picked size {best}");
        assert_eq!(path.best_size_by(MetricKind::Rss), Some(11));
        let full = path.model(11).unwrap();
        assert_abs_diff_eq!(full.metrics.cp, 12.0, epsilon = 1e-9);
    }

    #[test]
    fn metric_records_are_size_major() {
        let table = signal_table(40, 0.2, 1);
        let path = SubsetSelector::new(&table)
            .unwrap()
            .select(SelectionStrategy::Forward, 3)
            .unwrap();
        let records = path.metric_records();
        assert_eq!(records.len(), 3 * MetricKind::ALL.len());
        assert_eq!(records[0].size, 1);
        assert_eq!(records[0].metric, MetricKind::RSquared);
        assert_eq!(records[5].size, 2);
    }

    #[test]
    fn too_few_rows_are_rejected() {
        let table = signal_table(12, 0.1, 4);
        assert!(matches!(
            SubsetSelector::new(&table),
            Err(SelectionError::InsufficientRows { rows: 12, required: 13 })
        ));
    }

    #[test]
    fn exhaustive_search_is_bounded_but_stepwise_is_not() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use rand_distr::StandardNormal;

        let p = MAX_EXHAUSTIVE_PREDICTORS + 1;
        let mut rng = StdRng::seed_from_u64(21);
        let x = Array2::from_shape_fn((60, p), |_| rng.sample::<f64, _>(StandardNormal));
        let y = x.column(0).to_owned() + Array1::from_shape_fn(60, |_| {
            0.3 * rng.sample::<f64, _>(StandardNormal)
        });
        let names = (1..=p).map(|j| format!("x{j}")).collect();
        let selector = SubsetSelector::from_parts(x.view(), y.view(), names).unwrap();

        assert!(matches!(
            selector.select(SelectionStrategy::Exhaustive, 2),
            Err(SelectionError::TooManyPredictors { found: 21, limit: 20 })
        ));
        let forward = selector.select(SelectionStrategy::Forward, 2).unwrap();
        assert_eq!(forward.model(1).unwrap().fit.members, vec![0]);
    }
}
