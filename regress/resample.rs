//! Repeated random half/half resampling of the subset searches.
//!
//! Each trial draws an independent split of the rows into two disjoint halves, runs
//! every selection strategy on the training half and scores each best-of-size model
//! on both halves. The report keeps every per-trial error so summaries can be
//! recomputed, plus counts of how often each predictor was selected at each size.

use super::ols::mean_squared_error;
use super::subset::{SelectionError, SelectionStrategy, SubsetSelector};
use crate::data::ObservationTable;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::IsTerminal;

pub const DEFAULT_TRIALS: usize = 30;

/// Probabilities reported by every distribution summary.
pub const SUMMARY_PROBABILITIES: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResamplingConfig {
    pub trials: usize,
    /// Fixed seed for reproducible splits; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            seed: None,
        }
    }
}

impl ResamplingConfig {
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// A partition of `0..n` into a training half and a test half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl TrainTestSplit {
    /// Shuffles the row indices; the first `n / 2` become the training half.
    pub fn random<R: rand::Rng + ?Sized>(n: usize, rng: &mut R) -> Self {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);
        let test = order.split_off(n / 2);
        let mut train = order;
        train.sort_unstable();
        let mut test = test;
        test.sort_unstable();
        Self { train, test }
    }

    /// True when every row of `0..n` appears in exactly one half.
    pub fn covers(&self, n: usize) -> bool {
        let mut seen = vec![false; n];
        for &i in self.train.iter().chain(self.test.iter()) {
            if i >= n || seen[i] {
                return false;
            }
            seen[i] = true;
        }
        seen.into_iter().all(|s| s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitPhase {
    Train,
    Test,
}

impl SplitPhase {
    pub const ALL: [SplitPhase; 2] = [SplitPhase::Train, SplitPhase::Test];

    pub fn name(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for SplitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialRecord {
    pub trial: usize,
    pub strategy: SelectionStrategy,
    pub size: usize,
    pub phase: SplitPhase,
    pub mse: f64,
}

/// Mean and quantiles of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub count: usize,
    pub mean: f64,
    /// `(probability, quantile)` pairs for [`SUMMARY_PROBABILITIES`].
    pub quantiles: Vec<(f64, f64)>,
}

impl DistributionSummary {
    pub fn from_values(values: &[f64]) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);
        let mean = if sorted.is_empty() {
            f64::NAN
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };
        let quantiles = SUMMARY_PROBABILITIES
            .iter()
            .map(|&p| (p, quantile(&sorted, p)))
            .collect();
        Self {
            count: sorted.len(),
            mean,
            quantiles,
        }
    }

    pub fn median(&self) -> f64 {
        quantile_lookup(&self.quantiles, 0.5)
    }
}

fn quantile_lookup(quantiles: &[(f64, f64)], p: f64) -> f64 {
    quantiles
        .iter()
        .find(|(q, _)| (*q - p).abs() < 1e-12)
        .map(|&(_, v)| v)
        .unwrap_or(f64::NAN)
}

/// Sample quantile with linear interpolation between order statistics (Hyndman and
/// Fan type 7). `sorted` must be in ascending order.
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MseSummary {
    pub strategy: SelectionStrategy,
    pub size: usize,
    pub phase: SplitPhase,
    pub summary: DistributionSummary,
}

/// Everything accumulated over the resampling trials of one table.
#[derive(Debug, Clone)]
pub struct ResamplingReport {
    pub trials: usize,
    pub max_size: usize,
    pub feature_names: Vec<String>,
    pub records: Vec<TrialRecord>,
    /// Per-strategy counts of `(size - 1, predictor)` selections.
    membership_counts: Vec<(SelectionStrategy, Array2<usize>)>,
}

impl ResamplingReport {
    fn values(&self, strategy: SelectionStrategy, size: usize, phase: SplitPhase) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| r.strategy == strategy && r.size == size && r.phase == phase)
            .map(|r| r.mse)
            .collect()
    }

    /// One entry per (strategy, size, phase), strategy-major.
    pub fn summary(&self) -> Vec<MseSummary> {
        let mut out = Vec::new();
        for (strategy, _) in &self.membership_counts {
            for size in 1..=self.max_size {
                for phase in SplitPhase::ALL {
                    out.push(MseSummary {
                        strategy: *strategy,
                        size,
                        phase,
                        summary: DistributionSummary::from_values(
                            &self.values(*strategy, size, phase),
                        ),
                    });
                }
            }
        }
        out
    }

    pub fn membership_counts(&self, strategy: SelectionStrategy) -> Option<&Array2<usize>> {
        self.membership_counts
            .iter()
            .find(|(s, _)| *s == strategy)
            .map(|(_, counts)| counts)
    }

    /// Fraction of trials in which each predictor was selected at each size.
    pub fn membership_frequency(&self, strategy: SelectionStrategy) -> Option<Array2<f64>> {
        let trials = self.trials.max(1) as f64;
        self.membership_counts(strategy)
            .map(|counts| counts.mapv(|c| c as f64 / trials))
    }

    /// Selection frequency pooled over all strategies and trials.
    pub fn pooled_membership_frequency(&self) -> Array2<f64> {
        let mut total = Array2::<f64>::zeros((self.max_size, self.feature_names.len()));
        for (_, counts) in &self.membership_counts {
            total += &counts.mapv(|c| c as f64);
        }
        let denom = (self.trials * self.membership_counts.len()).max(1) as f64;
        total / denom
    }

    /// Model size with the lowest mean test error for `strategy`.
    pub fn best_size(&self, strategy: SelectionStrategy) -> Option<usize> {
        (1..=self.max_size)
            .map(|size| {
                let values = self.values(strategy, size, SplitPhase::Test);
                (size, DistributionSummary::from_values(&values).mean)
            })
            .filter(|(_, mean)| mean.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(size, _)| size)
    }
}

pub(crate) fn trial_progress(trials: usize, label: &str) -> ProgressBar {
    let target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let bar = ProgressBar::with_draw_target(Some(trials as u64), target);
    bar.set_style(
        ProgressStyle::with_template("{msg:<28} [{bar:40.cyan/blue}] {pos}/{len} trials")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(label.to_string());
    bar
}

/// Runs `config.trials` independent half/half splits of `table` through every
/// selection strategy.
pub fn evaluate_subsets(
    table: &ObservationTable,
    config: &ResamplingConfig,
) -> Result<ResamplingReport, SelectionError> {
    let n = table.n_rows();
    let p = table.n_features();
    let half = n / 2;
    if half < p + 2 {
        return Err(SelectionError::InsufficientRows {
            rows: n,
            required: 2 * (p + 2),
        });
    }

    let mut rng = config.rng();
    let mut membership_counts: Vec<(SelectionStrategy, Array2<usize>)> = SelectionStrategy::ALL
        .iter()
        .map(|&s| (s, Array2::zeros((p, p))))
        .collect();
    let mut records = Vec::with_capacity(config.trials * SelectionStrategy::ALL.len() * p * 2);

    log::info!(
        "Resampling subset selection: {} trials on {} rows",
        config.trials,
        n
    );
    let progress = trial_progress(config.trials, "subset resampling");
    for trial in 0..config.trials {
        let split = TrainTestSplit::random(n, &mut rng);
        let train = table.select_rows(&split.train);
        let test = table.select_rows(&split.test);
        let selector = SubsetSelector::new(&train)?;

        for (strategy, counts) in membership_counts.iter_mut() {
            let path = selector.select(*strategy, p)?;
            for model in &path.models {
                for &j in &model.fit.members {
                    counts[[model.size - 1, j]] += 1;
                }
                let train_mse =
                    mean_squared_error(model.predict(train.features.view()).view(), train.outcome.view());
                let test_mse =
                    mean_squared_error(model.predict(test.features.view()).view(), test.outcome.view());
                records.push(TrialRecord {
                    trial,
                    strategy: *strategy,
                    size: model.size,
                    phase: SplitPhase::Train,
                    mse: train_mse,
                });
                records.push(TrialRecord {
                    trial,
                    strategy: *strategy,
                    size: model.size,
                    phase: SplitPhase::Test,
                    mse: test_mse,
                });
            }
        }
        log::debug!("Finished resampling trial {}/{}", trial + 1, config.trials);
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(ResamplingReport {
        trials: config.trials,
        max_size: p,
        feature_names: table.feature_names.clone(),
        records,
        membership_counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_fixtures::sparse_signal_table;
    use approx::assert_abs_diff_eq;

    #[test]
    fn splits_cover_every_row_exactly_once() {
        let mut rng = StdRng::seed_from_u64(17);
        for n in [2usize, 7, 50, 101] {
            for _ in 0..20 {
                let split = TrainTestSplit::random(n, &mut rng);
                assert!(split.covers(n));
                assert_eq!(split.train.len(), n / 2);
                assert_eq!(split.train.len() + split.test.len(), n);
                assert!(split.train.iter().all(|i| !split.test.contains(i)));
            }
        }
    }

    #[test]
    fn covers_detects_duplicates_and_gaps() {
        let split = TrainTestSplit {
            train: vec![0, 1],
            test: vec![1, 3],
        };
        assert!(!split.covers(4));
        let split = TrainTestSplit {
            train: vec![0],
            test: vec![2],
        };
        assert!(!split.covers(3));
    }

    #[test]
    fn type_seven_quantiles() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(quantile(&sorted, 0.0), 1.0);
        assert_abs_diff_eq!(quantile(&sorted, 0.5), 2.5);
        assert_abs_diff_eq!(quantile(&sorted, 0.25), 1.75);
        assert_abs_diff_eq!(quantile(&sorted, 1.0), 4.0);
        assert!(quantile(&[], 0.5).is_nan());

        let summary = DistributionSummary::from_values(&[4.0, 1.0, 3.0, 2.0]);
        assert_abs_diff_eq!(summary.mean, 2.5);
        assert_abs_diff_eq!(summary.median(), 2.5);
    }

    #[test]
    fn report_has_one_record_per_trial_strategy_size_and_phase() {
        let table = sparse_signal_table(120, 3);
        let config = ResamplingConfig {
            trials: 4,
            seed: Some(99),
        };
        let report = evaluate_subsets(&table, &config).unwrap();
        assert_eq!(report.records.len(), 4 * 3 * 11 * 2);
        assert_eq!(report.summary().len(), 3 * 11 * 2);

        let counts = report.membership_counts(SelectionStrategy::Forward).unwrap();
        for (k, row) in counts.rows().into_iter().enumerate() {
            assert_eq!(row.sum(), 4 * (k + 1));
        }
        let freq = report.pooled_membership_frequency();
        assert!(freq.iter().all(|&f| (0.0..=1.0).contains(&f)));
        assert_abs_diff_eq!(freq[[0, 0]], 1.0);
    }

    #[test]
    fn test_error_exceeds_train_error_for_the_full_model_on_average() {
        let table = sparse_signal_table(100, 8);
        let config = ResamplingConfig {
            trials: 6,
            seed: Some(5),
        };
        let report = evaluate_subsets(&table, &config).unwrap();
        let summaries = report.summary();
        let pick = |phase| {
            summaries
                .iter()
                .find(|s| {
                    s.strategy == SelectionStrategy::Exhaustive && s.size == 11 && s.phase == phase
                })
                .unwrap()
                .summary
                .mean
        };
        assert!(pick(SplitPhase::Test) > pick(SplitPhase::Train));
        let best = report.best_size(SelectionStrategy::Exhaustive).unwrap();
        assert!(best >= 3);
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let table = sparse_signal_table(80, 4);
        let config = ResamplingConfig {
            trials: 2,
            seed: Some(1234),
        };
        let a = evaluate_subsets(&table, &config).unwrap();
        let b = evaluate_subsets(&table, &config).unwrap();
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn small_tables_are_rejected() {
        let table = sparse_signal_table(20, 4);
        assert!(matches!(
            evaluate_subsets(&table, &ResamplingConfig::default()),
            Err(SelectionError::InsufficientRows { .. })
        ));
    }
}
