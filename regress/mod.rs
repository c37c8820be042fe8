//! Linear models on observation tables: exhaustive and stepwise subset search,
//! resampled test error, and ridge/lasso paths.

pub mod faer_ndarray;
pub mod ols;
pub mod penalized;
pub mod resample;
pub mod subset;

pub use penalized::{
    CvPath, PathConfig, Penalty, PenaltyError, PenalizedReport, RegularizationPath,
    RegularizedFit, cross_validate, evaluate_penalized, fit_path, lambda_sequence,
};
pub use resample::{
    DistributionSummary, ResamplingConfig, ResamplingReport, SplitPhase, TrainTestSplit,
    evaluate_subsets,
};
pub use subset::{
    MetricKind, SelectionError, SelectionStrategy, SubsetPath, SubsetSelector, run_all_strategies,
};
