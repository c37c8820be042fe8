use super::ObservationTable;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// `n` rows of 11 independent standard-normal predictors with an outcome equal to
/// the first predictor plus `noise`-scaled Gaussian noise.
pub(crate) fn signal_table(n: usize, noise: f64, seed: u64) -> ObservationTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let features = Array2::from_shape_fn((n, 11), |_| rng.sample::<f64, _>(StandardNormal));
    let outcome = Array1::from_shape_fn(n, |i| {
        features[[i, 0]] + noise * rng.sample::<f64, _>(StandardNormal)
    });
    let names = (1..=11).map(|i| format!("x{i}")).collect();
    ObservationTable::new(names, features, "y", outcome).unwrap()
}

/// Outcome driven by three of the predictors with distinct strengths.
pub(crate) fn sparse_signal_table(n: usize, seed: u64) -> ObservationTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let features = Array2::from_shape_fn((n, 11), |_| rng.sample::<f64, _>(StandardNormal));
    let outcome = Array1::from_shape_fn(n, |i| {
        2.0 * features[[i, 0]] - 1.0 * features[[i, 3]]
            + 0.5 * features[[i, 7]]
            + 0.5 * rng.sample::<f64, _>(StandardNormal)
    });
    let names = (1..=11).map(|i| format!("x{i}")).collect();
    ObservationTable::new(names, features, "y", outcome).unwrap()
}
