// ========================================================================================
//
//                      Oenometrics model search benchmark
//
// ========================================================================================
//
// Measures the cost of the three subset searches and of one cross-validated lasso path
// on a table shaped like the red wine data (about 1600 rows, 11 predictors).
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ndarray::{Array1, Array2};
use oenometrics::data::ObservationTable;
use oenometrics::regress::{PathConfig, Penalty, SelectionStrategy, SubsetSelector, cross_validate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const ROWS: usize = 1_600;
const PREDICTORS: usize = 11;

fn synthetic_table(seed: u64) -> ObservationTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let features =
        Array2::from_shape_fn((ROWS, PREDICTORS), |_| rng.sample::<f64, _>(StandardNormal));
    let outcome = Array1::from_shape_fn(ROWS, |i| {
        0.8 * features[[i, 10]] - 0.5 * features[[i, 1]] + rng.sample::<f64, _>(StandardNormal)
    });
    let names = (1..=PREDICTORS).map(|j| format!("x{j}")).collect();
    ObservationTable::new(names, features, "quality", outcome).expect("valid synthetic table")
}

fn bench_subset_search(c: &mut Criterion) {
    let table = synthetic_table(1);
    let selector = SubsetSelector::new(&table).expect("selector");
    let mut group = c.benchmark_group("subset_search");
    for strategy in SelectionStrategy::ALL {
        group.bench_with_input(
            BenchmarkId::from_parameter(strategy.name()),
            &strategy,
            |b, &strategy| {
                b.iter(|| {
                    black_box(
                        selector
                            .select(strategy, PREDICTORS)
                            .expect("subset search"),
                    )
                })
            },
        );
    }
    group.finish();
}

fn bench_lasso_cross_validation(c: &mut Criterion) {
    let table = synthetic_table(2);
    let config = PathConfig::default();
    c.bench_function("lasso_cross_validation", |b| {
        b.iter(|| {
            let mut rng = StdRng::seed_from_u64(3);
            black_box(
                cross_validate(
                    table.features.view(),
                    table.outcome.view(),
                    Penalty::Lasso,
                    &config,
                    &mut rng,
                )
                .expect("cross validation"),
            )
        })
    });
}

criterion_group!(benches, bench_subset_search, bench_lasso_cross_validation);
criterion_main!(benches);
