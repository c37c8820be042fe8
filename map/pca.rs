use crate::data::scale::{ScaleError, Standardizer};
use crate::data::{DataError, ObservationTable, WineColor};
use crate::regress::faer_ndarray::{FaerEigh, FaerLinalgError};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum PcaError {
    InvalidInput(&'static str),
    DegenerateColumn { index: usize, name: String },
    Scale(ScaleError),
    Eigen(FaerLinalgError),
    Data(DataError),
}

impl fmt::Display for PcaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PcaError::InvalidInput(msg) => f.write_str(msg),
            PcaError::DegenerateColumn { index, name } => write!(
                f,
                "column {index} ('{name}') has zero variance; principal components are undefined"
            ),
            PcaError::Scale(err) => write!(f, "standardization failed: {err}"),
            PcaError::Eigen(err) => write!(f, "eigendecomposition failed: {err}"),
            PcaError::Data(err) => write!(f, "table error: {err}"),
        }
    }
}

impl Error for PcaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PcaError::Scale(err) => Some(err),
            PcaError::Eigen(err) => Some(err),
            PcaError::Data(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ScaleError> for PcaError {
    fn from(err: ScaleError) -> Self {
        match err {
            ScaleError::DegenerateColumn { index, name } => {
                PcaError::DegenerateColumn { index, name }
            }
            other => PcaError::Scale(other),
        }
    }
}

impl From<FaerLinalgError> for PcaError {
    fn from(err: FaerLinalgError) -> Self {
        PcaError::Eigen(err)
    }
}

impl From<DataError> for PcaError {
    fn from(err: DataError) -> Self {
        PcaError::Data(err)
    }
}

/// Principal components of the correlation matrix of a set of predictor columns.
#[derive(Clone, Debug)]
pub struct PrincipalComponents {
    feature_names: Vec<String>,
    scaler: Standardizer,
    eigenvalues: Array1<f64>,
    /// Shape: [n_features, n_components]; column `k` is component `k + 1`.
    loadings: Array2<f64>,
}

impl PrincipalComponents {
    /// Standardizes the columns (sample standard deviation) and eigendecomposes their
    /// correlation matrix.
    ///
    /// Components come out in order of decreasing variance. Each loading vector is
    /// signed so that its largest-magnitude entry is positive, which makes the result
    /// independent of the sign the eigensolver happens to return.
    pub fn fit(features: ArrayView2<'_, f64>, names: &[String]) -> Result<Self, PcaError> {
        let n = features.nrows();
        let p = features.ncols();
        if p == 0 {
            return Err(PcaError::InvalidInput("no predictor columns to decompose"));
        }
        if names.len() != p {
            return Err(PcaError::InvalidInput(
                "feature names do not match the number of columns",
            ));
        }
        let scaler = Standardizer::fit(features, names)?;
        let z = scaler.transform(features);
        let correlation = z.t().dot(&z) / (n - 1) as f64;

        let (mut eigenvalues, mut loadings) = correlation.eigh_descending()?;
        eigenvalues.mapv_inplace(|v| v.max(0.0));
        for mut column in loadings.columns_mut() {
            let pivot = column
                .iter()
                .copied()
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                .unwrap_or(0.0);
            if pivot < 0.0 {
                column.mapv_inplace(|v| -v);
            }
        }
        log::debug!(
            "Principal components fitted on {} rows x {} columns; leading eigenvalue {:.4}",
            n,
            p,
            eigenvalues[0]
        );

        Ok(Self {
            feature_names: names.to_vec(),
            scaler,
            eigenvalues,
            loadings,
        })
    }

    pub fn components(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Variance of each component's scores.
    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    pub fn sdev(&self) -> Array1<f64> {
        self.eigenvalues.mapv(f64::sqrt)
    }

    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        let total = self.eigenvalues.sum();
        if total > 0.0 {
            &self.eigenvalues / total
        } else {
            Array1::zeros(self.eigenvalues.len())
        }
    }

    pub fn cumulative_variance_ratio(&self) -> Array1<f64> {
        let mut running = 0.0;
        self.explained_variance_ratio().mapv(|r| {
            running += r;
            running
        })
    }

    pub fn loadings(&self) -> &Array2<f64> {
        &self.loadings
    }

    pub fn component_names(&self) -> Vec<String> {
        (1..=self.components()).map(|k| format!("PC{k}")).collect()
    }

    /// Scores of `features` using the fitted standardization.
    pub fn project(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        self.scaler.transform(features).dot(&self.loadings)
    }
}

/// Rows of several colors stacked into one table, each tagged with its source.
#[derive(Clone, Debug)]
pub struct MergedTable {
    pub table: ObservationTable,
    pub sources: Vec<WineColor>,
}

impl MergedTable {
    pub fn from_colors(parts: &[(WineColor, ObservationTable)]) -> Result<Self, PcaError> {
        let tables: Vec<&ObservationTable> = parts.iter().map(|(_, t)| t).collect();
        let table = ObservationTable::concat(&tables)?;
        let sources = parts
            .iter()
            .flat_map(|(color, t)| std::iter::repeat_n(*color, t.n_rows()))
            .collect();
        Ok(Self { table, sources })
    }

    pub fn count(&self, color: WineColor) -> usize {
        self.sources.iter().filter(|&&c| c == color).count()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectedRow {
    pub source: WineColor,
    pub quality: f64,
    pub pc1: f64,
    pub pc2: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Centroid<K> {
    pub key: K,
    pub count: usize,
    pub pc1: f64,
    pub pc2: f64,
}

#[derive(Clone, Debug)]
pub struct StructureSummary {
    pub pca: PrincipalComponents,
    pub projections: Vec<ProjectedRow>,
    pub source_centroids: Vec<Centroid<WineColor>>,
    /// Keyed by the rounded outcome value.
    pub quality_centroids: Vec<Centroid<i64>>,
}

fn centroids<K: Ord + Copy>(rows: impl Iterator<Item = (K, f64, f64)>) -> Vec<Centroid<K>> {
    let mut sums: BTreeMap<K, (usize, f64, f64)> = BTreeMap::new();
    for (key, pc1, pc2) in rows {
        let entry = sums.entry(key).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += pc1;
        entry.2 += pc2;
    }
    sums.into_iter()
        .map(|(key, (count, s1, s2))| Centroid {
            key,
            count,
            pc1: s1 / count as f64,
            pc2: s2 / count as f64,
        })
        .collect()
}

/// PCA of the merged predictors, with the first two score columns summarized by
/// source color and by quality.
pub fn analyze_structure(merged: &MergedTable) -> Result<StructureSummary, PcaError> {
    let table = &merged.table;
    if table.n_features() < 2 {
        return Err(PcaError::InvalidInput(
            "at least two predictors are needed for a two-component summary",
        ));
    }
    log::info!(
        "Principal components of {} merged rows ({} red, {} white)",
        table.n_rows(),
        merged.count(WineColor::Red),
        merged.count(WineColor::White)
    );
    let pca = PrincipalComponents::fit(table.features.view(), &table.feature_names)?;
    let scores = pca.project(table.features.view());
    let leading = scores.slice_axis(Axis(1), (0..2).into());

    let projections: Vec<ProjectedRow> = merged
        .sources
        .iter()
        .zip(table.outcome.iter())
        .zip(leading.rows())
        .map(|((&source, &quality), row)| ProjectedRow {
            source,
            quality,
            pc1: row[0],
            pc2: row[1],
        })
        .collect();

    let source_centroids = centroids(projections.iter().map(|r| (r.source, r.pc1, r.pc2)));
    let quality_centroids = centroids(
        projections
            .iter()
            .map(|r| (r.quality.round() as i64, r.pc1, r.pc2)),
    );

    Ok(StructureSummary {
        pca,
        projections,
        source_centroids,
        quality_centroids,
    })
}

/// Replaces the predictors of `table` by all of their principal-component scores,
/// named `PC1..PCp`. The outcome is carried over unchanged.
pub fn principal_component_table(table: &ObservationTable) -> Result<ObservationTable, PcaError> {
    let pca = PrincipalComponents::fit(table.features.view(), &table.feature_names)?;
    let scores = pca.project(table.features.view());
    let table = ObservationTable::new(
        pca.component_names(),
        scores,
        table.outcome_name.clone(),
        table.outcome.clone(),
    )?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_fixtures::{signal_table, sparse_signal_table};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn correlated_table() -> ObservationTable {
        let mut table = signal_table(300, 0.2, 12);
        let first = table.features.column(0).to_owned();
        // Make the second column mostly a copy of the first.
        let mut second = table.features.column_mut(1);
        second.zip_mut_with(&first, |b, &a| *b = a + 0.1 * *b);
        table
    }

    #[test]
    fn loadings_are_orthonormal_and_variances_decrease() {
        let table = correlated_table();
        let pca = PrincipalComponents::fit(table.features.view(), &table.feature_names).unwrap();
        let gram = pca.loadings().t().dot(pca.loadings());
        for ((i, j), &v) in gram.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(v, expected, epsilon = 1e-9);
        }

        let variances = pca.explained_variance();
        assert!(variances.windows(2).into_iter().all(|w| w[0] >= w[1]));
        assert_abs_diff_eq!(variances.sum(), 11.0, epsilon = 1e-8);
        assert_abs_diff_eq!(pca.explained_variance_ratio().sum(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pca.cumulative_variance_ratio()[10], 1.0, epsilon = 1e-12);
        assert!(variances[0] > 1.8);

        let scores = pca.project(table.features.view());
        for (k, column) in scores.columns().into_iter().enumerate() {
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(column.var(1.0), variances[k], epsilon = 1e-8);
        }
    }

    #[test]
    fn largest_loading_of_every_component_is_positive() {
        let table = correlated_table();
        let pca = PrincipalComponents::fit(table.features.view(), &table.feature_names).unwrap();
        for column in pca.loadings().columns() {
            let pivot = column
                .iter()
                .copied()
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                .unwrap();
            assert!(pivot > 0.0);
        }
        assert_abs_diff_eq!(pca.sdev()[0], pca.explained_variance()[0].sqrt());
    }

    #[test]
    fn constant_column_is_rejected() {
        let features = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let names = vec!["a".to_string(), "b".to_string()];
        match PrincipalComponents::fit(features.view(), &names) {
            Err(PcaError::DegenerateColumn { index, name }) => {
                assert_eq!(index, 1);
                assert_eq!(name, "b");
            }
            other => panic!("expected DegenerateColumn, got {other:?}"),
        }
    }

    #[test]
    fn component_table_keeps_the_outcome() {
        let table = sparse_signal_table(80, 2);
        let pcs = principal_component_table(&table).unwrap();
        assert_eq!(pcs.feature_names[0], "PC1");
        assert_eq!(pcs.feature_names[10], "PC11");
        assert_eq!(pcs.outcome, table.outcome);
        assert_eq!(pcs.n_rows(), 80);
    }

    #[test]
    fn merged_structure_is_summarized_per_source() {
        let red = sparse_signal_table(40, 1);
        let mut white = sparse_signal_table(60, 2);
        white.features.mapv_inplace(|v| v + 3.0);
        let merged = MergedTable::from_colors(&[
            (WineColor::Red, red.clone()),
            (WineColor::White, white),
        ])
        .unwrap();
        assert_eq!(merged.count(WineColor::Red), 40);
        assert_eq!(merged.count(WineColor::White), 60);

        let summary = analyze_structure(&merged).unwrap();
        assert_eq!(summary.projections.len(), 100);
        assert_eq!(summary.source_centroids.len(), 2);
        assert_eq!(summary.source_centroids[0].key, WineColor::Red);
        assert_eq!(summary.source_centroids[0].count, 40);
        // The color shift dominates the first component.
        let gap = summary.source_centroids[1].pc1 - summary.source_centroids[0].pc1;
        assert!(gap.abs() > 2.0);
        let total: usize = summary.quality_centroids.iter().map(|c| c.count).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn mismatched_schemas_cannot_be_merged() {
        let red = sparse_signal_table(20, 1);
        let mut white = sparse_signal_table(20, 2);
        white.feature_names[0] = "other".into();
        assert!(matches!(
            MergedTable::from_colors(&[(WineColor::Red, red), (WineColor::White, white)]),
            Err(PcaError::Data(DataError::SchemaMismatch))
        ));
    }
}
