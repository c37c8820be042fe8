//! Orchestration of the full analysis.
//!
//! Every color goes through the same per-color routine; the merged-data PCA and the
//! component-regression variant run once afterwards. All errors are fatal.

use crate::config::{AnalysisConfig, ConfigError};
use crate::data::scale::{ScaleError, standardize_table};
use crate::data::{DataError, ObservationTable, WineColor, apply_outlier_filters, load_table};
use crate::map::{MergedTable, PcaError, StructureSummary, analyze_structure, principal_component_table};
use crate::regress::{
    CvPath, Penalty, PenaltyError, PenalizedReport, ResamplingReport, SelectionError, SubsetPath,
    cross_validate, evaluate_penalized, evaluate_subsets, run_all_strategies,
};
use crate::report::ReportError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Added to a penalty's resampling salt for its full-data cross-validation.
const FULL_DATA_SALT: u64 = 50;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    #[error("Scaling error: {0}")]
    Scale(#[from] ScaleError),
    #[error("Subset selection failed: {0}")]
    Selection(#[from] SelectionError),
    #[error("Penalized regression failed: {0}")]
    Penalty(#[from] PenaltyError),
    #[error("Principal component analysis failed: {0}")]
    Pca(#[from] PcaError),
    #[error("Report output failed: {0}")]
    Report(#[from] ReportError),
}

/// Independently selectable parts of the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Subsets,
    Resample,
    Penalized,
    Structure,
    ComponentRegression,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Subsets,
        Stage::Resample,
        Stage::Penalized,
        Stage::Structure,
        Stage::ComponentRegression,
    ];

    /// Offset mixed into the configured seed so stages draw from separate streams.
    fn salt(self, color: WineColor, penalty: Option<Penalty>) -> u64 {
        let stage = match self {
            Stage::Subsets => 0,
            Stage::Resample => 1,
            Stage::Penalized => 2,
            Stage::Structure => 3,
            Stage::ComponentRegression => 4,
        };
        let penalty = match penalty {
            None => 0,
            Some(Penalty::Ridge) => 1,
            Some(Penalty::Lasso) => 2,
        };
        let color = match color {
            WineColor::Red => 0,
            WineColor::White => 1,
        };
        color * 100 + stage * 10 + penalty
    }
}

/// Input file locations.
#[derive(Debug, Clone)]
pub struct WineInputs {
    pub red: PathBuf,
    pub white: PathBuf,
}

impl Default for WineInputs {
    fn default() -> Self {
        Self {
            red: PathBuf::from(WineColor::Red.default_file_name()),
            white: PathBuf::from(WineColor::White.default_file_name()),
        }
    }
}

impl WineInputs {
    pub fn path_for(&self, color: WineColor) -> &Path {
        match color {
            WineColor::Red => &self.red,
            WineColor::White => &self.white,
        }
    }
}

/// A loaded and outlier-filtered table.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub color: WineColor,
    pub table: ObservationTable,
    pub dropped: usize,
}

pub fn load_color(
    color: WineColor,
    path: &Path,
    config: &AnalysisConfig,
) -> Result<LoadedTable, AnalysisError> {
    let raw = load_table(path, config.delimiter)?;
    let (table, dropped) = apply_outlier_filters(&raw, config.filters_for(color))?;
    log::info!(
        "{} wine: {} rows kept, {} dropped by outlier filters",
        color,
        table.n_rows(),
        dropped
    );
    Ok(LoadedTable {
        color,
        table,
        dropped,
    })
}

/// Cross-validated full-data fit plus the resampled evaluation of one penalty.
#[derive(Debug, Clone)]
pub struct PenalizedAnalysis {
    pub penalty: Penalty,
    pub full_data: CvPath,
    pub resampled: PenalizedReport,
}

#[derive(Debug, Clone)]
pub struct ColorAnalysis {
    pub color: WineColor,
    pub rows: usize,
    pub dropped: usize,
    pub subset_paths: Option<Vec<SubsetPath>>,
    pub resampling: Option<ResamplingReport>,
    pub penalized: Vec<PenalizedAnalysis>,
}

/// Subset paths and resampled errors on principal-component predictors.
#[derive(Debug, Clone)]
pub struct ComponentRegression {
    pub color: WineColor,
    pub subset_paths: Vec<SubsetPath>,
    pub resampling: ResamplingReport,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub colors: Vec<ColorAnalysis>,
    pub structure: Option<StructureSummary>,
    pub component_regression: Option<ComponentRegression>,
}

/// Runs the per-color stages in `stages` on one filtered table.
pub fn run_color(
    loaded: &LoadedTable,
    config: &AnalysisConfig,
    stages: &[Stage],
) -> Result<ColorAnalysis, AnalysisError> {
    let color = loaded.color;
    let table = standardize_table(&loaded.table, config.scale_outcome)?;
    let mut analysis = ColorAnalysis {
        color,
        rows: table.n_rows(),
        dropped: loaded.dropped,
        subset_paths: None,
        resampling: None,
        penalized: Vec::new(),
    };

    if stages.contains(&Stage::Subsets) {
        log::info!("{color} wine: subset selection on the full table");
        analysis.subset_paths = Some(run_all_strategies(&table, None)?);
    }
    if stages.contains(&Stage::Resample) {
        let resampling = config.resampling(Stage::Resample.salt(color, None));
        analysis.resampling = Some(evaluate_subsets(&table, &resampling)?);
    }
    if stages.contains(&Stage::Penalized) {
        let path_config = config.path_config();
        for penalty in Penalty::ALL {
            let salt = Stage::Penalized.salt(color, Some(penalty));
            let mut rng = config.resampling(salt + FULL_DATA_SALT).rng();
            let full_data = cross_validate(
                table.features.view(),
                table.outcome.view(),
                penalty,
                &path_config,
                &mut rng,
            )?;
            log::info!(
                "{color} wine: {penalty} lambda_min {:.4e}, lambda_1se {:.4e}",
                full_data.lambda_min(),
                full_data.lambda_1se()
            );
            let resampled =
                evaluate_penalized(&table, penalty, &config.resampling(salt), &path_config)?;
            analysis.penalized.push(PenalizedAnalysis {
                penalty,
                full_data,
                resampled,
            });
        }
    }
    Ok(analysis)
}

/// PCA of the merged, unscaled red and white predictors.
pub fn run_structure(loaded: &[LoadedTable]) -> Result<StructureSummary, AnalysisError> {
    let parts: Vec<(WineColor, ObservationTable)> = loaded
        .iter()
        .map(|l| (l.color, l.table.clone()))
        .collect();
    let merged = MergedTable::from_colors(&parts)?;
    Ok(analyze_structure(&merged)?)
}

/// Subset selection and resampling with every predictor replaced by its principal
/// component scores.
pub fn run_component_regression(
    loaded: &LoadedTable,
    config: &AnalysisConfig,
) -> Result<ComponentRegression, AnalysisError> {
    let color = loaded.color;
    log::info!("{color} wine: regression on principal components");
    let scaled = standardize_table(&loaded.table, config.scale_outcome)?;
    let components = principal_component_table(&scaled)?;
    let subset_paths = run_all_strategies(&components, None)?;
    let resampling = config.resampling(Stage::ComponentRegression.salt(color, None));
    let resampling = evaluate_subsets(&components, &resampling)?;
    Ok(ComponentRegression {
        color,
        subset_paths,
        resampling,
    })
}

/// Loads both colors and runs the requested stages.
pub fn run_stages(
    inputs: &WineInputs,
    config: &AnalysisConfig,
    stages: &[Stage],
) -> Result<PipelineReport, AnalysisError> {
    config.validate()?;
    let mut loaded = Vec::with_capacity(WineColor::ALL.len());
    for color in WineColor::ALL {
        loaded.push(load_color(color, inputs.path_for(color), config)?);
    }

    let mut report = PipelineReport::default();
    let per_color = stages
        .iter()
        .any(|s| matches!(s, Stage::Subsets | Stage::Resample | Stage::Penalized));
    if per_color {
        for table in &loaded {
            report.colors.push(run_color(table, config, stages)?);
        }
    }
    if stages.contains(&Stage::Structure) {
        report.structure = Some(run_structure(&loaded)?);
    }
    if stages.contains(&Stage::ComponentRegression) {
        if let Some(table) = loaded.iter().find(|l| l.color == config.pcr_color) {
            report.component_regression = Some(run_component_regression(table, config)?);
        }
    }
    Ok(report)
}

/// Every stage, in order.
pub fn run_pipeline(
    inputs: &WineInputs,
    config: &AnalysisConfig,
) -> Result<PipelineReport, AnalysisError> {
    run_stages(inputs, config, &Stage::ALL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_salts_are_distinct() {
        let mut salts = Vec::new();
        for color in WineColor::ALL {
            for stage in Stage::ALL {
                salts.push(stage.salt(color, None));
            }
            for penalty in Penalty::ALL {
                salts.push(Stage::Penalized.salt(color, Some(penalty)));
            }
        }
        let mut unique = salts.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), salts.len());
    }

    #[test]
    fn default_inputs_use_the_public_file_names() {
        let inputs = WineInputs::default();
        assert_eq!(
            inputs.path_for(WineColor::Red),
            Path::new("winequality-red.csv")
        );
        assert_eq!(
            inputs.path_for(WineColor::White),
            Path::new("winequality-white.csv")
        );
    }
}
