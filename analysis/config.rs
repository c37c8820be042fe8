use crate::data::{OutlierFilter, WineColor};
use crate::regress::{PathConfig, ResamplingConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write the configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Run-wide settings. Every field has a default, so an empty TOML document is a
/// complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Field separator of the input files.
    pub delimiter: char,
    /// Number of random half/half splits per resampled evaluation.
    pub trials: usize,
    /// Fixes every random draw when set.
    pub seed: Option<u64>,
    /// Standardize the outcome together with the predictors.
    pub scale_outcome: bool,
    pub cv_folds: usize,
    pub n_lambda: usize,
    /// Color whose predictors are replaced by principal components for the
    /// component-regression run.
    pub pcr_color: WineColor,
    pub red_filters: Vec<OutlierFilter>,
    pub white_filters: Vec<OutlierFilter>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            delimiter: ';',
            trials: 30,
            seed: None,
            scale_outcome: true,
            cv_folds: 10,
            n_lambda: 100,
            pcr_color: WineColor::Red,
            red_filters: OutlierFilter::defaults_for(WineColor::Red),
            white_filters: OutlierFilter::defaults_for(WineColor::White),
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trials == 0 {
            return Err(ConfigError::InvalidValue {
                field: "trials",
                reason: "at least one trial is required".into(),
            });
        }
        if self.cv_folds < 2 {
            return Err(ConfigError::InvalidValue {
                field: "cv_folds",
                reason: format!("cross-validation needs at least 2 folds, got {}", self.cv_folds),
            });
        }
        if self.n_lambda == 0 {
            return Err(ConfigError::InvalidValue {
                field: "n_lambda",
                reason: "the penalty grid needs at least one value".into(),
            });
        }
        if self.delimiter == '"' || self.delimiter == '\n' || self.delimiter == '\r' {
            return Err(ConfigError::InvalidValue {
                field: "delimiter",
                reason: format!("{:?} cannot separate fields", self.delimiter),
            });
        }
        for filter in self.red_filters.iter().chain(&self.white_filters) {
            if !filter.max.is_finite() {
                return Err(ConfigError::InvalidValue {
                    field: "filters",
                    reason: format!("threshold for '{}' is not finite", filter.column),
                });
            }
        }
        Ok(())
    }

    pub fn filters_for(&self, color: WineColor) -> &[OutlierFilter] {
        match color {
            WineColor::Red => &self.red_filters,
            WineColor::White => &self.white_filters,
        }
    }

    /// Resampling settings for one stage. With a fixed seed each `salt` yields its own
    /// reproducible stream.
    pub fn resampling(&self, salt: u64) -> ResamplingConfig {
        ResamplingConfig {
            trials: self.trials,
            seed: self.seed.map(|s| s.wrapping_add(salt)),
        }
    }

    pub fn path_config(&self) -> PathConfig {
        PathConfig {
            n_lambda: self.n_lambda,
            n_folds: self.cv_folds,
            ..PathConfig::default()
        }
    }
}
