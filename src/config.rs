//! Training configuration loaded from `config/training.yaml`

use crate::error::{GradecastError, Result};
use crate::preprocessing::{FeatureConfig, DEFAULT_TARGET_COLUMN};
use crate::training::{HyperParameters, ModelFamily, ModelMetrics};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/training.yaml";
pub const DEFAULT_EXPERIMENT_NAME: &str = "mlflow-student-performance-experiment";

/// File-system locations used by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_data: PathBuf,
    pub interim_data: PathBuf,
    pub processed_data: PathBuf,
    pub mlflow_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_data: PathBuf::from("data/raw/student_performance.csv"),
            interim_data: PathBuf::from("data/interim/student_performance_clean.csv"),
            processed_data: PathBuf::from("data/processed/student_performance_features.csv"),
            mlflow_dir: PathBuf::from("mlruns"),
            models_dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningStep {
    /// Re-run even when the output already exists
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesStep {
    pub variance_threshold: f64,
    pub force: bool,
    pub drop_first: bool,
}

impl Default for FeaturesStep {
    fn default() -> Self {
        Self {
            variance_threshold: 0.95,
            force: false,
            drop_first: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cleaning: CleaningStep,
    pub features: FeaturesStep,
}

/// Which candidate families to train
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    All,
    Lightgbm,
    Xgboost,
    Catboost,
}

impl ModelChoice {
    /// Families to train, in training order
    pub fn families(self) -> Vec<ModelFamily> {
        match self {
            ModelChoice::All => ModelFamily::ALL.to_vec(),
            ModelChoice::Lightgbm => vec![ModelFamily::LightGBM],
            ModelChoice::Xgboost => vec![ModelFamily::XGBoost],
            ModelChoice::Catboost => vec![ModelFamily::CatBoost],
        }
    }
}

impl std::str::FromStr for ModelChoice {
    type Err = GradecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(ModelChoice::All),
            "lightgbm" => Ok(ModelChoice::Lightgbm),
            "xgboost" => Ok(ModelChoice::Xgboost),
            "catboost" => Ok(ModelChoice::Catboost),
            other => Err(GradecastError::invalid_parameter(
                "model",
                other,
                "expected all, lightgbm, xgboost or catboost",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTrainingConfig {
    pub target_column: String,
    pub test_size: f64,
    pub random_state: u64,
    pub model: ModelChoice,
    pub experiment_name: String,
    pub hyperparameters: HyperParameters,
    /// Selection metric, `qwk` (maximized) or `rmse` (minimized)
    pub metric: String,
}

impl Default for ModelTrainingConfig {
    fn default() -> Self {
        Self {
            target_column: DEFAULT_TARGET_COLUMN.to_string(),
            test_size: 0.2,
            random_state: 42,
            model: ModelChoice::All,
            experiment_name: DEFAULT_EXPERIMENT_NAME.to_string(),
            hyperparameters: HyperParameters::default(),
            metric: ModelMetrics::QWK.to_string(),
        }
    }
}

impl ModelTrainingConfig {
    /// Larger is better for kappa, smaller for error metrics
    pub fn maximize(&self) -> bool {
        self.metric != ModelMetrics::RMSE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level settings for `gradecast run`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub paths: PathsConfig,
    pub pipeline: PipelineConfig,
    pub model_training: ModelTrainingConfig,
    pub logging: LoggingConfig,
}

impl TrainingSettings {
    /// Read and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GradecastError::ConfigError(format!(
                "configuration file not found at path: {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let settings: TrainingSettings = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.pipeline.features.variance_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(GradecastError::ConfigError(format!(
                "pipeline.features.variance_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        let test_size = self.model_training.test_size;
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(GradecastError::ConfigError(format!(
                "model_training.test_size must be in (0, 1), got {}",
                test_size
            )));
        }
        let metric = self.model_training.metric.as_str();
        if metric != ModelMetrics::QWK && metric != ModelMetrics::RMSE {
            return Err(GradecastError::ConfigError(format!(
                "model_training.metric must be '{}' or '{}', got '{}'",
                ModelMetrics::QWK,
                ModelMetrics::RMSE,
                metric
            )));
        }
        if self.model_training.experiment_name.trim().is_empty() {
            return Err(GradecastError::ConfigError(
                "model_training.experiment_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Feature pipeline settings derived from this file
    pub fn feature_config(&self) -> FeatureConfig {
        FeatureConfig::default()
            .with_target(&self.model_training.target_column)
            .with_variance_threshold(self.pipeline.features.variance_threshold)
            .with_drop_first(self.pipeline.features.drop_first)
    }

    /// `RUST_LOG`-style filter for the configured level
    pub fn log_filter(&self) -> String {
        format!("gradecast={}", self.logging.level.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = TrainingSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.model_training.experiment_name, DEFAULT_EXPERIMENT_NAME);
        assert_eq!(settings.paths.models_dir, PathBuf::from("models"));
        assert!(settings.model_training.maximize());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
paths:
  raw_data: data/raw/students.csv
pipeline:
  features:
    variance_threshold: 0.9
model_training:
  model: xgboost
  metric: rmse
  hyperparameters:
    xgboost:
      max_depth: 4
logging:
  level: DEBUG
"#;
        let settings = TrainingSettings::from_yaml(yaml).unwrap();
        assert_eq!(settings.paths.raw_data, PathBuf::from("data/raw/students.csv"));
        assert_eq!(settings.paths.mlflow_dir, PathBuf::from("mlruns"));
        assert_eq!(settings.model_training.model, ModelChoice::Xgboost);
        assert_eq!(settings.model_training.hyperparameters.xgboost.max_depth, 4);
        assert!(!settings.model_training.maximize());
        assert_eq!(settings.log_filter(), "gradecast=debug");
        assert_eq!(settings.feature_config().variance_threshold, 0.9);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(TrainingSettings::from_yaml("pipeline:\n  features:\n    variance_threshold: 1.5\n").is_err());
        assert!(TrainingSettings::from_yaml("model_training:\n  test_size: 1.0\n").is_err());
        assert!(TrainingSettings::from_yaml("model_training:\n  metric: f1\n").is_err());
        assert!(TrainingSettings::from_yaml("model_training:\n  model: forest\n").is_err());
    }

    #[test]
    fn test_model_choice_families() {
        assert_eq!(ModelChoice::All.families().len(), 3);
        assert_eq!("catboost".parse::<ModelChoice>().unwrap().families(), vec![ModelFamily::CatBoost]);
    }

    #[test]
    fn test_missing_file() {
        let err = TrainingSettings::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, GradecastError::ConfigError(_)));
    }
}
