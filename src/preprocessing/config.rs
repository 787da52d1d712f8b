//! Feature pipeline configuration

use crate::error::{GradecastError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_NOMINAL_COLUMNS: [&str; 9] = [
    "Gender",
    "Caste",
    "coaching",
    "time",
    "Class_ten_education",
    "twelve_education",
    "medium",
    "Father_occupation",
    "Mother_occupation",
];

pub const DEFAULT_ORDINAL_COLUMNS: [&str; 2] = ["Class_X_Percentage", "Class_XII_Percentage"];

pub const DEFAULT_TARGET_COLUMN: &str = "Performance";

/// Configuration for the training feature pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Declared nominal (unordered) columns
    pub nominal_columns: Vec<String>,

    /// Declared ordinal columns on the grade scale
    pub ordinal_columns: Vec<String>,

    pub target_column: String,

    /// Run the statistical selection gate; when off every declared column survives
    pub feature_selection: bool,

    /// Run the category codec; when off the pipeline stops at `Selected`
    pub apply_encoding: bool,

    /// Run the reducer; when off the pipeline stops at `Encoded`
    pub apply_reduction: bool,

    /// Drop the first vocabulary level of each nominal column
    pub drop_first: bool,

    /// Minimum cumulative explained-variance ratio retained by the reducer
    pub variance_threshold: f64,

    /// Significance level for both selection tests
    pub alpha: f64,

    /// Minimum Cramér's V for nominal columns
    pub min_cramers_v: f64,

    /// Minimum absolute Spearman correlation for ordinal columns
    pub min_correlation: f64,

    /// Most-frequent-value share at which a column is reported as dominated
    pub dominance_threshold: f64,

    /// Seed for the reducer's power iteration
    pub random_state: u64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            nominal_columns: DEFAULT_NOMINAL_COLUMNS.iter().map(|s| s.to_string()).collect(),
            ordinal_columns: DEFAULT_ORDINAL_COLUMNS.iter().map(|s| s.to_string()).collect(),
            target_column: DEFAULT_TARGET_COLUMN.to_string(),
            feature_selection: true,
            apply_encoding: true,
            apply_reduction: true,
            drop_first: true,
            variance_threshold: 0.95,
            alpha: 0.05,
            min_cramers_v: 0.1,
            min_correlation: 0.1,
            dominance_threshold: 0.85,
            random_state: 42,
        }
    }
}

impl FeatureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nominal_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.nominal_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ordinal_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.ordinal_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_column = target.into();
        self
    }

    pub fn with_feature_selection(mut self, enabled: bool) -> Self {
        self.feature_selection = enabled;
        self
    }

    pub fn with_encoding(mut self, enabled: bool) -> Self {
        self.apply_encoding = enabled;
        self
    }

    pub fn with_reduction(mut self, enabled: bool) -> Self {
        self.apply_reduction = enabled;
        self
    }

    pub fn with_drop_first(mut self, drop_first: bool) -> Self {
        self.drop_first = drop_first;
        self
    }

    pub fn with_variance_threshold(mut self, threshold: f64) -> Self {
        self.variance_threshold = threshold;
        self
    }

    /// Selection thresholds: significance level, Cramér's V and |rho|
    pub fn with_selection_thresholds(mut self, alpha: f64, min_cramers_v: f64, min_correlation: f64) -> Self {
        self.alpha = alpha;
        self.min_cramers_v = min_cramers_v;
        self.min_correlation = min_correlation;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.variance_threshold > 0.0 && self.variance_threshold <= 1.0) {
            return Err(GradecastError::invalid_parameter(
                "variance_threshold",
                self.variance_threshold,
                "must be in (0, 1]",
            ));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(GradecastError::invalid_parameter("alpha", self.alpha, "must be in (0, 1)"));
        }
        if self.target_column.is_empty() {
            return Err(GradecastError::ConfigError("target column must not be empty".into()));
        }
        if let Some(dup) = self.nominal_columns.iter().find(|c| self.ordinal_columns.contains(c)) {
            return Err(GradecastError::ConfigError(format!(
                "column '{}' is declared both nominal and ordinal",
                dup
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FeatureConfig::default();
        assert_eq!(config.nominal_columns.len(), 9);
        assert_eq!(config.ordinal_columns.len(), 2);
        assert!(config.drop_first);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = FeatureConfig::new()
            .with_nominal_columns(["Caste"])
            .with_ordinal_columns(Vec::<String>::new())
            .with_variance_threshold(0.9)
            .with_reduction(false);
        assert_eq!(config.nominal_columns, vec!["Caste"]);
        assert!(config.ordinal_columns.is_empty());
        assert!(!config.apply_reduction);
        assert_eq!(config.variance_threshold, 0.9);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let config = FeatureConfig::new().with_variance_threshold(1.5);
        assert!(matches!(
            config.validate(),
            Err(GradecastError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_rejects_overlapping_declarations() {
        let config = FeatureConfig::new()
            .with_nominal_columns(["Caste"])
            .with_ordinal_columns(["Caste"]);
        assert!(matches!(config.validate(), Err(GradecastError::ConfigError(_))));
    }
}
