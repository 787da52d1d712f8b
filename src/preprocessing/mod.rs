//! Data preprocessing module
//!
//! Provides the feature-engineering building blocks:
//! - Raw data cleaning (normalization, null spellings, fixed-mode imputation)
//! - Ordinal and one-hot category encoding with a persisted vocabulary
//! - Variance-retaining linear dimensionality reduction
//! - Statistical feature selection (chi-square / Cramér's V, Spearman)

mod config;
pub mod cleaning;
pub mod encoder;
pub mod feature_selection;
pub mod pca;

pub use cleaning::{CleaningConfig, CleaningReport, DataCleaner};
pub use config::{FeatureConfig, DEFAULT_NOMINAL_COLUMNS, DEFAULT_ORDINAL_COLUMNS, DEFAULT_TARGET_COLUMN};
pub use encoder::{CategoryCodec, EncodedFrame, NominalVocabulary};
pub use feature_selection::{FeatureScore, FeatureSelector, SelectionReport};
pub use pca::DimensionalityReducer;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed four-level grade scale shared by ordinal columns and the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    Average,
    Good,
    VeryGood,
    Excellent,
}

impl Grade {
    pub const ALL: [Grade; 4] = [Grade::Average, Grade::Good, Grade::VeryGood, Grade::Excellent];

    pub const MIN_CODE: i64 = 0;
    pub const MAX_CODE: i64 = 3;

    pub fn code(self) -> i64 {
        match self {
            Grade::Average => 0,
            Grade::Good => 1,
            Grade::VeryGood => 2,
            Grade::Excellent => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Grade::Average => "AVERAGE",
            Grade::Good => "GOOD",
            Grade::VeryGood => "VG",
            Grade::Excellent => "EXCELLENT",
        }
    }

    pub fn from_code(code: i64) -> Option<Grade> {
        Grade::ALL.into_iter().find(|g| g.code() == code)
    }

    pub fn from_label(label: &str) -> Option<Grade> {
        Grade::ALL.into_iter().find(|g| g.label() == label)
    }

    /// Round half-to-even and clip a raw regressor output onto the scale
    pub fn from_prediction(value: f64) -> Grade {
        let code = clip_prediction(value);
        Grade::from_code(code).unwrap_or(Grade::Average)
    }

    /// `(label, code)` pairs as persisted in the codec artifact
    pub fn scale() -> Vec<(String, i64)> {
        Grade::ALL
            .iter()
            .map(|g| (g.label().to_string(), g.code()))
            .collect()
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Grade::from_label(s).ok_or_else(|| format!("unknown grade '{}'", s))
    }
}

/// Integer prediction in `[0, 3]`; NaN maps to the lowest grade
pub fn clip_prediction(value: f64) -> i64 {
    if value.is_nan() {
        return Grade::MIN_CODE;
    }
    (value.round_ties_even() as i64).clamp(Grade::MIN_CODE, Grade::MAX_CODE)
}
