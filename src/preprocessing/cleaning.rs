//! Raw data cleaning
//!
//! String columns are trimmed and upper-cased, null spellings become real
//! nulls, rows without a label are dropped, and remaining nulls are filled
//! with fixed per-column values.
//!
//! [`CleaningConfig::baseline`] keeps only the structural steps (case, trim,
//! null spellings, renames) so the output preserves the raw distribution for
//! drift comparison.

use super::config::{DEFAULT_ORDINAL_COLUMNS, DEFAULT_TARGET_COLUMN};
use crate::error::Result;
use crate::utils::data_loader::{self, column_names, has_column};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningConfig {
    pub target_column: String,
    /// Spellings (after trim + upper-case) treated as null
    pub null_values: Vec<String>,
    pub drop_columns: Vec<String>,
    /// `(from, to)` column renames
    pub renames: Vec<(String, String)>,
    pub ordinal_columns: Vec<String>,
    pub ordinal_fill: String,
    /// `(column, value)` fills for nominal columns
    pub fill_values: Vec<(String, String)>,
    /// Drop rows whose target is null
    pub drop_unlabeled: bool,
    /// Apply `ordinal_fill` and `fill_values`
    pub impute: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        let pairs = |items: &[(&str, &str)]| -> Vec<(String, String)> {
            items.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
        };
        Self {
            target_column: DEFAULT_TARGET_COLUMN.to_string(),
            null_values: ["NAN", "NULL", "NONE", ""].iter().map(|s| s.to_string()).collect(),
            drop_columns: vec!["mixed_type_col".to_string()],
            renames: pairs(&[("Class_ X_Percentage", "Class_X_Percentage")]),
            ordinal_columns: DEFAULT_ORDINAL_COLUMNS.iter().map(|s| s.to_string()).collect(),
            ordinal_fill: "EXCELLENT".to_string(),
            fill_values: pairs(&[
                ("Gender", "MISSING"),
                ("Caste", "GENERAL"),
                ("coaching", "WA"),
                ("time", "TWO"),
                ("Class_ten_education", "SEBA"),
                ("twelve_education", "AHSEC"),
                ("medium", "ENGLISH"),
                ("Father_occupation", "OTHERS"),
                ("Mother_occupation", "HOUSE_WIFE"),
            ]),
            drop_unlabeled: true,
            impute: true,
        }
    }
}

impl CleaningConfig {
    /// Structural cleaning only: no row drops, no column drops, no imputation
    pub fn baseline() -> Self {
        Self {
            drop_columns: Vec::new(),
            drop_unlabeled: false,
            impute: false,
            ..Self::default()
        }
    }
}

/// Summary of one cleaning pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub remaining_nulls: usize,
    /// Per-column null counts of the output
    pub null_counts: BTreeMap<String, usize>,
}

pub struct DataCleaner {
    config: CleaningConfig,
}

impl Default for DataCleaner {
    fn default() -> Self {
        Self::new(CleaningConfig::default())
    }
}

impl DataCleaner {
    pub fn new(config: CleaningConfig) -> Self {
        Self { config }
    }

    pub fn clean(&self, df: DataFrame) -> Result<(DataFrame, CleaningReport)> {
        let rows_in = df.height();
        let mut df = self.normalize_strings(df)?;

        if !self.config.drop_unlabeled {
            debug!("Unlabeled rows kept");
        } else if has_column(&df, &self.config.target_column) {
            let keep: BooleanChunked = data_loader::optional_strings(&df, &self.config.target_column)?
                .iter()
                .map(|v| v.is_some())
                .collect();
            df = df.filter(&keep)?;
        } else {
            warn!(column = %self.config.target_column, "Target column missing; no rows dropped");
        }

        for col in &self.config.drop_columns {
            if has_column(&df, col) {
                df = df.drop(col)?;
            }
        }

        for (from, to) in &self.config.renames {
            if has_column(&df, from) {
                df.rename(from, to.as_str().into())?;
            }
        }

        if self.config.impute {
            for col in &self.config.ordinal_columns {
                self.fill_nulls(&mut df, col, &self.config.ordinal_fill)?;
            }
            for (col, value) in &self.config.fill_values {
                self.fill_nulls(&mut df, col, value)?;
            }
        }

        let null_counts: BTreeMap<String, usize> = df
            .get_columns()
            .iter()
            .map(|c| (c.name().to_string(), c.null_count()))
            .collect();
        let remaining_nulls: usize = null_counts.values().sum();
        if self.config.impute && remaining_nulls > 0 {
            warn!(remaining_nulls, "Nulls remain after cleaning");
        }
        for (column, nulls) in null_counts.iter().filter(|(_, n)| **n > 0) {
            info!(column = %column, nulls, "Null summary");
        }

        let report = CleaningReport {
            rows_in,
            rows_out: df.height(),
            remaining_nulls,
            null_counts,
        };
        info!(rows_in, rows_out = report.rows_out, "Data cleaned");
        Ok((df, report))
    }

    fn normalize_strings(&self, mut df: DataFrame) -> Result<DataFrame> {
        for col in column_names(&df) {
            let is_string = matches!(df.column(&col)?.dtype(), DataType::String);
            if !is_string {
                continue;
            }
            let values: Vec<Option<String>> = data_loader::optional_strings(&df, &col)?
                .into_iter()
                .map(|v| {
                    v.map(|s| s.trim().to_uppercase())
                        .filter(|s| !self.config.null_values.contains(s))
                })
                .collect();
            data_loader::put_strings(&mut df, &col, values)?;
        }
        Ok(df)
    }

    fn fill_nulls(&self, df: &mut DataFrame, col: &str, value: &str) -> Result<()> {
        if !has_column(df, col) {
            return Ok(());
        }
        let values = data_loader::optional_strings(df, col)?;
        let filled = values.iter().filter(|v| v.is_none()).count();
        if filled == 0 {
            return Ok(());
        }
        let values = values
            .into_iter()
            .map(|v| Some(v.unwrap_or_else(|| value.to_string())))
            .collect();
        data_loader::put_strings(df, col, values)?;
        info!(column = %col, filled, value = %value, "Filled nulls");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_df() -> DataFrame {
        df! {
            "Performance" => &[Some(" good "), Some("vg"), None, Some("nan")],
            "Gender" => &[Some("male"), None, Some("female"), Some("male")],
            "Caste" => &[Some("obc "), Some("NULL"), Some("sc"), Some("general")],
            "Class_ X_Percentage" => &[Some("excellent"), None, Some("vg"), Some("good")],
            "mixed_type_col" => &[Some("1"), Some("a"), Some("2"), Some("b")],
        }
        .unwrap()
    }

    #[test]
    fn test_clean_pipeline() {
        let (df, report) = DataCleaner::default().clean(raw_df()).unwrap();

        assert_eq!(report.rows_in, 4);
        assert_eq!(report.rows_out, 2);
        assert_eq!(report.remaining_nulls, 0);
        assert!(!has_column(&df, "mixed_type_col"));
        assert!(has_column(&df, "Class_X_Percentage"));

        let perf = data_loader::required_strings(&df, "Performance").unwrap();
        assert_eq!(perf, vec!["GOOD", "VG"]);
        let gender = data_loader::required_strings(&df, "Gender").unwrap();
        assert_eq!(gender, vec!["MALE", "MISSING"]);
        let caste = data_loader::required_strings(&df, "Caste").unwrap();
        assert_eq!(caste, vec!["OBC", "GENERAL"]);
        let class_x = data_loader::required_strings(&df, "Class_X_Percentage").unwrap();
        assert_eq!(class_x, vec!["EXCELLENT", "EXCELLENT"]);
    }

    #[test]
    fn test_baseline_keeps_rows_and_nulls() {
        let (df, report) = DataCleaner::new(CleaningConfig::baseline()).clean(raw_df()).unwrap();

        assert_eq!(report.rows_in, 4);
        assert_eq!(report.rows_out, 4);
        assert!(has_column(&df, "mixed_type_col"));
        assert!(has_column(&df, "Class_X_Percentage"));
        assert!(!has_column(&df, "Class_ X_Percentage"));

        let perf = data_loader::optional_strings(&df, "Performance").unwrap();
        assert_eq!(perf, vec![Some("GOOD".to_string()), Some("VG".to_string()), None, None]);
        assert_eq!(report.null_counts["Performance"], 2);
        assert_eq!(report.null_counts["Gender"], 1);
        assert_eq!(report.null_counts["Caste"], 1);
        assert_eq!(report.null_counts["mixed_type_col"], 0);
        assert_eq!(report.remaining_nulls, 5);
    }

    #[test]
    fn test_numeric_columns_untouched() {
        let df = df! {
            "Performance" => &["GOOD", "VG"],
            "age" => &[17i64, 18],
        }
        .unwrap();
        let (cleaned, _) = DataCleaner::default().clean(df).unwrap();
        assert_eq!(data_loader::numeric_values(&cleaned, "age").unwrap(), vec![17.0, 18.0]);
    }
}
