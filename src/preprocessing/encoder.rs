//! Category encoding: ordinal grade codes and one-hot nominal indicators
//!
//! A fitted [`CategoryCodec`] is the persisted feature contract between the
//! training and inference processes. Its output layout is
//! `[passthrough] + [one-hot, in fit order] + [{ordinal}_encoded, in declaration order]`.

use super::Grade;
use crate::error::{GradecastError, Result};
use crate::utils::data_loader::{self, column_names};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Layout version of the persisted codec
pub const CODEC_SCHEMA_VERSION: u32 = 1;

/// Fit-time levels of one nominal column, sorted lexicographically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NominalVocabulary {
    pub column: String,
    pub levels: Vec<String>,
}

impl NominalVocabulary {
    /// Levels that get an indicator column
    pub fn emitted_levels(&self, drop_first: bool) -> &[String] {
        if drop_first && !self.levels.is_empty() {
            &self.levels[1..]
        } else {
            &self.levels
        }
    }

    pub fn indicator_names(&self, drop_first: bool) -> Vec<String> {
        self.emitted_levels(drop_first)
            .iter()
            .map(|level| format!("{}_{}", self.column, level))
            .collect()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.levels.binary_search_by(|l| l.as_str().cmp(value)).is_ok()
    }
}

/// Dense numeric output of the codec with its column names
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

impl EncodedFrame {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        data_loader::matrix_to_frame(&self.values, &self.columns)
    }

    /// Sub-matrix with the given columns, in the given order
    pub fn select(&self, names: &[String]) -> Result<Array2<f64>> {
        let mut out = Array2::<f64>::zeros((self.n_rows(), names.len()));
        for (j, name) in names.iter().enumerate() {
            let src = self
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| GradecastError::SchemaError(format!("encoded column '{}' missing", name)))?;
            out.column_mut(j).assign(&self.values.column(src));
        }
        Ok(out)
    }
}

/// Fitted ordinal + one-hot encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCodec {
    schema_version: u32,
    drop_first: bool,
    target_column: Option<String>,
    passthrough_columns: Vec<String>,
    nominal_columns: Vec<String>,
    vocabulary: Vec<NominalVocabulary>,
    onehot_columns: Vec<String>,
    ordinal_columns: Vec<String>,
    ordinal_levels: Vec<(String, i64)>,
}

impl CategoryCodec {
    /// Learn the nominal vocabularies and validate ordinal values.
    ///
    /// Every column that is neither declared nor the target is carried through
    /// unchanged and must be numeric.
    pub fn fit(
        df: &DataFrame,
        nominal_columns: &[String],
        ordinal_columns: &[String],
        target_column: Option<&str>,
        drop_first: bool,
    ) -> Result<Self> {
        if df.height() == 0 {
            return Err(GradecastError::SchemaError("cannot fit codec on an empty table".into()));
        }

        let present = column_names(df);
        for col in nominal_columns.iter().chain(ordinal_columns) {
            if !present.contains(col) {
                return Err(GradecastError::SchemaError(format!(
                    "declared column '{}' not found in input",
                    col
                )));
            }
        }

        let passthrough_columns: Vec<String> = present
            .iter()
            .filter(|c| !nominal_columns.contains(c) && !ordinal_columns.contains(c))
            .filter(|c| Some(c.as_str()) != target_column)
            .cloned()
            .collect();
        for col in &passthrough_columns {
            if !data_loader::is_numeric(df, col) {
                return Err(GradecastError::SchemaError(format!(
                    "column '{}' is not declared categorical and is not numeric",
                    col
                )));
            }
        }

        let mut vocabulary = Vec::with_capacity(nominal_columns.len());
        for col in nominal_columns {
            let values = data_loader::required_strings(df, col)?;
            let levels: Vec<String> = values
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if levels.len() == 1 {
                warn!(column = %col, level = %levels[0], "Nominal column is constant");
            }
            debug!(column = %col, levels = levels.len(), "Fitted nominal vocabulary");
            vocabulary.push(NominalVocabulary {
                column: col.clone(),
                levels,
            });
        }

        let ordinal_levels = Grade::scale();
        for col in ordinal_columns {
            for value in data_loader::required_strings(df, col)? {
                if !ordinal_levels.iter().any(|(label, _)| *label == value) {
                    return Err(GradecastError::SchemaError(format!(
                        "ordinal column '{}' contains '{}' outside the grade scale",
                        col, value
                    )));
                }
            }
        }

        let onehot_columns: Vec<String> = vocabulary
            .iter()
            .flat_map(|v| v.indicator_names(drop_first))
            .collect();

        info!(
            nominal = nominal_columns.len(),
            ordinal = ordinal_columns.len(),
            passthrough = passthrough_columns.len(),
            onehot = onehot_columns.len(),
            drop_first,
            "Fitted category codec"
        );

        Ok(Self {
            schema_version: CODEC_SCHEMA_VERSION,
            drop_first,
            target_column: target_column.map(str::to_string),
            passthrough_columns,
            nominal_columns: nominal_columns.to_vec(),
            vocabulary,
            onehot_columns,
            ordinal_columns: ordinal_columns.to_vec(),
            ordinal_levels,
        })
    }

    /// Encode a table that carries every column seen at fit time
    pub fn transform(&self, df: &DataFrame) -> Result<EncodedFrame> {
        let n_rows = df.height();
        let columns = self.output_columns();
        let mut values = Array2::<f64>::zeros((n_rows, columns.len()));
        let mut j = 0;

        for col in &self.passthrough_columns {
            for (i, v) in data_loader::numeric_values(df, col)?.into_iter().enumerate() {
                values[[i, j]] = v;
            }
            j += 1;
        }

        for vocab in &self.vocabulary {
            let raw = data_loader::required_strings(df, &vocab.column)?;
            for indicator in self.encode_nominal(&vocab.column, &raw)? {
                for (i, v) in indicator.into_iter().enumerate() {
                    values[[i, j]] = v;
                }
                j += 1;
            }
        }

        for col in &self.ordinal_columns {
            let raw = data_loader::required_strings(df, col)?;
            for (i, v) in self.encode_ordinal(col, &raw)?.into_iter().enumerate() {
                values[[i, j]] = v;
            }
            j += 1;
        }

        Ok(EncodedFrame { columns, values })
    }

    /// Indicator columns for one nominal column, one `Vec` per emitted level.
    ///
    /// Levels missing from the vocabulary produce all-zero indicators.
    pub fn encode_nominal(&self, column: &str, values: &[String]) -> Result<Vec<Vec<f64>>> {
        let vocab = self
            .vocabulary
            .iter()
            .find(|v| v.column == column)
            .ok_or_else(|| GradecastError::SchemaError(format!("'{}' is not a fitted nominal column", column)))?;

        let emitted = vocab.emitted_levels(self.drop_first);
        let mut out = vec![vec![0.0; values.len()]; emitted.len()];
        let mut unseen: BTreeSet<&str> = BTreeSet::new();

        for (i, value) in values.iter().enumerate() {
            if !vocab.contains(value) {
                unseen.insert(value.as_str());
                continue;
            }
            if let Some(k) = emitted.iter().position(|l| l == value) {
                out[k][i] = 1.0;
            }
        }

        for value in unseen {
            warn!(column = %column, value = %value, "Unseen nominal level encoded as all-zero indicators");
        }
        Ok(out)
    }

    /// Grade codes for one ordinal column; unknown values are fatal
    pub fn encode_ordinal(&self, column: &str, values: &[String]) -> Result<Vec<f64>> {
        values
            .iter()
            .map(|v| self.ordinal_code(column, v).map(|code| code as f64))
            .collect()
    }

    /// Integer codes for a label column on the same scale
    pub fn encode_labels(&self, column: &str, values: &[String]) -> Result<Vec<i64>> {
        values.iter().map(|v| self.ordinal_code(column, v)).collect()
    }

    /// Inverse of [`encode_labels`](Self::encode_labels)
    pub fn decode_label(&self, code: i64) -> Option<&str> {
        self.ordinal_levels
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(label, _)| label.as_str())
    }

    fn ordinal_code(&self, column: &str, value: &str) -> Result<i64> {
        self.ordinal_levels
            .iter()
            .find(|(label, _)| label == value)
            .map(|(_, code)| *code)
            .ok_or_else(|| GradecastError::UnseenCategory {
                column: column.to_string(),
                value: value.to_string(),
            })
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn drop_first(&self) -> bool {
        self.drop_first
    }

    pub fn target_column(&self) -> Option<&str> {
        self.target_column.as_deref()
    }

    pub fn passthrough_columns(&self) -> &[String] {
        &self.passthrough_columns
    }

    pub fn nominal_columns(&self) -> &[String] {
        &self.nominal_columns
    }

    pub fn vocabulary(&self) -> &[NominalVocabulary] {
        &self.vocabulary
    }

    pub fn onehot_columns(&self) -> &[String] {
        &self.onehot_columns
    }

    pub fn ordinal_columns(&self) -> &[String] {
        &self.ordinal_columns
    }

    pub fn encoded_ordinal_columns(&self) -> Vec<String> {
        self.ordinal_columns
            .iter()
            .map(|c| format!("{}_encoded", c))
            .collect()
    }

    /// One-hot then ordinal-encoded columns: the reducer's input layout
    pub fn feature_columns(&self) -> Vec<String> {
        let mut cols = self.onehot_columns.clone();
        cols.extend(self.encoded_ordinal_columns());
        cols
    }

    /// Full output layout including passthrough columns
    pub fn output_columns(&self) -> Vec<String> {
        let mut cols = self.passthrough_columns.clone();
        cols.extend(self.feature_columns());
        cols
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let codec: Self = bincode::deserialize(bytes)?;
        if codec.schema_version != CODEC_SCHEMA_VERSION {
            return Err(GradecastError::SchemaError(format!(
                "codec artifact has schema version {}, expected {}",
                codec.schema_version, CODEC_SCHEMA_VERSION
            )));
        }
        Ok(codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_df() -> DataFrame {
        df! {
            "Caste" => &["GENERAL", "OBC", "GENERAL", "OBC"],
            "medium" => &["ENGLISH", "ASSAMESE", "OTHERS", "ENGLISH"],
            "Class_X_Percentage" => &["EXCELLENT", "GOOD", "VG", "AVERAGE"],
            "age" => &[17.0, 18.0, 17.0, 19.0],
            "Performance" => &["GOOD", "VG", "GOOD", "AVERAGE"],
        }
        .unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn fitted(drop_first: bool) -> CategoryCodec {
        CategoryCodec::fit(
            &sample_df(),
            &strings(&["Caste", "medium"]),
            &strings(&["Class_X_Percentage"]),
            Some("Performance"),
            drop_first,
        )
        .unwrap()
    }

    #[test]
    fn test_vocabulary_sorted_and_first_dropped() {
        let codec = fitted(true);
        assert_eq!(codec.vocabulary()[1].levels, strings(&["ASSAMESE", "ENGLISH", "OTHERS"]));
        assert_eq!(
            codec.onehot_columns(),
            strings(&["Caste_OBC", "medium_ENGLISH", "medium_OTHERS"]).as_slice()
        );
    }

    #[test]
    fn test_output_layout() {
        let codec = fitted(false);
        assert_eq!(
            codec.output_columns(),
            strings(&[
                "age",
                "Caste_GENERAL",
                "Caste_OBC",
                "medium_ASSAMESE",
                "medium_ENGLISH",
                "medium_OTHERS",
                "Class_X_Percentage_encoded",
            ])
        );
    }

    #[test]
    fn test_transform_values() {
        let codec = fitted(true);
        let encoded = codec.transform(&sample_df()).unwrap();
        // age, Caste_OBC, medium_ENGLISH, medium_OTHERS, Class_X_Percentage_encoded
        assert_eq!(encoded.values.row(1).to_vec(), vec![18.0, 1.0, 0.0, 0.0, 1.0]);
        assert_eq!(encoded.values.row(2).to_vec(), vec![17.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_unseen_nominal_level_is_all_zero() {
        let codec = fitted(false);
        let out = codec.encode_nominal("Caste", &strings(&["SC", "OBC"])).unwrap();
        assert_eq!(out, vec![vec![0.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_unseen_ordinal_is_error() {
        let codec = fitted(true);
        let err = codec
            .encode_ordinal("Class_X_Percentage", &strings(&["OUTSTANDING"]))
            .unwrap_err();
        assert!(matches!(err, GradecastError::UnseenCategory { .. }));
    }

    #[test]
    fn test_fit_rejects_ordinal_outside_scale() {
        let df = df! {
            "Class_X_Percentage" => &["EXCELLENT", "TOP"],
        }
        .unwrap();
        let err = CategoryCodec::fit(&df, &[], &strings(&["Class_X_Percentage"]), None, true).unwrap_err();
        assert!(matches!(err, GradecastError::SchemaError(_)));
    }

    #[test]
    fn test_fit_rejects_undeclared_string_column() {
        let df = df! {
            "Caste" => &["GENERAL", "OBC"],
            "notes" => &["x", "y"],
        }
        .unwrap();
        let err = CategoryCodec::fit(&df, &strings(&["Caste"]), &[], None, true).unwrap_err();
        assert!(matches!(err, GradecastError::SchemaError(_)));
    }

    #[test]
    fn test_constant_nominal_column_is_allowed() {
        let df = df! { "coaching" => &["NO", "NO", "NO"] }.unwrap();
        let codec = CategoryCodec::fit(&df, &strings(&["coaching"]), &[], None, true).unwrap();
        assert!(codec.onehot_columns().is_empty());
    }

    #[test]
    fn test_label_codes() {
        let codec = fitted(true);
        let codes = codec
            .encode_labels("Performance", &strings(&["AVERAGE", "GOOD", "VG", "EXCELLENT"]))
            .unwrap();
        assert_eq!(codes, vec![0, 1, 2, 3]);
        for (code, label) in codes.iter().zip(["AVERAGE", "GOOD", "VG", "EXCELLENT"]) {
            assert_eq!(codec.decode_label(*code), Some(label));
        }
    }

    #[test]
    fn test_bytes_round_trip_and_version_check() {
        let codec = fitted(true);
        let restored = CategoryCodec::from_bytes(&codec.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, codec);

        let mut stale = codec.clone();
        stale.schema_version = 0;
        let err = CategoryCodec::from_bytes(&stale.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, GradecastError::SchemaError(_)));
    }
}
