//! Inference-time feature replay
//!
//! Loads the persisted codec and reducer and rebuilds the exact training
//! column layout for incoming rows. The persisted schema is authoritative:
//! missing expected columns are zero-filled, extra columns are dropped, and
//! the reducer's fit-time feature count is enforced before projection.

use super::artifacts::{self, ArtifactPaths};
use crate::error::{GradecastError, Result};
use crate::preprocessing::{CategoryCodec, DimensionalityReducer};
use crate::utils::data_loader::{self, column_names, has_column};
use ndarray::{Array1, Array2};
use polars::prelude::DataFrame;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Replays the fitted feature contract without refitting
#[derive(Debug, Clone)]
pub struct InferenceFeaturePipeline {
    codec: CategoryCodec,
    reducer: DimensionalityReducer,
    nominal_columns: Vec<String>,
    onehot_columns: Vec<String>,
}

impl InferenceFeaturePipeline {
    /// Load both artifacts; either one missing is `ArtifactNotFound`
    pub fn load(paths: &ArtifactPaths) -> Result<Self> {
        let codec = artifacts::load_codec(&paths.encoder)?;
        let reducer = artifacts::load_reducer(&paths.reducer)?;
        Ok(Self::from_parts(codec, reducer))
    }

    pub fn from_parts(codec: CategoryCodec, reducer: DimensionalityReducer) -> Self {
        let nominal_columns = codec.vocabulary().iter().map(|v| v.column.clone()).collect();
        let onehot_columns = codec.onehot_columns().to_vec();
        Self {
            codec,
            reducer,
            nominal_columns,
            onehot_columns,
        }
    }

    pub fn codec(&self) -> &CategoryCodec {
        &self.codec
    }

    pub fn reducer(&self) -> &DimensionalityReducer {
        &self.reducer
    }

    /// Nominal columns the codec was fit on
    pub fn expected_nominal_columns(&self) -> &[String] {
        &self.nominal_columns
    }

    /// One-hot output columns, in persisted order
    pub fn expected_onehot_columns(&self) -> &[String] {
        &self.onehot_columns
    }

    /// Transform a table. With `apply_reduction` the output is `PC1..PCk`,
    /// otherwise the codec's full output layout. A target column present in
    /// the input is reattached at the end as integer codes.
    pub fn transform(&self, df: &DataFrame, apply_reduction: bool) -> Result<DataFrame> {
        let target = self
            .codec
            .target_column()
            .filter(|t| has_column(df, t))
            .map(|t| -> Result<(String, Vec<String>)> {
                Ok((t.to_string(), data_loader::required_strings(df, t)?))
            })
            .transpose()?;

        let (columns, values) = self.feature_matrix(df, apply_reduction)?;
        let mut out = data_loader::matrix_to_frame(&values, &columns)?;

        if let Some((name, labels)) = target {
            let codes = self.codec.encode_labels(&name, &labels)?;
            data_loader::put_integers(&mut out, &name, codes)?;
        }
        Ok(out)
    }

    /// Single-record entry point used when serving
    pub fn transform_record(&self, record: &BTreeMap<String, String>) -> Result<Array1<f64>> {
        let df = data_loader::record_to_frame(record)?;
        if df.height() != 1 {
            return Err(GradecastError::DataError(format!(
                "a record must produce exactly one row, got {}",
                df.height()
            )));
        }
        let (_, values) = self.feature_matrix(&df, true)?;
        Ok(values.row(0).to_owned())
    }

    /// Encoded, reconciled and optionally projected features with their names
    pub fn feature_matrix(&self, df: &DataFrame, apply_reduction: bool) -> Result<(Vec<String>, Array2<f64>)> {
        let n_rows = df.height();
        let mut produced = self.encode_present(df)?;

        let expected = if apply_reduction {
            self.codec.feature_columns()
        } else {
            self.codec.output_columns()
        };

        let mut matrix = Array2::<f64>::zeros((n_rows, expected.len()));
        for (j, name) in expected.iter().enumerate() {
            match produced.remove(name) {
                Some(values) => {
                    for (i, v) in values.into_iter().enumerate() {
                        matrix[[i, j]] = v;
                    }
                }
                None => warn!(column = %name, "Expected feature missing; filled with 0.0"),
            }
        }
        for name in produced.keys() {
            debug!(column = %name, "Encoded column outside the requested layout dropped");
        }

        if !apply_reduction {
            return Ok((expected, matrix));
        }

        if matrix.ncols() != self.reducer.n_features_in() {
            return Err(GradecastError::ShapeMismatch {
                expected: self.reducer.n_features_in(),
                actual: matrix.ncols(),
                expected_columns: self.reducer.feature_names_in().to_vec(),
            });
        }
        if expected.as_slice() != self.reducer.feature_names_in() {
            return Err(GradecastError::SchemaError(format!(
                "codec layout [{}] differs from reducer fit columns [{}]",
                expected.join(", "),
                self.reducer.feature_names_in().join(", ")
            )));
        }

        let projected = self.reducer.transform(&matrix)?;
        Ok((self.reducer.component_names(), projected))
    }

    /// Encode every input column the codec knows; warn about the rest
    fn encode_present(&self, df: &DataFrame) -> Result<BTreeMap<String, Vec<f64>>> {
        let mut produced = BTreeMap::new();
        let mut known: HashSet<&str> = HashSet::new();

        for col in self.codec.passthrough_columns() {
            known.insert(col.as_str());
            if has_column(df, col) {
                produced.insert(col.clone(), passthrough_values(df, col)?);
            }
        }

        for col in &self.nominal_columns {
            known.insert(col.as_str());
            if !has_column(df, col) {
                warn!(column = %col, "Nominal input column missing; its indicators are zero-filled");
                continue;
            }
            let raw = data_loader::required_strings(df, col)?;
            let indicators = self.codec.encode_nominal(col, &raw)?;
            let vocab = self
                .codec
                .vocabulary()
                .iter()
                .find(|v| &v.column == col)
                .ok_or_else(|| GradecastError::SchemaError(format!("no vocabulary for '{}'", col)))?;
            for (name, values) in vocab.indicator_names(self.codec.drop_first()).into_iter().zip(indicators) {
                produced.insert(name, values);
            }
        }

        for col in self.codec.ordinal_columns() {
            known.insert(col.as_str());
            if !has_column(df, col) {
                continue;
            }
            let raw = data_loader::required_strings(df, col)?;
            produced.insert(format!("{}_encoded", col), self.codec.encode_ordinal(col, &raw)?);
        }

        if let Some(target) = self.codec.target_column() {
            known.insert(target);
        }
        for col in column_names(df) {
            if !known.contains(col.as_str()) {
                warn!(column = %col, "Unexpected input column dropped");
            }
        }
        Ok(produced)
    }
}

/// Numeric values of a passthrough column; string records are parsed
fn passthrough_values(df: &DataFrame, col: &str) -> Result<Vec<f64>> {
    if data_loader::is_numeric(df, col) {
        return data_loader::numeric_values(df, col);
    }
    data_loader::required_strings(df, col)?
        .iter()
        .map(|s| {
            s.trim().parse::<f64>().map_err(|_| {
                GradecastError::DataError(format!("column '{}' value '{}' is not numeric", col, s))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn training_df() -> DataFrame {
        df! {
            "Caste" => &["GENERAL", "OBC", "GENERAL", "OBC", "GENERAL", "OBC"],
            "medium" => &["ENGLISH", "ASSAMESE", "ASSAMESE", "ENGLISH", "ENGLISH", "ASSAMESE"],
            "Class_X_Percentage" => &["EXCELLENT", "GOOD", "VG", "AVERAGE", "VG", "GOOD"],
            "Performance" => &["VG", "GOOD", "VG", "AVERAGE", "EXCELLENT", "GOOD"],
        }
        .unwrap()
    }

    fn fitted() -> InferenceFeaturePipeline {
        let df = training_df();
        let codec = CategoryCodec::fit(
            &df,
            &strings(&["Caste", "medium"]),
            &strings(&["Class_X_Percentage"]),
            Some("Performance"),
            false,
        )
        .unwrap();
        let features = codec.feature_columns();
        let matrix = codec.transform(&df).unwrap().select(&features).unwrap();
        let reducer = DimensionalityReducer::fit(&matrix, &features, 0.95, 42).unwrap();
        InferenceFeaturePipeline::from_parts(codec, reducer)
    }

    #[test]
    fn test_expected_columns_come_from_vocabulary() {
        let pipeline = fitted();
        assert_eq!(pipeline.expected_nominal_columns(), strings(&["Caste", "medium"]).as_slice());
        assert_eq!(
            pipeline.expected_onehot_columns(),
            strings(&["Caste_GENERAL", "Caste_OBC", "medium_ASSAMESE", "medium_ENGLISH"]).as_slice()
        );
    }

    #[test]
    fn test_missing_nominal_zero_filled_and_extra_dropped() {
        let pipeline = fitted();
        let df = df! {
            "Caste" => &["OBC"],
            "Class_X_Percentage" => &["VG"],
            "Gender" => &["MALE"],
        }
        .unwrap();
        let (columns, values) = pipeline.feature_matrix(&df, false).unwrap();
        assert_eq!(columns.len(), 5);
        assert_eq!(values.row(0).to_vec(), vec![0.0, 1.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_target_reattached_as_codes() {
        let pipeline = fitted();
        let out = pipeline.transform(&training_df(), true).unwrap();
        let names = column_names(&out);
        assert_eq!(names.last().map(String::as_str), Some("Performance"));
        assert!(names[0].starts_with("PC"));
        let codes = data_loader::numeric_values(&out, "Performance").unwrap();
        assert_eq!(codes, vec![2.0, 1.0, 2.0, 0.0, 3.0, 1.0]);
    }

    #[test]
    fn test_record_matches_table_transform() {
        let pipeline = fitted();
        let table = pipeline.feature_matrix(&training_df(), true).unwrap().1;

        let mut record = BTreeMap::new();
        record.insert("Caste".to_string(), "OBC".to_string());
        record.insert("medium".to_string(), "ASSAMESE".to_string());
        record.insert("Class_X_Percentage".to_string(), "GOOD".to_string());
        let row = pipeline.transform_record(&record).unwrap();

        for (a, b) in row.iter().zip(table.row(1)) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_empty_record_is_data_error() {
        let pipeline = fitted();
        let err = pipeline.transform_record(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, GradecastError::DataError(_)));
    }

    #[test]
    fn test_codec_and_reducer_disagree_on_width() {
        let df = training_df();
        let without_medium = df.drop("medium").unwrap();
        let codec_a = CategoryCodec::fit(
            &without_medium,
            &strings(&["Caste"]),
            &strings(&["Class_X_Percentage"]),
            Some("Performance"),
            false,
        )
        .unwrap();
        let codec_b = CategoryCodec::fit(
            &df,
            &strings(&["Caste", "medium"]),
            &strings(&["Class_X_Percentage"]),
            Some("Performance"),
            false,
        )
        .unwrap();
        let features_b = codec_b.feature_columns();
        let matrix_b = codec_b.transform(&df).unwrap().select(&features_b).unwrap();
        let reducer_b = DimensionalityReducer::fit(&matrix_b, &features_b, 0.95, 42).unwrap();

        let pipeline = InferenceFeaturePipeline::from_parts(codec_a, reducer_b);
        let err = pipeline.feature_matrix(&df, true).unwrap_err();
        assert!(matches!(err, GradecastError::ShapeMismatch { expected: 5, actual: 3, .. }));
        assert!(err.to_string().contains("expected 5, got 3"));
    }

    #[test]
    fn test_unseen_ordinal_raises() {
        let pipeline = fitted();
        let df = df! {
            "Caste" => &["OBC"],
            "medium" => &["ENGLISH"],
            "Class_X_Percentage" => &["DISTINCTION"],
        }
        .unwrap();
        assert!(matches!(
            pipeline.feature_matrix(&df, true),
            Err(GradecastError::UnseenCategory { .. })
        ));
    }
}
