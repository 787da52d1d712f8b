//! Training-time feature pipeline
//!
//! `Loaded -> Selected -> Encoded -> Reduced -> Saved`. Each stage consumes
//! the previous state and returns a new one. Disabling encoding or reduction
//! freezes the pipeline at an earlier terminal state. Nothing touches the
//! filesystem until [`TrainingFeaturePipeline::save`].

use super::artifacts::{remove_stale_artifact, write_atomic, ArtifactPaths};
use crate::error::{GradecastError, Result};
use crate::preprocessing::{
    CategoryCodec, DimensionalityReducer, EncodedFrame, FeatureConfig, FeatureSelector, SelectionReport,
};
use crate::utils::data_loader::{self, column_names, has_column, DataSaver};
use crate::utils::Timer;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Loaded,
    Selected,
    Encoded,
    Reduced,
    Saved,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loaded => "loaded",
            Stage::Selected => "selected",
            Stage::Encoded => "encoded",
            Stage::Reduced => "reduced",
            Stage::Saved => "saved",
        };
        f.write_str(name)
    }
}

/// Input table with the declared columns that are actually present
#[derive(Debug, Clone)]
pub struct Loaded {
    pub frame: DataFrame,
    pub nominal: Vec<String>,
    pub ordinal: Vec<String>,
}

/// Table restricted to the columns that passed the selection gate
#[derive(Debug, Clone)]
pub struct Selected {
    pub frame: DataFrame,
    pub nominal: Vec<String>,
    pub ordinal: Vec<String>,
    pub report: SelectionReport,
}

#[derive(Debug, Clone)]
pub struct Encoded {
    pub encoded: EncodedFrame,
    pub target: Vec<i64>,
    pub codec: CategoryCodec,
    pub report: SelectionReport,
}

#[derive(Debug, Clone)]
pub struct Reduced {
    pub components: EncodedFrame,
    pub target: Vec<i64>,
    pub codec: CategoryCodec,
    pub reducer: DimensionalityReducer,
    pub report: SelectionReport,
}

/// Terminal in-memory state of a pipeline run
#[derive(Debug, Clone)]
pub enum FeatureOutcome {
    Selected(Selected),
    Encoded(Encoded),
    Reduced(Reduced),
}

impl FeatureOutcome {
    pub fn stage(&self) -> Stage {
        match self {
            FeatureOutcome::Selected(_) => Stage::Selected,
            FeatureOutcome::Encoded(_) => Stage::Encoded,
            FeatureOutcome::Reduced(_) => Stage::Reduced,
        }
    }

    pub fn codec(&self) -> Option<&CategoryCodec> {
        match self {
            FeatureOutcome::Selected(_) => None,
            FeatureOutcome::Encoded(s) => Some(&s.codec),
            FeatureOutcome::Reduced(s) => Some(&s.codec),
        }
    }

    pub fn reducer(&self) -> Option<&DimensionalityReducer> {
        match self {
            FeatureOutcome::Reduced(s) => Some(&s.reducer),
            _ => None,
        }
    }

    pub fn report(&self) -> &SelectionReport {
        match self {
            FeatureOutcome::Selected(s) => &s.report,
            FeatureOutcome::Encoded(s) => &s.report,
            FeatureOutcome::Reduced(s) => &s.report,
        }
    }

    /// Output table: features followed by the target
    pub fn table(&self, target_column: &str) -> Result<DataFrame> {
        match self {
            FeatureOutcome::Selected(s) => Ok(s.frame.clone()),
            FeatureOutcome::Encoded(s) => with_target(&s.encoded, target_column, &s.target),
            FeatureOutcome::Reduced(s) => with_target(&s.components, target_column, &s.target),
        }
    }
}

fn with_target(features: &EncodedFrame, target_column: &str, target: &[i64]) -> Result<DataFrame> {
    let mut df = features.to_frame()?;
    data_loader::put_integers(&mut df, target_column, target.to_vec())?;
    Ok(df)
}

/// Files written by a successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedFeatures {
    pub stage: Stage,
    pub table_path: PathBuf,
    pub encoder_path: Option<PathBuf>,
    pub reducer_path: Option<PathBuf>,
    pub columns: Vec<String>,
    pub n_rows: usize,
}

/// Fits the feature contract on training data
pub struct TrainingFeaturePipeline {
    config: FeatureConfig,
}

impl TrainingFeaturePipeline {
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn load(&self, frame: DataFrame) -> Result<Loaded> {
        let target = &self.config.target_column;
        if !has_column(&frame, target) {
            return Err(GradecastError::SchemaError(format!(
                "target column '{}' not found",
                target
            )));
        }

        let present = |cols: &[String]| -> Vec<String> {
            cols.iter()
                .filter(|c| {
                    let found = has_column(&frame, c);
                    if !found {
                        info!(column = %c, "Declared column absent from input; skipped");
                    }
                    found
                })
                .cloned()
                .collect()
        };
        let nominal = present(&self.config.nominal_columns);
        let ordinal = present(&self.config.ordinal_columns);

        let mut declared = nominal.clone();
        declared.extend(ordinal.iter().cloned());
        FeatureSelector::check_dominance(&frame, &declared, self.config.dominance_threshold)?;

        info!(stage = %Stage::Loaded, rows = frame.height(), cols = frame.width(), "Feature pipeline");
        Ok(Loaded { frame, nominal, ordinal })
    }

    pub fn select(&self, loaded: Loaded) -> Result<Selected> {
        let Loaded { frame, nominal, ordinal } = loaded;

        let (report, kept_nominal, kept_ordinal) = if self.config.feature_selection {
            let report = FeatureSelector::from_config(&self.config).select(
                &frame,
                &nominal,
                &ordinal,
                &self.config.target_column,
            )?;
            let n = report.selected_nominal();
            let o = report.selected_ordinal();
            (report, n, o)
        } else {
            info!("Feature selection disabled; keeping every declared column");
            (SelectionReport::default(), nominal.clone(), ordinal.clone())
        };

        let mut frame = frame;
        for col in nominal.iter().chain(&ordinal) {
            if !kept_nominal.contains(col) && !kept_ordinal.contains(col) {
                frame = frame.drop(col)?;
                info!(column = %col, "Dropped by feature selection");
            }
        }

        info!(
            stage = %Stage::Selected,
            nominal = ?kept_nominal,
            ordinal = ?kept_ordinal,
            "Feature pipeline"
        );
        Ok(Selected {
            frame,
            nominal: kept_nominal,
            ordinal: kept_ordinal,
            report,
        })
    }

    pub fn encode(&self, selected: Selected) -> Result<Encoded> {
        let target_column = &self.config.target_column;
        let codec = CategoryCodec::fit(
            &selected.frame,
            &selected.nominal,
            &selected.ordinal,
            Some(target_column),
            self.config.drop_first,
        )?;
        let encoded = codec.transform(&selected.frame)?;
        let labels = data_loader::required_strings(&selected.frame, target_column)?;
        let target = codec.encode_labels(target_column, &labels)?;

        info!(stage = %Stage::Encoded, columns = encoded.columns.len(), "Feature pipeline");
        Ok(Encoded {
            encoded,
            target,
            codec,
            report: selected.report,
        })
    }

    pub fn reduce(&self, encoded: Encoded) -> Result<Reduced> {
        let Encoded { encoded, target, codec, report } = encoded;
        if !codec.passthrough_columns().is_empty() {
            warn!(
                columns = ?codec.passthrough_columns(),
                "Passthrough columns are not part of the reduced feature space"
            );
        }

        let feature_names = codec.feature_columns();
        if feature_names.is_empty() {
            return Err(GradecastError::SchemaError(
                "no encoded features left to reduce".to_string(),
            ));
        }
        let matrix = encoded.select(&feature_names)?;
        let (reducer, projected) = DimensionalityReducer::fit_transform(
            &matrix,
            &feature_names,
            self.config.variance_threshold,
            self.config.random_state,
        )?;

        info!(
            stage = %Stage::Reduced,
            n_features_in = reducer.n_features_in(),
            n_components = reducer.n_components(),
            "Feature pipeline"
        );
        Ok(Reduced {
            components: EncodedFrame {
                columns: reducer.component_names(),
                values: projected,
            },
            target,
            codec,
            reducer,
            report,
        })
    }

    /// Run every enabled stage in memory
    pub fn run(&self, frame: DataFrame) -> Result<FeatureOutcome> {
        let timer = Timer::new("features");
        let selected = self.select(self.load(frame)?)?;
        if !self.config.apply_encoding {
            if self.config.apply_reduction {
                warn!("Reduction requires encoding; pipeline stops at the selected stage");
            }
            return Ok(FeatureOutcome::Selected(selected));
        }
        let encoded = self.encode(selected)?;
        let outcome = if self.config.apply_reduction {
            FeatureOutcome::Reduced(self.reduce(encoded)?)
        } else {
            FeatureOutcome::Encoded(encoded)
        };
        timer.finish();
        Ok(outcome)
    }

    /// Persist the outcome: feature table as CSV, codec and reducer as blobs
    pub fn save(&self, outcome: &FeatureOutcome, paths: &ArtifactPaths, table_path: &Path) -> Result<SavedFeatures> {
        let mut table = outcome.table(&self.config.target_column)?;
        let codec_bytes = outcome.codec().map(|c| c.to_bytes()).transpose()?;
        let reducer_bytes = outcome.reducer().map(|r| r.to_bytes()).transpose()?;

        // Artifacts first; a blob the terminal stage did not produce is removed
        // so a later load cannot pair it with this run's table.
        match &codec_bytes {
            Some(bytes) => write_atomic(&paths.encoder, bytes)?,
            None => remove_stale_artifact(&paths.encoder)?,
        }
        match &reducer_bytes {
            Some(bytes) => write_atomic(&paths.reducer, bytes)?,
            None => remove_stale_artifact(&paths.reducer)?,
        }
        DataSaver::save_csv(&mut table, table_path)?;

        let saved = SavedFeatures {
            stage: outcome.stage(),
            table_path: table_path.to_path_buf(),
            encoder_path: codec_bytes.map(|_| paths.encoder.clone()),
            reducer_path: reducer_bytes.map(|_| paths.reducer.clone()),
            columns: column_names(&table),
            n_rows: table.height(),
        };
        info!(
            stage = %Stage::Saved,
            terminal = %saved.stage,
            table = %table_path.display(),
            "Feature pipeline"
        );
        Ok(saved)
    }

    /// `run` followed by `save`; nothing is written when a stage fails
    pub fn run_and_save(&self, frame: DataFrame, paths: &ArtifactPaths, table_path: &Path) -> Result<SavedFeatures> {
        let outcome = self.run(frame)?;
        self.save(&outcome, paths, table_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sample_df() -> DataFrame {
        df! {
            "Caste" => &["GENERAL", "OBC", "SC", "GENERAL", "OBC", "SC"],
            "medium" => &["ENGLISH", "ASSAMESE", "ENGLISH", "ASSAMESE", "ENGLISH", "ASSAMESE"],
            "Class_X_Percentage" => &["EXCELLENT", "GOOD", "VG", "AVERAGE", "VG", "GOOD"],
            "Performance" => &["VG", "GOOD", "VG", "AVERAGE", "EXCELLENT", "GOOD"],
        }
        .unwrap()
    }

    fn config() -> FeatureConfig {
        FeatureConfig::new()
            .with_nominal_columns(["Caste", "medium", "Gender"])
            .with_ordinal_columns(["Class_X_Percentage"])
            .with_feature_selection(false)
    }

    #[test]
    fn test_stages_in_order() {
        let pipeline = TrainingFeaturePipeline::new(config()).unwrap();
        let loaded = pipeline.load(sample_df()).unwrap();
        assert_eq!(loaded.nominal, strings(&["Caste", "medium"]));

        let selected = pipeline.select(loaded).unwrap();
        let encoded = pipeline.encode(selected).unwrap();
        assert_eq!(encoded.target, vec![2, 1, 2, 0, 3, 1]);
        assert_eq!(
            encoded.encoded.columns,
            strings(&["Caste_OBC", "Caste_SC", "medium_ENGLISH", "Class_X_Percentage_encoded"])
        );

        let reduced = pipeline.reduce(encoded).unwrap();
        assert_eq!(reduced.reducer.n_features_in(), 4);
        assert_eq!(reduced.components.columns[0], "PC1");
    }

    #[test]
    fn test_disabling_reduction_stops_at_encoded() {
        let pipeline = TrainingFeaturePipeline::new(config().with_reduction(false)).unwrap();
        let outcome = pipeline.run(sample_df()).unwrap();
        assert_eq!(outcome.stage(), Stage::Encoded);
        assert!(outcome.reducer().is_none());
        let table = outcome.table("Performance").unwrap();
        assert_eq!(table.width(), 5);
    }

    #[test]
    fn test_unreduced_save_removes_previous_reducer() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = ArtifactPaths::under(dir.path().join("models"));
        let table = dir.path().join("features.csv");

        let full = TrainingFeaturePipeline::new(config()).unwrap();
        full.run_and_save(sample_df(), &paths, &table).unwrap();
        assert!(paths.all_exist());

        let encoded_only = TrainingFeaturePipeline::new(config().with_reduction(false)).unwrap();
        let saved = encoded_only.run_and_save(sample_df(), &paths, &table).unwrap();
        assert_eq!(saved.stage, Stage::Encoded);
        assert!(saved.reducer_path.is_none());
        assert!(paths.encoder.exists());
        assert!(!paths.reducer.exists());
        assert!(!paths.all_exist());
        assert!(matches!(
            crate::pipeline::InferenceFeaturePipeline::load(&paths),
            Err(GradecastError::ArtifactNotFound { .. })
        ));

        let selected_only = TrainingFeaturePipeline::new(config().with_encoding(false)).unwrap();
        selected_only.run_and_save(sample_df(), &paths, &table).unwrap();
        assert!(!paths.encoder.exists());
    }

    #[test]
    fn test_disabling_encoding_stops_at_selected() {
        let pipeline = TrainingFeaturePipeline::new(config().with_encoding(false)).unwrap();
        let outcome = pipeline.run(sample_df()).unwrap();
        assert_eq!(outcome.stage(), Stage::Selected);
        assert!(outcome.codec().is_none());
    }

    #[test]
    fn test_missing_target_is_schema_error() {
        let pipeline = TrainingFeaturePipeline::new(config()).unwrap();
        let df = sample_df().drop("Performance").unwrap();
        assert!(matches!(pipeline.load(df), Err(GradecastError::SchemaError(_))));
    }

    #[test]
    fn test_unknown_target_label() {
        let pipeline = TrainingFeaturePipeline::new(config()).unwrap();
        let mut df = sample_df();
        data_loader::put_strings(
            &mut df,
            "Performance",
            ["VG", "GOOD", "VG", "AVERAGE", "SUPERB", "GOOD"].iter().map(|s| Some(s.to_string())).collect(),
        )
        .unwrap();
        let err = pipeline.run(df).unwrap_err();
        assert!(matches!(err, GradecastError::UnseenCategory { .. }));
    }
}
