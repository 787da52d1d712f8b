//! End-to-end training run: clean, build features, train, select, register

use super::artifacts::ArtifactPaths;
use super::training::{SavedFeatures, TrainingFeaturePipeline};
use crate::config::TrainingSettings;
use crate::error::Result;
use crate::export::RegisteredVersion;
use crate::preprocessing::{CleaningConfig, CleaningReport, DataCleaner, FeatureConfig};
use crate::training::{ModelMetrics, ModelTrainer};
use crate::utils::{DataLoader, DataSaver, Timer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Whether a file-producing step did work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    Ran,
    Skipped,
}

/// What a full run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub cleaning: StepStatus,
    pub features: StepStatus,
    pub metrics: BTreeMap<String, ModelMetrics>,
    pub best_model: String,
    pub registered: RegisteredVersion,
}

/// Clean a raw CSV into `output`
pub fn clean_file(input: &Path, output: &Path) -> Result<CleaningReport> {
    let raw = DataLoader::new().load_csv(input)?;
    let (mut cleaned, report) = DataCleaner::new(CleaningConfig::default()).clean(raw)?;
    DataSaver::save_csv(&mut cleaned, output)?;
    info!(output = %output.display(), rows = report.rows_out, "Cleaned data saved");
    Ok(report)
}

/// Structural-only cleaning of a raw CSV into a drift baseline at `output`
pub fn baseline_file(input: &Path, output: &Path) -> Result<CleaningReport> {
    let raw = DataLoader::new().load_csv(input)?;
    let (mut baseline, report) = DataCleaner::new(CleaningConfig::baseline()).clean(raw)?;
    DataSaver::save_csv(&mut baseline, output)?;
    info!(
        output = %output.display(),
        rows = report.rows_out,
        remaining_nulls = report.remaining_nulls,
        "Baseline data saved (no imputation applied)"
    );
    Ok(report)
}

/// Fit the feature pipeline on a cleaned CSV and persist table and artifacts
pub fn build_features_file(
    input: &Path,
    output: &Path,
    paths: &ArtifactPaths,
    config: FeatureConfig,
) -> Result<SavedFeatures> {
    let frame = DataLoader::new().load_csv(input)?;
    TrainingFeaturePipeline::new(config)?.run_and_save(frame, paths, output)
}

/// Drives every stage from [`TrainingSettings`]
pub struct TrainingRunner {
    settings: TrainingSettings,
}

impl TrainingRunner {
    pub fn new(settings: TrainingSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrainingSettings {
        &self.settings
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths::under(&self.settings.paths.models_dir)
    }

    /// Skipped when the cleaned file exists and `force` is off
    pub fn clean_step(&self) -> Result<StepStatus> {
        let paths = &self.settings.paths;
        if paths.interim_data.exists() && !self.settings.pipeline.cleaning.force {
            info!(path = %paths.interim_data.display(), "Cleaned data exists; skipping cleaning");
            return Ok(StepStatus::Skipped);
        }
        clean_file(&paths.raw_data, &paths.interim_data)?;
        Ok(StepStatus::Ran)
    }

    /// Skipped when the feature table and both artifacts exist and `force` is off
    pub fn features_step(&self) -> Result<StepStatus> {
        let paths = &self.settings.paths;
        let artifacts = self.artifact_paths();
        if paths.processed_data.exists() && !self.settings.pipeline.features.force {
            if artifacts.all_exist() {
                info!(path = %paths.processed_data.display(), "Features exist; skipping feature engineering");
                return Ok(StepStatus::Skipped);
            }
            warn!("Feature table exists but artifacts are missing; rebuilding");
        }
        build_features_file(
            &paths.interim_data,
            &paths.processed_data,
            &artifacts,
            self.settings.feature_config(),
        )?;
        Ok(StepStatus::Ran)
    }

    pub fn trainer(&self) -> Result<ModelTrainer> {
        let training = &self.settings.model_training;
        Ok(ModelTrainer::new(
            &self.settings.paths.processed_data,
            &self.settings.paths.mlflow_dir,
            &training.experiment_name,
        )?
        .with_hyperparameters(training.hyperparameters.clone()))
    }

    /// Run every stage; the first failure stops the run
    pub fn run(&self) -> Result<RunSummary> {
        let timer = Timer::new("pipeline");
        info!("Starting training pipeline");
        let cleaning = self.clean_step()?;
        let features = self.features_step()?;

        let training = &self.settings.model_training;
        let mut trainer = self.trainer()?;
        let metrics = trainer.run_pipeline(
            &training.target_column,
            training.test_size,
            training.random_state,
            training.model,
        )?;
        let best_model = trainer.get_best_model(&training.metric, training.maximize())?;
        let registered = trainer.register_best_model(&best_model)?;

        info!(
            best = %best_model,
            registered = %registered.name,
            version = registered.version,
            mlflow_dir = %self.settings.paths.mlflow_dir.display(),
            "Training pipeline finished"
        );
        timer.finish();
        Ok(RunSummary {
            cleaning,
            features,
            metrics,
            best_model,
            registered,
        })
    }
}
