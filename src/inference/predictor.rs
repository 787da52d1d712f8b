//! Published-model predictor
//!
//! Loads the feature artifacts and the newest published regressor once, then
//! answers single-student predictions. A failed load leaves the predictor in
//! a not-ready state instead of aborting the process.

use crate::error::{GradecastError, Result};
use crate::export::ModelRegistry;
use crate::pipeline::{ArtifactPaths, InferenceFeaturePipeline};
use crate::preprocessing::Grade;
use crate::tracking::ExperimentTracker;
use crate::training::{Regressor, TrainedRegressor, MODEL_ARTIFACT};
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One student as received from callers; field names follow the CSV header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentInput {
    #[serde(rename = "Caste")]
    pub caste: String,
    pub coaching: String,
    #[serde(rename = "Class_ten_education")]
    pub class_ten_education: String,
    pub medium: String,
    #[serde(rename = "Class_X_Percentage")]
    pub class_x_percentage: String,
    #[serde(rename = "Class_XII_Percentage")]
    pub class_xii_percentage: String,
    #[serde(rename = "Father_occupation")]
    pub father_occupation: String,
    #[serde(rename = "Mother_occupation")]
    pub mother_occupation: String,
}

impl StudentInput {
    /// Column-keyed record in the raw table's vocabulary
    pub fn to_record(&self) -> BTreeMap<String, String> {
        [
            ("Caste", &self.caste),
            ("coaching", &self.coaching),
            ("Class_ten_education", &self.class_ten_education),
            ("medium", &self.medium),
            ("Class_X_Percentage", &self.class_x_percentage),
            ("Class_XII_Percentage", &self.class_xii_percentage),
            ("Father_occupation", &self.father_occupation),
            ("Mother_occupation", &self.mother_occupation),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.trim().to_uppercase()))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: String,
    pub prediction_numeric: i64,
}

impl From<Grade> for PredictionResponse {
    fn from(grade: Grade) -> Self {
        Self {
            prediction: grade.label().to_string(),
            prediction_numeric: grade.code(),
        }
    }
}

/// Where the published model came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ModelSource {
    Registry { name: String, version: u32 },
    Run { run_id: String },
}

/// Serving-side holder of the feature pipeline and published model
#[derive(Debug)]
pub struct ModelPredictor {
    models_dir: PathBuf,
    mlflow_dir: PathBuf,
    experiment_name: String,
    features: Option<InferenceFeaturePipeline>,
    model: Option<TrainedRegressor>,
    source: Option<ModelSource>,
}

impl ModelPredictor {
    /// An unloaded predictor; call [`ModelPredictor::load`] before predicting
    pub fn new(
        models_dir: impl Into<PathBuf>,
        mlflow_dir: impl Into<PathBuf>,
        experiment_name: impl Into<String>,
    ) -> Self {
        Self {
            models_dir: models_dir.into(),
            mlflow_dir: mlflow_dir.into(),
            experiment_name: experiment_name.into(),
            features: None,
            model: None,
            source: None,
        }
    }

    /// Load artifacts and model, logging rather than failing
    pub fn load_or_degrade(mut self) -> Self {
        if let Err(e) = self.load() {
            warn!(error = %e, "Predictor not ready; predictions will fail until artifacts are available");
        }
        self
    }

    /// Load the feature artifacts and the published model
    pub fn load(&mut self) -> Result<()> {
        let paths = ArtifactPaths::under(&self.models_dir);
        let features = InferenceFeaturePipeline::load(&paths)?;
        info!(
            encoder = %paths.encoder.display(),
            reducer = %paths.reducer.display(),
            "Loaded feature artifacts"
        );
        self.features = Some(features);

        let (model, source) = self.load_model()?;
        info!(source = ?source, family = %model.family(), "Loaded published model");
        self.model = Some(model);
        self.source = Some(source);
        Ok(())
    }

    fn load_model(&self) -> Result<(TrainedRegressor, ModelSource)> {
        match load_from_registry(&self.mlflow_dir) {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(error = %e, "Could not load from model registry; trying the latest run");
                load_from_latest_run(&self.mlflow_dir, &self.experiment_name)
            }
        }
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn preprocessors_loaded(&self) -> bool {
        self.features.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.model_loaded() && self.preprocessors_loaded()
    }

    pub fn source(&self) -> Option<&ModelSource> {
        self.source.as_ref()
    }

    pub fn predict(&self, input: &StudentInput) -> Result<PredictionResponse> {
        self.predict_record(&input.to_record())
    }

    /// Features, regressor output, then round-and-clip onto the grade scale
    pub fn predict_record(&self, record: &BTreeMap<String, String>) -> Result<PredictionResponse> {
        let (features, model) = match (&self.features, &self.model) {
            (Some(f), Some(m)) => (f, m),
            _ => return Err(GradecastError::ModelNotFitted),
        };
        let row = features.transform_record(record)?;
        let x = row.insert_axis(Axis(0));
        let raw = model.predict(&x)?;
        let value = raw.first().copied().unwrap_or(f64::NAN);
        Ok(Grade::from_prediction(value).into())
    }
}

fn load_from_registry(mlflow_dir: &Path) -> Result<(TrainedRegressor, ModelSource)> {
    let registry = ModelRegistry::under(mlflow_dir)?;
    let entry = registry
        .latest_unstaged()
        .ok_or_else(|| GradecastError::NoModelAvailable("no registered models found".to_string()))?;
    let artifact = registry.load(entry)?;
    Ok((
        artifact.model,
        ModelSource::Registry {
            name: artifact.name,
            version: artifact.version,
        },
    ))
}

fn load_from_latest_run(mlflow_dir: &Path, experiment_name: &str) -> Result<(TrainedRegressor, ModelSource)> {
    let tracker = ExperimentTracker::open(mlflow_dir)?;
    if tracker.experiment(experiment_name).is_none() {
        return Err(GradecastError::NoModelAvailable(format!(
            "experiment '{}' not found",
            experiment_name
        )));
    }
    let run = tracker.latest_any_run(experiment_name).ok_or_else(|| {
        GradecastError::NoModelAvailable(format!("no runs found in experiment '{}'", experiment_name))
    })?;
    let model = TrainedRegressor::from_bytes(&tracker.load_artifact(run, MODEL_ARTIFACT)?)?;
    Ok((
        model,
        ModelSource::Run {
            run_id: run.run_id.clone(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn student() -> StudentInput {
        StudentInput {
            caste: "general".to_string(),
            coaching: "WA".to_string(),
            class_ten_education: "SEBA".to_string(),
            medium: "ENGLISH".to_string(),
            class_x_percentage: "EXCELLENT".to_string(),
            class_xii_percentage: "VG".to_string(),
            father_occupation: "ENGINEER".to_string(),
            mother_occupation: "SCHOOL_TEACHER".to_string(),
        }
    }

    #[test]
    fn test_input_uses_csv_names() {
        let json = serde_json::to_value(student()).unwrap();
        assert_eq!(json["Class_XII_Percentage"], "VG");
        assert_eq!(json["coaching"], "WA");
        let record = student().to_record();
        assert_eq!(record.len(), 8);
        assert_eq!(record["Caste"], "GENERAL");
    }

    #[test]
    fn test_missing_artifacts_leave_predictor_degraded() {
        let dir = TempDir::new().unwrap();
        let predictor = ModelPredictor::new(dir.path().join("models"), dir.path().join("mlruns"), "exp")
            .load_or_degrade();
        assert!(!predictor.is_ready());
        assert!(!predictor.preprocessors_loaded());
        assert!(matches!(predictor.predict(&student()), Err(GradecastError::ModelNotFitted)));
    }

    #[test]
    fn test_response_from_grade() {
        let response = PredictionResponse::from(Grade::VeryGood);
        assert_eq!(response.prediction, "VG");
        assert_eq!(response.prediction_numeric, 2);
    }
}
