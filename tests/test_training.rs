//! Integration test: train, select, register, then load for prediction

use gradecast::config::{ModelChoice, TrainingSettings};
use gradecast::error::GradecastError;
use gradecast::export::ModelRegistry;
use gradecast::inference::{ModelPredictor, ModelSource, StudentInput};
use gradecast::pipeline::{build_features_file, ArtifactPaths, StepStatus, TrainingRunner};
use gradecast::preprocessing::FeatureConfig;
use gradecast::tracking::ExperimentTracker;
use gradecast::training::{
    select_best, CatBoostConfig, HyperParameters, LightGBMConfig, ModelMetrics, ModelTrainer, XGBoostConfig,
    CANDIDATE_TAG,
};
use gradecast::utils::DataSaver;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const GRADES: [&str; 4] = ["AVERAGE", "GOOD", "VG", "EXCELLENT"];
const EXPERIMENT: &str = "student-performance-test";

fn pick(levels: &[&str], i: usize) -> String {
    levels[i % levels.len()].to_string()
}

/// Raw student table with every served field
fn students(n: usize) -> DataFrame {
    let mut cols: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    for i in 0..n {
        let grade = i % 4;
        let mut push = |name: &'static str, value: String| cols.entry(name).or_default().push(value);
        push("Caste", pick(&["GENERAL", "OBC", "SC", "ST"], i / 2));
        push("coaching", pick(&["WA", "OA", "NO"], i));
        push("Class_ten_education", pick(&["SEBA", "CBSE"], i / 5));
        push("medium", pick(&["ENGLISH", "ASSAMESE"], i / 3));
        push("Class_X_Percentage", pick(&GRADES, if i % 7 == 0 { grade + 1 } else { grade }));
        push("Class_XII_Percentage", pick(&GRADES, if i % 5 == 0 { grade + 3 } else { grade }));
        push("Father_occupation", pick(&["ENGINEER", "BUSINESS", "OTHERS"], i / 2));
        push("Mother_occupation", pick(&["SCHOOL_TEACHER", "HOUSE_WIFE"], i / 7));
        push("Performance", GRADES[grade].to_string());
    }
    DataFrame::new(
        cols.into_iter()
            .map(|(name, values)| Column::new(name.into(), values))
            .collect(),
    )
    .unwrap()
}

fn small_models() -> HyperParameters {
    HyperParameters {
        lightgbm: LightGBMConfig {
            n_estimators: 30,
            min_child_samples: 5,
            ..Default::default()
        },
        xgboost: XGBoostConfig {
            n_estimators: 30,
            max_depth: 3,
            ..Default::default()
        },
        catboost: CatBoostConfig {
            n_estimators: 30,
            max_depth: 3,
            ..Default::default()
        },
    }
}

fn student() -> StudentInput {
    serde_json::from_value(serde_json::json!({
        "Caste": "GENERAL",
        "coaching": "WA",
        "Class_ten_education": "SEBA",
        "medium": "ENGLISH",
        "Class_X_Percentage": "EXCELLENT",
        "Class_XII_Percentage": "VG",
        "Father_occupation": "ENGINEER",
        "Mother_occupation": "SCHOOL_TEACHER"
    }))
    .unwrap()
}

/// Feature table plus artifacts under `<root>/models`
fn build_features(root: &Path) -> PathBuf {
    let clean = root.join("clean.csv");
    DataSaver::save_csv(&mut students(80), &clean).unwrap();
    let table = root.join("features.csv");
    build_features_file(
        &clean,
        &table,
        &ArtifactPaths::under(root.join("models")),
        FeatureConfig::default().with_feature_selection(false),
    )
    .unwrap();
    table
}

fn metrics(qwk: f64, rmse: f64) -> ModelMetrics {
    ModelMetrics {
        rmse,
        qwk,
        n_samples: 10,
        training_time_secs: 0.0,
    }
}

#[test]
fn test_best_model_by_qwk() {
    let scores: BTreeMap<String, ModelMetrics> = [
        ("A".to_string(), metrics(0.7, 0.6)),
        ("B".to_string(), metrics(0.9, 0.8)),
        ("C".to_string(), metrics(0.5, 0.4)),
    ]
    .into_iter()
    .collect();
    assert_eq!(select_best(&scores, "qwk", true).unwrap(), "B");
    assert_eq!(select_best(&scores, "rmse", false).unwrap(), "C");
    assert!(matches!(
        select_best(&BTreeMap::new(), "qwk", true),
        Err(GradecastError::NoModelAvailable(_))
    ));
}

#[test]
fn test_train_register_and_predict() {
    let dir = TempDir::new().unwrap();
    let table = build_features(dir.path());
    let mlflow = dir.path().join("mlruns");

    let mut trainer = ModelTrainer::new(&table, &mlflow, EXPERIMENT)
        .unwrap()
        .with_hyperparameters(small_models());
    let scores = trainer.run_pipeline("Performance", 0.2, 13, ModelChoice::All).unwrap();
    assert_eq!(scores.len(), 3);
    for m in scores.values() {
        assert_eq!(m.n_samples, 16);
        assert!(m.rmse.is_finite());
    }

    let best = trainer.get_best_model("qwk", true).unwrap();
    let first = trainer.register_best_model(&best).unwrap();
    assert_eq!(first.name, format!("{}_{}", EXPERIMENT, best));
    assert_eq!(first.version, 1);
    assert_eq!(first.tags.get(CANDIDATE_TAG.0).map(String::as_str), Some(CANDIDATE_TAG.1));

    let second = trainer.register_best_model(&best).unwrap();
    assert_eq!(second.version, 2);

    let registry = ModelRegistry::under(&mlflow).unwrap();
    assert_eq!(registry.list_versions(&first.name).len(), 2);

    let mut predictor = ModelPredictor::new(dir.path().join("models"), &mlflow, EXPERIMENT);
    predictor.load().unwrap();
    assert!(predictor.is_ready());
    assert_eq!(
        predictor.source(),
        Some(&ModelSource::Registry {
            name: first.name.clone(),
            version: 2
        })
    );
    let response = predictor.predict(&student()).unwrap();
    assert!(GRADES.contains(&response.prediction.as_str()));
    assert!((0..=3).contains(&response.prediction_numeric));
    assert_eq!(GRADES[response.prediction_numeric as usize], response.prediction);
}

#[test]
fn test_predictor_falls_back_to_latest_run() {
    let dir = TempDir::new().unwrap();
    let table = build_features(dir.path());
    let mlflow = dir.path().join("mlruns");

    let mut trainer = ModelTrainer::new(&table, &mlflow, EXPERIMENT)
        .unwrap()
        .with_hyperparameters(small_models());
    let scores = trainer.run_pipeline("Performance", 0.2, 13, ModelChoice::Xgboost).unwrap();

    let tracker = ExperimentTracker::open(&mlflow).unwrap();
    let run = tracker.latest_run(EXPERIMENT, "XGBoost").unwrap();
    let qwk = scores["XGBoost"].qwk;
    assert_eq!(run.metrics[ModelMetrics::QWK], qwk);
    assert_eq!(run.metrics[ModelMetrics::QWK_LONG], qwk);

    let mut predictor = ModelPredictor::new(dir.path().join("models"), &mlflow, EXPERIMENT);
    predictor.load().unwrap();
    assert!(matches!(predictor.source(), Some(ModelSource::Run { .. })));
    assert!(predictor.predict(&student()).is_ok());
}

#[test]
fn test_register_unknown_model_fails() {
    let dir = TempDir::new().unwrap();
    let table = build_features(dir.path());
    let mut trainer = ModelTrainer::new(&table, dir.path().join("mlruns"), EXPERIMENT).unwrap();
    assert!(matches!(
        trainer.register_best_model("XGBoost"),
        Err(GradecastError::NoModelAvailable(_))
    ));
}

#[test]
fn test_runner_end_to_end_and_skips() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    let mut raw = students(80);
    DataSaver::save_csv(&mut raw, root.join("raw.csv")).unwrap();

    let mut settings = TrainingSettings::default();
    settings.paths.raw_data = root.join("raw.csv");
    settings.paths.interim_data = root.join("interim").join("clean.csv");
    settings.paths.processed_data = root.join("processed").join("features.csv");
    settings.paths.mlflow_dir = root.join("mlruns");
    settings.paths.models_dir = root.join("models");
    settings.model_training.experiment_name = EXPERIMENT.to_string();
    settings.model_training.model = ModelChoice::Catboost;
    settings.model_training.hyperparameters = small_models();
    settings.validate().unwrap();

    let runner = TrainingRunner::new(settings.clone());
    let summary = runner.run().unwrap();
    assert_eq!(summary.cleaning, StepStatus::Ran);
    assert_eq!(summary.features, StepStatus::Ran);
    assert_eq!(summary.best_model, "CatBoost");
    assert_eq!(summary.registered.version, 1);
    assert!(runner.artifact_paths().all_exist());

    let again = TrainingRunner::new(settings).run().unwrap();
    assert_eq!(again.cleaning, StepStatus::Skipped);
    assert_eq!(again.features, StepStatus::Skipped);
    assert_eq!(again.registered.version, 2);
}

#[test]
fn test_runner_missing_raw_data_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut settings = TrainingSettings::default();
    settings.paths.raw_data = dir.path().join("absent.csv");
    settings.paths.interim_data = dir.path().join("clean.csv");
    settings.paths.processed_data = dir.path().join("features.csv");
    settings.paths.mlflow_dir = dir.path().join("mlruns");
    settings.paths.models_dir = dir.path().join("models");

    let runner = TrainingRunner::new(settings);
    assert!(runner.run().is_err());
    assert!(!dir.path().join("clean.csv").exists());
    assert!(!runner.artifact_paths().encoder.exists());
}
