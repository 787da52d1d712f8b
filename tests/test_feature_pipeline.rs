//! Integration test: fit the feature contract, persist it, replay it

use gradecast::error::GradecastError;
use gradecast::pipeline::{ArtifactPaths, InferenceFeaturePipeline, TrainingFeaturePipeline};
use gradecast::preprocessing::{DimensionalityReducer, FeatureConfig, Grade};
use gradecast::utils::data_loader::{self, frame_to_matrix};
use gradecast::utils::DataLoader;
use ndarray::Array2;
use polars::prelude::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

const GRADES: [&str; 4] = ["AVERAGE", "GOOD", "VG", "EXCELLENT"];

fn pick<'a>(levels: &[&'a str], i: usize) -> String {
    levels[i % levels.len()].to_string()
}

/// Cleaned student table; Class X tracks the label closely
fn students(n: usize) -> DataFrame {
    let mut caste = Vec::with_capacity(n);
    let mut medium = Vec::with_capacity(n);
    let mut coaching = Vec::with_capacity(n);
    let mut class_x = Vec::with_capacity(n);
    let mut class_xii = Vec::with_capacity(n);
    let mut performance = Vec::with_capacity(n);
    for i in 0..n {
        let grade = i % 4;
        caste.push(pick(&["GENERAL", "OBC"], i / 2));
        medium.push(pick(&["ENGLISH", "ASSAMESE"], i / 3));
        coaching.push(pick(&["WA", "OA", "NO"], i));
        class_x.push(pick(&GRADES, if i % 7 == 0 { grade + 1 } else { grade }));
        class_xii.push(pick(&GRADES, if i % 3 == 0 { grade + 3 } else { grade }));
        performance.push(GRADES[grade].to_string());
    }
    df! {
        "Caste" => caste,
        "medium" => medium,
        "coaching" => coaching,
        "Class_X_Percentage" => class_x,
        "Class_XII_Percentage" => class_xii,
        "Performance" => performance,
    }
    .unwrap()
}

fn config() -> FeatureConfig {
    FeatureConfig::new()
        .with_nominal_columns(["Caste", "medium", "coaching"])
        .with_ordinal_columns(["Class_X_Percentage", "Class_XII_Percentage"])
        .with_feature_selection(false)
}

fn fit_and_save(dir: &TempDir) -> (ArtifactPaths, std::path::PathBuf) {
    let paths = ArtifactPaths::under(dir.path().join("models"));
    let table = dir.path().join("features.csv");
    TrainingFeaturePipeline::new(config())
        .unwrap()
        .run_and_save(students(40), &paths, &table)
        .unwrap();
    (paths, table)
}

fn record(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn test_unseen_caste_level_encodes_to_zeros() {
    let dir = TempDir::new().unwrap();
    let (paths, _) = fit_and_save(&dir);
    let pipeline = InferenceFeaturePipeline::load(&paths).unwrap();

    let df = df! {
        "Caste" => &["SC"],
        "medium" => &["ENGLISH"],
        "coaching" => &["WA"],
        "Class_X_Percentage" => &["VG"],
        "Class_XII_Percentage" => &["GOOD"],
    }
    .unwrap();
    let (columns, values) = pipeline.feature_matrix(&df, false).unwrap();
    let caste: Vec<f64> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.starts_with("Caste_"))
        .map(|(j, _)| values[[0, j]])
        .collect();
    assert!(!caste.is_empty());
    assert!(caste.iter().all(|v| *v == 0.0));

    // the reduced path accepts the same row
    assert!(pipeline.transform(&df, true).is_ok());
}

#[test]
fn test_reducer_feature_count_contract() {
    let matrix = Array2::from_shape_fn((30, 10), |(i, j)| ((i * (j + 3)) % 11) as f64 + (j as f64) * 0.1);
    let names: Vec<String> = (0..10).map(|j| format!("f{}", j)).collect();
    let reducer = DimensionalityReducer::fit(&matrix, &names, 0.95, 42).unwrap();
    assert_eq!(reducer.n_features_in(), 10);

    let reloaded = DimensionalityReducer::from_bytes(&reducer.to_bytes().unwrap()).unwrap();
    let narrow = Array2::<f64>::zeros((1, 8));
    let err = reloaded.transform(&narrow).unwrap_err();
    assert!(matches!(err, GradecastError::ShapeMismatch { expected: 10, actual: 8, .. }));
    assert!(err.to_string().contains("expected 10, got 8"));
}

#[test]
fn test_schema_authority_on_records() {
    let dir = TempDir::new().unwrap();
    let (paths, _) = fit_and_save(&dir);
    let pipeline = InferenceFeaturePipeline::load(&paths).unwrap();

    let full = pipeline
        .transform_record(&record(&[
            ("Caste", "OBC"),
            ("medium", "ENGLISH"),
            ("coaching", "OA"),
            ("Class_X_Percentage", "GOOD"),
            ("Class_XII_Percentage", "VG"),
        ]))
        .unwrap();

    // missing nominal column and an extra one
    let drifted = pipeline
        .transform_record(&record(&[
            ("Caste", "OBC"),
            ("coaching", "OA"),
            ("Gender", "FEMALE"),
            ("Class_X_Percentage", "GOOD"),
            ("Class_XII_Percentage", "VG"),
        ]))
        .unwrap();
    assert_eq!(full.len(), pipeline.reducer().n_components());
    assert_eq!(drifted.len(), full.len());

    let err = pipeline
        .transform_record(&record(&[
            ("Caste", "OBC"),
            ("medium", "ENGLISH"),
            ("coaching", "OA"),
            ("Class_X_Percentage", "OUTSTANDING"),
            ("Class_XII_Percentage", "VG"),
        ]))
        .unwrap_err();
    assert!(matches!(err, GradecastError::UnseenCategory { .. }));
}

#[test]
fn test_transform_is_pure() {
    let dir = TempDir::new().unwrap();
    let (paths, _) = fit_and_save(&dir);
    let pipeline = InferenceFeaturePipeline::load(&paths).unwrap();
    let df = students(12);
    let a = pipeline.feature_matrix(&df, true).unwrap().1;
    let b = pipeline.feature_matrix(&df, true).unwrap().1;
    assert_eq!(
        a.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
        b.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
    );
}

#[test]
fn test_training_artifacts_reproduce_components() {
    let dir = TempDir::new().unwrap();
    let (paths, table_path) = fit_and_save(&dir);

    let table = DataLoader::new().load_csv(&table_path).unwrap();
    let pipeline = InferenceFeaturePipeline::load(&paths).unwrap();
    let replayed = pipeline.transform(&students(40), true).unwrap();

    let pcs = pipeline.reducer().component_names();
    let stored = frame_to_matrix(&table, &pcs).unwrap();
    let fresh = frame_to_matrix(&replayed, &pcs).unwrap();
    for (a, b) in stored.iter().zip(fresh.iter()) {
        assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
    }

    let labels = data_loader::numeric_values(&replayed, "Performance").unwrap();
    assert_eq!(labels, data_loader::numeric_values(&table, "Performance").unwrap());
}

#[test]
fn test_label_codes_decode_back() {
    let dir = TempDir::new().unwrap();
    let (paths, _) = fit_and_save(&dir);
    let pipeline = InferenceFeaturePipeline::load(&paths).unwrap();
    let labels: Vec<String> = GRADES.iter().map(|s| s.to_string()).collect();
    let codes = pipeline.codec().encode_labels("Performance", &labels).unwrap();
    assert_eq!(codes, vec![0, 1, 2, 3]);
    for (code, label) in codes.iter().zip(&labels) {
        assert_eq!(pipeline.codec().decode_label(*code), Some(label.as_str()));
    }
    for raw in [-4.2, 0.49, 1.5, 2.5, 3.7, 99.0] {
        let grade = Grade::from_prediction(raw);
        assert!(GRADES.contains(&grade.label()));
        assert!((0..=3).contains(&grade.code()));
    }
}

#[test]
fn test_failed_run_writes_no_artifacts() {
    let dir = TempDir::new().unwrap();
    let paths = ArtifactPaths::under(dir.path().join("models"));
    let table = dir.path().join("features.csv");

    let mut df = students(20);
    let mut labels: Vec<Option<String>> = GRADES.iter().cycle().take(20).map(|s| Some(s.to_string())).collect();
    labels[5] = Some("SUPERB".to_string());
    data_loader::put_strings(&mut df, "Performance", labels).unwrap();

    let result = TrainingFeaturePipeline::new(config()).unwrap().run_and_save(df, &paths, &table);
    assert!(result.is_err());
    assert!(!paths.encoder.exists());
    assert!(!paths.reducer.exists());
    assert!(!table.exists());
}

#[test]
fn test_missing_artifact_names_path() {
    let dir = TempDir::new().unwrap();
    let paths = ArtifactPaths::under(dir.path());
    let err = InferenceFeaturePipeline::load(&paths).unwrap_err();
    assert!(matches!(err, GradecastError::ArtifactNotFound { .. }));
    assert!(err.to_string().contains("not found at path"));
}

#[test]
fn test_loaded_codec_and_reducer_from_different_fits() {
    let wide_dir = TempDir::new().unwrap();
    let (wide, _) = fit_and_save(&wide_dir);

    let narrow_dir = TempDir::new().unwrap();
    let narrow = ArtifactPaths::under(narrow_dir.path().join("models"));
    TrainingFeaturePipeline::new(
        FeatureConfig::new()
            .with_nominal_columns(["Caste", "medium"])
            .with_ordinal_columns(["Class_X_Percentage", "Class_XII_Percentage"])
            .with_feature_selection(false),
    )
    .unwrap()
    .run_and_save(
        students(40).drop("coaching").unwrap(),
        &narrow,
        &narrow_dir.path().join("features.csv"),
    )
    .unwrap();

    let mixed = InferenceFeaturePipeline::load(&ArtifactPaths::new(&narrow.encoder, &wide.reducer)).unwrap();
    let expected = mixed.reducer().n_features_in();
    let actual = mixed.codec().feature_columns().len();
    assert!(actual < expected);

    let err = mixed
        .transform_record(&record(&[
            ("Caste", "OBC"),
            ("medium", "ENGLISH"),
            ("Class_X_Percentage", "VG"),
            ("Class_XII_Percentage", "GOOD"),
        ]))
        .unwrap_err();
    match &err {
        GradecastError::ShapeMismatch { expected: e, actual: a, .. } => {
            assert_eq!((*e, *a), (expected, actual));
        }
        other => panic!("expected ShapeMismatch, got {other:?}"),
    }
    assert!(err.to_string().contains(&format!("expected {}, got {}", expected, actual)));
}

#[test]
fn test_refit_without_reduction_drops_old_reducer() {
    let dir = TempDir::new().unwrap();
    let (paths, table) = fit_and_save(&dir);
    assert!(paths.all_exist());

    let saved = TrainingFeaturePipeline::new(config().with_reduction(false))
        .unwrap()
        .run_and_save(students(40), &paths, &table)
        .unwrap();
    assert!(saved.reducer_path.is_none());
    assert!(!paths.reducer.exists());
    assert!(InferenceFeaturePipeline::load(&paths).is_err());
}
