//! Candidate training, evaluation and publication

use super::models::{DataSplit, HyperParameters, ModelFamily, ModelMetrics, Regressor, TrainedRegressor};
use crate::config::ModelChoice;
use crate::error::{GradecastError, Result};
use crate::export::{ModelRegistry, RegisteredVersion};
use crate::preprocessing::Grade;
use crate::tracking::{ExperimentTracker, RunStatus};
use crate::utils::data_loader::{self, column_names, has_column};
use crate::utils::{DataLoader, Timer};
use ndarray::{Array1, Axis};
use polars::prelude::DataFrame;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Artifact name of the serialized regressor inside a run
pub const MODEL_ARTIFACT: &str = "model.bin";

/// Registry tag marking a published version
pub const CANDIDATE_TAG: (&str, &str) = ("candidate", "production");

/// Trains candidate regressors, tracks each as a run and publishes the winner
#[derive(Debug)]
pub struct ModelTrainer {
    input_path: PathBuf,
    experiment_name: String,
    hyperparameters: HyperParameters,
    tracker: ExperimentTracker,
    registry: ModelRegistry,
    split: Option<DataSplit>,
    trained: BTreeMap<String, TrainedRegressor>,
    metrics: BTreeMap<String, ModelMetrics>,
}

impl ModelTrainer {
    /// Tracking data lives in `mlflow_dir`, the registry in `mlflow_dir/registry`
    pub fn new(input_path: impl Into<PathBuf>, mlflow_dir: impl AsRef<Path>, experiment_name: &str) -> Result<Self> {
        let mlflow_dir = mlflow_dir.as_ref();
        Ok(Self {
            input_path: input_path.into(),
            experiment_name: experiment_name.to_string(),
            hyperparameters: HyperParameters::default(),
            tracker: ExperimentTracker::open(mlflow_dir)?,
            registry: ModelRegistry::under(mlflow_dir)?,
            split: None,
            trained: BTreeMap::new(),
            metrics: BTreeMap::new(),
        })
    }

    pub fn with_hyperparameters(mut self, hyperparameters: HyperParameters) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn tracker(&self) -> &ExperimentTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn split(&self) -> Option<&DataSplit> {
        self.split.as_ref()
    }

    /// Test-set metrics per trained candidate
    pub fn metrics(&self) -> &BTreeMap<String, ModelMetrics> {
        &self.metrics
    }

    pub fn trained_model(&self, name: &str) -> Option<&TrainedRegressor> {
        self.trained.get(name)
    }

    /// Load the feature table; the target column must be present
    pub fn load_data(&self, target_column: &str) -> Result<DataFrame> {
        info!(path = %self.input_path.display(), "Loading features");
        let df = DataLoader::new().load_csv(&self.input_path)?;
        if !has_column(&df, target_column) {
            return Err(GradecastError::SchemaError(format!(
                "target column '{}' not found; available columns: [{}]",
                target_column,
                column_names(&df).join(", ")
            )));
        }
        info!(rows = df.height(), cols = df.width(), "Dataset loaded");
        Ok(df)
    }

    /// Stratified split of `df` into train and test sets
    pub fn split_data(
        &mut self,
        df: &DataFrame,
        target_column: &str,
        test_size: f64,
        random_state: u64,
    ) -> Result<&DataSplit> {
        let feature_names: Vec<String> = column_names(df).into_iter().filter(|c| c != target_column).collect();
        if feature_names.is_empty() {
            return Err(GradecastError::SchemaError("no feature columns besides the target".to_string()));
        }
        let x = data_loader::frame_to_matrix(df, &feature_names)?;
        let y = target_codes(df, target_column)?;

        let (train_idx, test_idx) = stratified_split(&y, test_size, random_state)?;
        let split = DataSplit {
            x_train: x.select(Axis(0), &train_idx),
            y_train: train_idx.iter().map(|&i| y[i]).collect(),
            x_test: x.select(Axis(0), &test_idx),
            y_test: test_idx.iter().map(|&i| y[i]).collect(),
            feature_names,
        };
        info!(train = split.x_train.nrows(), test = split.x_test.nrows(), "Split data");
        Ok(self.split.insert(split))
    }

    /// Fit one family on the train split, score it on the test split and log
    /// the run (params, `rmse`, `qwk` and `quadratic_weighted_kappa`, `model.bin`)
    pub fn evaluate_and_log_model(&mut self, family: ModelFamily) -> Result<ModelMetrics> {
        let split = self
            .split
            .as_ref()
            .ok_or_else(|| GradecastError::TrainingError("data must be split before training".to_string()))?;
        let name = family.name();
        info!(model = %name, "Training and evaluating model");

        let tags = BTreeMap::from([("project".to_string(), "student-performance-prediction".to_string())]);
        let experiment_id = self.tracker.get_or_create_experiment(&self.experiment_name, tags)?;
        self.tracker.start_run(&experiment_id, name)?;

        let mut model = TrainedRegressor::new(family, &self.hyperparameters);
        match fit_and_log(&mut self.tracker, split, &mut model) {
            Ok(metrics) => {
                self.tracker.end_run(RunStatus::Finished)?;
                info!(model = %name, rmse = metrics.rmse, qwk = metrics.qwk, "Model evaluated");
                self.trained.insert(name.to_string(), model);
                self.metrics.insert(name.to_string(), metrics);
                Ok(metrics)
            }
            Err(err) => {
                warn!(model = %name, error = %err, "Training run failed");
                self.tracker.end_run(RunStatus::Failed)?;
                Err(err)
            }
        }
    }

    /// LightGBM, XGBoost and CatBoost, in that order
    pub fn train_all_models(&mut self) -> Result<&BTreeMap<String, ModelMetrics>> {
        self.train_models(&ModelFamily::ALL)
    }

    pub fn train_models(&mut self, families: &[ModelFamily]) -> Result<&BTreeMap<String, ModelMetrics>> {
        for &family in families {
            self.evaluate_and_log_model(family)?;
        }
        for (name, m) in &self.metrics {
            info!(model = %name, rmse = m.rmse, qwk = m.qwk, "Model performance summary");
        }
        Ok(&self.metrics)
    }

    /// Load, split and train the chosen families
    pub fn run_pipeline(
        &mut self,
        target_column: &str,
        test_size: f64,
        random_state: u64,
        model: ModelChoice,
    ) -> Result<BTreeMap<String, ModelMetrics>> {
        let timer = Timer::new("training");
        let df = self.load_data(target_column)?;
        self.split_data(&df, target_column, test_size, random_state)?;
        let metrics = self.train_models(&model.families())?.clone();
        timer.finish();
        Ok(metrics)
    }

    /// Name of the best trained candidate by `metric`
    pub fn get_best_model(&self, metric: &str, maximize: bool) -> Result<String> {
        let best = select_best(&self.metrics, metric, maximize)?;
        info!(model = %best, metric = %metric, "Selected best model");
        Ok(best)
    }

    /// Publish the latest run of `best_model_name` as
    /// `{experiment_name}_{best_model_name}` and tag it as a candidate
    pub fn register_best_model(&mut self, best_model_name: &str) -> Result<RegisteredVersion> {
        let run = self
            .tracker
            .latest_run(&self.experiment_name, best_model_name)
            .ok_or_else(|| {
                GradecastError::NoModelAvailable(format!(
                    "no run named '{}' in experiment '{}'",
                    best_model_name, self.experiment_name
                ))
            })?;
        let bytes = self.tracker.load_artifact(run, MODEL_ARTIFACT)?;
        let run_id = run.run_id.clone();
        let metrics = run.metrics.clone();

        let registered_name = format!("{}_{}", self.experiment_name, best_model_name);
        let mut version = self.registry.register(&registered_name, &run_id, &bytes, metrics)?;
        let (key, value) = CANDIDATE_TAG;
        self.registry.set_version_tag(&registered_name, version.version, key, value)?;
        version.tags.insert(key.to_string(), value.to_string());

        info!(model = %registered_name, version = version.version, "Registered best model");
        Ok(version)
    }
}

fn fit_and_log(tracker: &mut ExperimentTracker, split: &DataSplit, model: &mut TrainedRegressor) -> Result<ModelMetrics> {
    let mut params = model.params();
    params.insert("n_features".to_string(), split.feature_names.len().to_string());
    tracker.log_params(&params)?;

    let started = Instant::now();
    model.fit(&split.x_train, &split.y_train)?;
    let elapsed = started.elapsed().as_secs_f64();

    let predictions = model.predict_labels(&split.x_test)?;
    let mut metrics = ModelMetrics::compute(&split.y_test, &predictions);
    metrics.training_time_secs = elapsed;

    tracker.log_metric(ModelMetrics::RMSE, metrics.rmse)?;
    tracker.log_metric(ModelMetrics::QWK, metrics.qwk)?;
    tracker.log_metric(ModelMetrics::QWK_LONG, metrics.qwk)?;
    tracker.log_artifact(MODEL_ARTIFACT, &model.to_bytes()?)?;
    Ok(metrics)
}

/// Target codes from a numeric column or from grade labels
fn target_codes(df: &DataFrame, target_column: &str) -> Result<Array1<f64>> {
    if data_loader::is_numeric(df, target_column) {
        return Ok(Array1::from(data_loader::numeric_values(df, target_column)?));
    }
    data_loader::required_strings(df, target_column)?
        .iter()
        .map(|label| {
            Grade::from_label(label.trim())
                .map(|g| g.code() as f64)
                .ok_or_else(|| GradecastError::UnseenCategory {
                    column: target_column.to_string(),
                    value: label.clone(),
                })
        })
        .collect()
}

/// Seeded per-class shuffle; each class contributes `round(n * test_size)`
/// rows to the test set, at least one and leaving at least one for training.
pub fn stratified_split(labels: &Array1<f64>, test_size: f64, random_state: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(GradecastError::invalid_parameter("test_size", test_size, "must be in (0, 1)"));
    }
    let mut classes: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, v) in labels.iter().enumerate() {
        classes.entry(v.round() as i64).or_default().push(i);
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(random_state);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (class, mut members) in classes {
        if members.len() < 2 {
            return Err(GradecastError::DataError(format!(
                "class {} has {} member(s); stratified split needs at least 2",
                class,
                members.len()
            )));
        }
        members.shuffle(&mut rng);
        let n_test = ((members.len() as f64 * test_size).round() as usize).clamp(1, members.len() - 1);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// Best candidate by `metric`; ties go to the lexicographically smallest name
pub fn select_best(metrics: &BTreeMap<String, ModelMetrics>, metric: &str, maximize: bool) -> Result<String> {
    let (_, first) = metrics
        .iter()
        .next()
        .ok_or_else(|| GradecastError::NoModelAvailable("no models have been trained".to_string()))?;
    if first.get(metric).is_none() {
        return Err(GradecastError::invalid_parameter("metric", metric, "expected 'qwk' or 'rmse'"));
    }

    let mut best: Option<(&String, f64)> = None;
    for (name, m) in metrics {
        let value = m.get(metric).unwrap_or(f64::NAN);
        let better = match best {
            None => true,
            Some((_, b)) if b.is_nan() => !value.is_nan(),
            Some((_, b)) => {
                if maximize {
                    value > b
                } else {
                    value < b
                }
            }
        };
        if better {
            best = Some((name, value));
        }
    }
    best.map(|(name, _)| name.clone())
        .ok_or_else(|| GradecastError::NoModelAvailable("no models have been trained".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(qwk: f64, rmse: f64) -> ModelMetrics {
        ModelMetrics {
            rmse,
            qwk,
            n_samples: 10,
            training_time_secs: 0.0,
        }
    }

    #[test]
    fn test_select_best_by_qwk() {
        let table = BTreeMap::from([
            ("A".to_string(), metrics(0.7, 1.0)),
            ("B".to_string(), metrics(0.9, 0.8)),
            ("C".to_string(), metrics(0.5, 0.6)),
        ]);
        assert_eq!(select_best(&table, "qwk", true).unwrap(), "B");
        assert_eq!(select_best(&table, "rmse", false).unwrap(), "C");
    }

    #[test]
    fn test_select_best_tie_is_lexicographic() {
        let table = BTreeMap::from([
            ("XGBoost".to_string(), metrics(0.8, 1.0)),
            ("CatBoost".to_string(), metrics(0.8, 1.0)),
            ("LightGBM".to_string(), metrics(0.8, 1.0)),
        ]);
        assert_eq!(select_best(&table, "qwk", true).unwrap(), "CatBoost");
    }

    #[test]
    fn test_select_best_errors() {
        let empty = BTreeMap::new();
        assert!(matches!(
            select_best(&empty, "qwk", true),
            Err(GradecastError::NoModelAvailable(_))
        ));
        let table = BTreeMap::from([("A".to_string(), metrics(0.7, 1.0))]);
        assert!(matches!(
            select_best(&table, "f1", true),
            Err(GradecastError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_stratified_split_keeps_class_ratios() {
        let labels = Array1::from_iter((0..40).map(|i| (i % 4) as f64));
        let (train, test) = stratified_split(&labels, 0.2, 7).unwrap();
        assert_eq!(train.len() + test.len(), 40);
        assert_eq!(test.len(), 8);
        for class in 0..4 {
            let in_test = test.iter().filter(|&&i| labels[i] as i64 == class).count();
            assert_eq!(in_test, 2);
        }
        assert_eq!(stratified_split(&labels, 0.2, 7).unwrap(), (train, test));
    }

    #[test]
    fn test_stratified_split_rejects_singleton_class() {
        let labels = Array1::from(vec![0.0, 0.0, 1.0, 1.0, 2.0]);
        assert!(matches!(
            stratified_split(&labels, 0.2, 1),
            Err(GradecastError::DataError(_))
        ));
        assert!(stratified_split(&labels, 1.0, 1).is_err());
    }
}
