//! gradecast command-line interface
//!
//! One subcommand per pipeline stage, plus `run` for the whole pipeline and
//! `serve` for the prediction API.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{ModelChoice, TrainingSettings, DEFAULT_CONFIG_PATH, DEFAULT_EXPERIMENT_NAME};
use crate::inference::StudentInput;
use crate::pipeline::{self, ArtifactPaths, InferenceFeaturePipeline, StepStatus, TrainingRunner};
use crate::preprocessing::{FeatureConfig, DEFAULT_TARGET_COLUMN};
use crate::server::{run_server, ServerConfig};
use crate::training::{ModelMetrics, ModelTrainer};
use crate::utils::{DataLoader, DataSaver};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn step_skip(msg: &str) {
    println!("  {} {} {}", muted("–"), msg, dim("(exists, skipped)"));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn kv(key: &str, val: &str) {
    println!("  {:<18} {}", muted(key), val.white());
}

fn metrics_table(metrics: &BTreeMap<String, ModelMetrics>, best: Option<&str>) {
    println!();
    println!("  {:<12} {:>8} {:>8} {:>8}", muted("Model"), muted("QWK"), muted("RMSE"), muted("Time"));
    println!("  {}", dim(&"─".repeat(40)));
    for (name, m) in metrics {
        let marker = if Some(name.as_str()) == best { ok("★") } else { " ".normal() };
        println!(
            "  {:<12} {:>8.4} {:>8.4} {:>7.2}s {}",
            name, m.qwk, m.rmse, m.training_time_secs, marker
        );
    }
    println!("  {}", dim(&"─".repeat(40)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "gradecast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Student performance prediction: features, training and serving")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clean a raw CSV (trim, upper-case, impute)
    Clean {
        #[arg(long, default_value = "data/raw/student_performance.csv")]
        input: PathBuf,

        #[arg(long, default_value = "data/interim/student_performance_clean.csv")]
        output: PathBuf,
    },

    /// Write a drift baseline: trim and upper-case only, nulls kept
    Baseline {
        #[arg(long, default_value = "data/raw/student_performance.csv")]
        input: PathBuf,

        #[arg(long, default_value = "data/baseline/student_performance_baseline.csv")]
        output: PathBuf,
    },

    /// Fit the feature pipeline and persist the encoder and reducer
    Features {
        #[arg(long, default_value = "data/interim/student_performance_clean.csv")]
        input: PathBuf,

        #[arg(long, default_value = "data/processed/student_performance_features.csv")]
        output: PathBuf,

        #[arg(long, default_value = "models/encoders")]
        encoder_dir: PathBuf,

        #[arg(long, default_value = "models/preprocessors")]
        preprocessor_dir: PathBuf,

        /// Cumulative explained variance the reducer must retain
        #[arg(long, default_value = "0.95")]
        variance_threshold: f64,

        #[arg(long)]
        no_feature_selection: bool,

        #[arg(long)]
        no_encoding: bool,

        #[arg(long)]
        no_pca: bool,
    },

    /// Train candidate regressors on a feature table
    Train {
        #[arg(long, default_value = "data/processed/student_performance_features.csv")]
        input: PathBuf,

        #[arg(long, default_value = "mlruns")]
        mlflow_dir: PathBuf,

        #[arg(long, default_value = DEFAULT_EXPERIMENT_NAME)]
        experiment_name: String,

        #[arg(long, default_value = DEFAULT_TARGET_COLUMN)]
        target: String,

        #[arg(long, default_value = "0.2")]
        test_size: f64,

        #[arg(long, default_value = "13")]
        random_state: u64,

        /// all, lightgbm, xgboost or catboost
        #[arg(long, default_value = "all")]
        model: ModelChoice,

        /// Also publish the best model to the registry
        #[arg(long)]
        register: bool,
    },

    /// Replay persisted artifacts on new data
    Transform {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value = "models/encoders/onehot_encoder.bin")]
        encoder: PathBuf,

        #[arg(long, default_value = "models/preprocessors/pca_model.bin")]
        pca: PathBuf,
    },

    /// Run clean, features, train, select and register from a YAML config
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Predict one student from a JSON literal or JSON file
    Predict {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(long)]
        input: String,
    },

    /// Start the prediction API
    Serve {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Overrides API_HOST
        #[arg(long)]
        host: Option<String>,

        /// Overrides API_PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

impl Cli {
    /// Config file named by the subcommand, if it takes one
    pub fn config_path(&self) -> Option<&Path> {
        match &self.command {
            Commands::Run { config } | Commands::Predict { config, .. } | Commands::Serve { config, .. } => {
                Some(config.as_path())
            }
            _ => None,
        }
    }

    /// Log filter from the config's `logging.level`, else `gradecast=info`
    pub fn log_filter(&self) -> String {
        self.config_path()
            .and_then(|p| TrainingSettings::load(p).ok())
            .map(|s| s.log_filter())
            .unwrap_or_else(|| "gradecast=info".to_string())
    }

    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Clean { input, output } => cmd_clean(&input, &output),
            Commands::Baseline { input, output } => cmd_baseline(&input, &output),
            Commands::Features {
                input,
                output,
                encoder_dir,
                preprocessor_dir,
                variance_threshold,
                no_feature_selection,
                no_encoding,
                no_pca,
            } => {
                let config = FeatureConfig::default()
                    .with_variance_threshold(variance_threshold)
                    .with_feature_selection(!no_feature_selection)
                    .with_encoding(!no_encoding)
                    .with_reduction(!no_pca);
                cmd_features(&input, &output, &ArtifactPaths::in_dirs(encoder_dir, preprocessor_dir), config)
            }
            Commands::Train {
                input,
                mlflow_dir,
                experiment_name,
                target,
                test_size,
                random_state,
                model,
                register,
            } => cmd_train(
                &input,
                &mlflow_dir,
                &experiment_name,
                &target,
                test_size,
                random_state,
                model,
                register,
            ),
            Commands::Transform { input, output, encoder, pca } => {
                cmd_transform(&input, &output, &ArtifactPaths::new(encoder, pca))
            }
            Commands::Run { config } => cmd_run(&config),
            Commands::Predict { config, input } => cmd_predict(&config, &input),
            Commands::Serve { config, host, port } => cmd_serve(&config, host, port).await,
        }
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_clean(input: &Path, output: &Path) -> anyhow::Result<()> {
    section("Clean");
    step_run(&format!("Cleaning {}", input.display()));
    let start = Instant::now();
    let report = pipeline::clean_file(input, output)?;
    step_done(&format!("{:?}", start.elapsed()));
    kv("Rows in", &report.rows_in.to_string());
    kv("Rows out", &report.rows_out.to_string());
    kv("Remaining nulls", &report.remaining_nulls.to_string());
    kv("Saved", &output.display().to_string());
    println!();
    Ok(())
}

pub fn cmd_baseline(input: &Path, output: &Path) -> anyhow::Result<()> {
    section("Baseline");
    step_run(&format!("Normalizing {}", input.display()));
    let start = Instant::now();
    let report = pipeline::baseline_file(input, output)?;
    step_done(&format!("{:?}", start.elapsed()));
    kv("Rows", &report.rows_out.to_string());
    for (column, nulls) in report.null_counts.iter().filter(|(_, n)| **n > 0) {
        kv(&format!("Nulls in {}", column), &nulls.to_string());
    }
    kv("Saved", &output.display().to_string());
    println!();
    Ok(())
}

pub fn cmd_features(input: &Path, output: &Path, paths: &ArtifactPaths, config: FeatureConfig) -> anyhow::Result<()> {
    section("Features");
    step_run("Fitting feature pipeline");
    let start = Instant::now();
    let saved = pipeline::build_features_file(input, output, paths, config)?;
    step_done(&format!("{:?}", start.elapsed()));
    kv("Stage", &saved.stage.to_string());
    kv("Shape", &format!("{} rows × {} cols", saved.n_rows, saved.columns.len()));
    kv("Table", &saved.table_path.display().to_string());
    if let Some(path) = &saved.encoder_path {
        kv("Encoder", &path.display().to_string());
    }
    if let Some(path) = &saved.reducer_path {
        kv("Reducer", &path.display().to_string());
    }
    println!();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_train(
    input: &Path,
    mlflow_dir: &Path,
    experiment_name: &str,
    target: &str,
    test_size: f64,
    random_state: u64,
    model: ModelChoice,
    register: bool,
) -> anyhow::Result<()> {
    section("Train");
    let mut trainer = ModelTrainer::new(input, mlflow_dir, experiment_name)?;

    step_run("Training candidates");
    let start = Instant::now();
    let metrics = trainer.run_pipeline(target, test_size, random_state, model)?;
    step_done(&format!("{:?}", start.elapsed()));

    let best = trainer.get_best_model(ModelMetrics::QWK, true)?;
    metrics_table(&metrics, Some(&best));

    if register {
        let version = trainer.register_best_model(&best)?;
        kv("Registered", &format!("{} v{}", version.name, version.version));
    }
    println!();
    println!("  {} {}", ok("best"), best.white().bold());
    kv("Experiments", &mlflow_dir.display().to_string());
    println!();
    Ok(())
}

pub fn cmd_transform(input: &Path, output: &Path, paths: &ArtifactPaths) -> anyhow::Result<()> {
    section("Transform");
    step_run("Loading artifacts");
    let pipeline = InferenceFeaturePipeline::load(paths)?;
    step_done(&format!("{} expected one-hot columns", pipeline.expected_onehot_columns().len()));

    let frame = DataLoader::new().load_csv(input)?;
    step_run(&format!("Transforming {} rows", frame.height()));
    let mut out = pipeline.transform(&frame, true)?;
    DataSaver::save_csv(&mut out, output)?;
    step_done(&format!("{} rows × {} cols", out.height(), out.width()));
    kv("Saved", &output.display().to_string());
    println!();
    Ok(())
}

pub fn cmd_run(config: &Path) -> anyhow::Result<()> {
    let settings = TrainingSettings::load(config)?;
    section("Run");
    let runner = TrainingRunner::new(settings);
    let start = Instant::now();
    let summary = runner.run()?;

    let status = |s: StepStatus| match s {
        StepStatus::Ran => "ran",
        StepStatus::Skipped => "skipped",
    };
    match summary.cleaning {
        StepStatus::Skipped => step_skip("Cleaning"),
        StepStatus::Ran => kv("Cleaning", status(summary.cleaning)),
    }
    match summary.features {
        StepStatus::Skipped => step_skip("Features"),
        StepStatus::Ran => kv("Features", status(summary.features)),
    }
    metrics_table(&summary.metrics, Some(&summary.best_model));
    println!();
    println!(
        "  {} {} {}",
        ok("registered"),
        summary.registered.name.white().bold(),
        muted(&format!("v{}", summary.registered.version))
    );
    kv("Elapsed", &format!("{:.2?}", start.elapsed()));
    println!();
    Ok(())
}

pub fn cmd_predict(config: &Path, input: &str) -> anyhow::Result<()> {
    let settings = TrainingSettings::load(config)?;
    let text = if Path::new(input).is_file() {
        std::fs::read_to_string(input).with_context(|| format!("reading {}", input))?
    } else {
        input.to_string()
    };
    let student: StudentInput = serde_json::from_str(&text).context("input is not a valid student JSON object")?;

    let mut predictor = ServerConfig::from_settings(&settings).predictor();
    predictor.load()?;
    let response = predictor.predict(&student)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

pub async fn cmd_serve(config: &Path, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let settings = TrainingSettings::load(config)?;
    let mut server = ServerConfig::from_settings(&settings);
    if let Some(host) = host {
        server = server.with_host(host);
    }
    if let Some(port) = port {
        server = server.with_port(port);
    }

    println!();
    println!("  {}", "gradecast".white().bold());
    println!("  {}", dim(&"─".repeat(56)));
    kv("Address", &format!("http://{}:{}", server.host, server.port));
    kv("Models", &server.models_dir.display().to_string());
    kv("Tracking", &server.mlflow_dir.display().to_string());
    println!();

    run_server(server).await
}
