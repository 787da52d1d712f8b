//! gradecast - student performance prediction
//!
//! Turns a table of categorical student records into a graded performance
//! prediction on the `AVERAGE < GOOD < VG < EXCELLENT` scale.
//!
//! # Modules
//!
//! ## Features
//! - [`preprocessing`] - Cleaning, category codec, PCA reducer, feature selection
//! - [`pipeline`] - Training and inference feature pipelines, end-to-end runner
//!
//! ## Models
//! - [`training`] - Gradient-boosted regressors and the model trainer
//! - [`tracking`] - Local experiment and run store
//! - [`export`] - Model registry
//! - [`inference`] - Published-model predictor
//!
//! ## Services
//! - [`server`] - HTTP prediction API
//! - [`cli`] - Command-line interface

pub mod error;
pub mod config;
pub mod utils;

pub mod preprocessing;
pub mod pipeline;
pub mod training;
pub mod tracking;
pub mod export;
pub mod inference;

pub mod server;
pub mod cli;

pub use error::{GradecastError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{GradecastError, Result};

    pub use crate::config::{ModelChoice, TrainingSettings};

    pub use crate::preprocessing::{
        CategoryCodec, CleaningConfig, DataCleaner, DimensionalityReducer, FeatureConfig, FeatureSelector, Grade,
    };

    pub use crate::pipeline::{ArtifactPaths, InferenceFeaturePipeline, TrainingFeaturePipeline, TrainingRunner};

    pub use crate::training::{ModelFamily, ModelMetrics, ModelTrainer, Regressor, TrainedRegressor};

    pub use crate::tracking::{Experiment, ExperimentTracker, Run, RunStatus};

    pub use crate::export::{ModelRegistry, ModelStage};

    pub use crate::inference::{ModelPredictor, PredictionResponse, StudentInput};
}
