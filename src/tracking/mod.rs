//! Local experiment tracking
//!
//! Experiments, runs, params, metrics and artifacts persisted under a single
//! tracking directory (`experiments.json` plus `<experiment_id>/<run_id>/`).

mod storage;
mod tracker;

pub use storage::{LocalStorage, StorageBackend};
pub use tracker::{Experiment, ExperimentTracker, Run, RunStatus};
