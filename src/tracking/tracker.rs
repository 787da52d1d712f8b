//! Experiment Tracker Implementation
//!
//! Track experiments, runs, params, metrics and artifacts. Every mutation is
//! flushed to the storage backend before the call returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use super::storage::{LocalStorage, StorageBackend};
use crate::error::{GradecastError, Result};

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
    Killed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Killed => "KILLED",
        };
        f.write_str(s)
    }
}

/// A run within an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub run_name: String,
    pub experiment_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub params: BTreeMap<String, String>,
    /// Latest value per metric
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    /// Artifact names relative to the run directory
    pub artifacts: Vec<String>,
}

impl Run {
    fn new(experiment_id: &str, run_name: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().simple().to_string(),
            run_name: run_name.to_string(),
            experiment_id: experiment_id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }
}

/// An experiment containing multiple runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    /// Runs in insertion order
    pub runs: Vec<Run>,
}

impl Experiment {
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            created_at: Utc::now(),
            tags: BTreeMap::new(),
            runs: Vec::new(),
        }
    }

    /// Most recent run with this name; a later insertion wins a start-time tie
    pub fn latest_run(&self, run_name: &str) -> Option<&Run> {
        self.runs
            .iter()
            .filter(|r| r.run_name == run_name)
            .fold(None, |best: Option<&Run>, run| match best {
                Some(b) if b.start_time > run.start_time => Some(b),
                _ => Some(run),
            })
    }
}

/// Identifies the active run
#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveRun {
    experiment: usize,
    run: usize,
}

/// Experiment tracker
pub struct ExperimentTracker {
    storage: Box<dyn StorageBackend>,
    experiments: Vec<Experiment>,
    active: Option<ActiveRun>,
}

impl fmt::Debug for ExperimentTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentTracker")
            .field("experiments", &self.experiments.len())
            .field("active", &self.active)
            .finish()
    }
}

impl ExperimentTracker {
    /// Open (or create) a local tracking directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_storage(Box::new(LocalStorage::new(dir.as_ref())?))
    }

    pub fn with_storage(storage: Box<dyn StorageBackend>) -> Result<Self> {
        let experiments = storage.load_experiments()?;
        Ok(Self {
            storage,
            experiments,
            active: None,
        })
    }

    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    pub fn experiment(&self, name: &str) -> Option<&Experiment> {
        self.experiments.iter().find(|e| e.name == name)
    }

    /// Experiment id for `name`, creating the experiment if needed
    pub fn get_or_create_experiment(&mut self, name: &str, tags: BTreeMap<String, String>) -> Result<String> {
        if let Some(existing) = self.experiments.iter_mut().find(|e| e.name == name) {
            if !tags.is_empty() {
                existing.tags.extend(tags);
                let id = existing.experiment_id.clone();
                self.flush()?;
                return Ok(id);
            }
            return Ok(existing.experiment_id.clone());
        }

        let id = self
            .experiments
            .iter()
            .filter_map(|e| e.experiment_id.parse::<u64>().ok())
            .max()
            .map_or(0, |m| m + 1)
            .to_string();
        let mut experiment = Experiment::new(id.clone(), name);
        experiment.tags = tags;
        self.experiments.push(experiment);
        self.flush()?;
        info!(experiment = %name, experiment_id = %id, "Created experiment");
        Ok(id)
    }

    /// Start a run; only one run may be active at a time
    pub fn start_run(&mut self, experiment_id: &str, run_name: &str) -> Result<String> {
        if let Some(run) = self.active_run() {
            return Err(GradecastError::TrainingError(format!(
                "run '{}' is still active",
                run.run_name
            )));
        }
        let experiment = self
            .experiments
            .iter()
            .position(|e| e.experiment_id == experiment_id)
            .ok_or_else(|| GradecastError::invalid_parameter("experiment_id", experiment_id, "unknown experiment"))?;

        let run = Run::new(experiment_id, run_name);
        let run_id = run.run_id.clone();
        self.experiments[experiment].runs.push(run);
        self.active = Some(ActiveRun {
            experiment,
            run: self.experiments[experiment].runs.len() - 1,
        });
        self.flush()?;
        info!(run = %run_name, run_id = %run_id, "Started run");
        Ok(run_id)
    }

    pub fn active_run(&self) -> Option<&Run> {
        self.active
            .as_ref()
            .and_then(|a| self.experiments.get(a.experiment)?.runs.get(a.run))
    }

    fn active_run_mut(&mut self) -> Result<&mut Run> {
        let active = self
            .active
            .clone()
            .ok_or_else(|| GradecastError::TrainingError("no active run".to_string()))?;
        self.experiments
            .get_mut(active.experiment)
            .and_then(|e| e.runs.get_mut(active.run))
            .ok_or_else(|| GradecastError::TrainingError("active run vanished".to_string()))
    }

    pub fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<()> {
        self.active_run_mut()?.params.extend(params.clone());
        self.flush()
    }

    pub fn log_metric(&mut self, name: &str, value: f64) -> Result<()> {
        self.active_run_mut()?.metrics.insert(name.to_string(), value);
        debug!(metric = %name, value, "Logged metric");
        self.flush()
    }

    /// Store bytes as a named artifact of the active run
    pub fn log_artifact(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let (experiment_id, run_id) = {
            let run = self.active_run_mut()?;
            (run.experiment_id.clone(), run.run_id.clone())
        };
        let path = self.storage.write_artifact(&experiment_id, &run_id, name, bytes)?;
        let run = self.active_run_mut()?;
        if !run.artifacts.iter().any(|a| a == name) {
            run.artifacts.push(name.to_string());
        }
        self.flush()?;
        debug!(artifact = %name, path = %path.display(), "Logged artifact");
        Ok(path)
    }

    pub fn end_run(&mut self, status: RunStatus) -> Result<()> {
        let run = self.active_run_mut()?;
        run.status = status;
        run.end_time = Some(Utc::now());
        let name = run.run_name.clone();
        self.active = None;
        self.flush()?;
        info!(run = %name, status = %status, "Ended run");
        Ok(())
    }

    /// Most recent run named `run_name` in the named experiment
    pub fn latest_run(&self, experiment_name: &str, run_name: &str) -> Option<&Run> {
        self.experiment(experiment_name)?.latest_run(run_name)
    }

    /// Most recent run of an experiment regardless of name
    pub fn latest_any_run(&self, experiment_name: &str) -> Option<&Run> {
        self.experiment(experiment_name)?
            .runs
            .iter()
            .fold(None, |best: Option<&Run>, run| match best {
                Some(b) if b.start_time > run.start_time => Some(b),
                _ => Some(run),
            })
    }

    pub fn load_artifact(&self, run: &Run, name: &str) -> Result<Vec<u8>> {
        self.storage.read_artifact(&run.experiment_id, &run.run_id, name)
    }

    fn flush(&self) -> Result<()> {
        self.storage.save_experiments(&self.experiments)
    }
}
