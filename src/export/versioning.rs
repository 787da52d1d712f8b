//! Model versioning and registry
//!
//! Registered models are append-only: each `register` call adds version
//! `n + 1` of a name, with no stage. Blobs live at `<root>/<name>/v<n>.bin`
//! and the index at `<root>/index.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::error::{GradecastError, Result};
use crate::training::TrainedRegressor;
use crate::utils::write_atomic;

const INDEX_FILE: &str = "index.json";

/// Lifecycle stage of a registered version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelStage {
    Staging,
    Production,
    Archived,
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelStage::Staging => "Staging",
            ModelStage::Production => "Production",
            ModelStage::Archived => "Archived",
        };
        f.write_str(s)
    }
}

impl FromStr for ModelStage {
    type Err = GradecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "staging" => Ok(ModelStage::Staging),
            "production" => Ok(ModelStage::Production),
            "archived" => Ok(ModelStage::Archived),
            other => Err(GradecastError::invalid_parameter(
                "stage",
                other,
                "expected staging, production or archived",
            )),
        }
    }
}

/// Registry entry (metadata only, without model data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredVersion {
    pub name: String,
    pub version: u32,
    pub run_id: String,
    pub stage: Option<ModelStage>,
    pub tags: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    /// Blob path relative to the registry root
    pub path: String,
    pub registered_at: DateTime<Utc>,
    /// Global registration order
    pub sequence: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryIndex {
    models: BTreeMap<String, Vec<RegisteredVersion>>,
    next_sequence: u64,
}

/// A loaded registered model
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub name: String,
    pub version: u32,
    pub stage: Option<ModelStage>,
    pub metrics: BTreeMap<String, f64>,
    pub model: TrainedRegressor,
}

/// Model registry for managing versioned models
#[derive(Debug)]
pub struct ModelRegistry {
    root: PathBuf,
    index: RegistryIndex,
}

impl ModelRegistry {
    /// Create or open registry at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            serde_json::from_slice(&fs::read(&index_path)?)?
        } else {
            RegistryIndex::default()
        };
        Ok(Self { root, index })
    }

    /// Registry under a tracking directory: `<mlflow_dir>/registry`
    pub fn under(mlflow_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(mlflow_dir.as_ref().join("registry"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn save_index(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.index)?;
        write_atomic(&self.root.join(INDEX_FILE), &json)
    }

    /// Append a new version of `name` holding `bytes`
    pub fn register(
        &mut self,
        name: &str,
        run_id: &str,
        bytes: &[u8],
        metrics: BTreeMap<String, f64>,
    ) -> Result<RegisteredVersion> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(GradecastError::invalid_parameter("name", name, "not a valid model name"));
        }
        let version = self
            .index
            .models
            .get(name)
            .and_then(|versions| versions.iter().map(|v| v.version).max())
            .unwrap_or(0)
            + 1;
        let relative = format!("{}/v{}.bin", name, version);
        write_atomic(&self.root.join(&relative), bytes)?;

        let entry = RegisteredVersion {
            name: name.to_string(),
            version,
            run_id: run_id.to_string(),
            stage: None,
            tags: BTreeMap::new(),
            metrics,
            path: relative,
            registered_at: Utc::now(),
            sequence: self.index.next_sequence,
        };
        self.index.next_sequence += 1;
        self.index.models.entry(name.to_string()).or_default().push(entry.clone());
        self.save_index()?;

        info!(model = %name, version, run_id = %run_id, "Registered model version");
        Ok(entry)
    }

    fn entry_mut(&mut self, name: &str, version: u32) -> Result<&mut RegisteredVersion> {
        self.index
            .models
            .get_mut(name)
            .and_then(|versions| versions.iter_mut().find(|v| v.version == version))
            .ok_or_else(|| GradecastError::NoModelAvailable(format!("{} version {}", name, version)))
    }

    pub fn set_version_tag(&mut self, name: &str, version: u32, key: &str, value: &str) -> Result<()> {
        self.entry_mut(name, version)?
            .tags
            .insert(key.to_string(), value.to_string());
        self.save_index()
    }

    pub fn transition_stage(&mut self, name: &str, version: u32, stage: ModelStage) -> Result<()> {
        self.entry_mut(name, version)?.stage = Some(stage);
        self.save_index()?;
        info!(model = %name, version, stage = %stage, "Transitioned model stage");
        Ok(())
    }

    /// Highest version of `name` whose stage equals `stage` (`None` = unstaged)
    pub fn latest_version(&self, name: &str, stage: Option<ModelStage>) -> Option<&RegisteredVersion> {
        self.index
            .models
            .get(name)?
            .iter()
            .filter(|v| v.stage == stage)
            .max_by_key(|v| v.version)
    }

    /// Most recently registered unstaged version across all models
    pub fn latest_unstaged(&self) -> Option<&RegisteredVersion> {
        self.index
            .models
            .values()
            .flatten()
            .filter(|v| v.stage.is_none())
            .max_by_key(|v| v.sequence)
    }

    pub fn list_versions(&self, name: &str) -> Vec<&RegisteredVersion> {
        self.index
            .models
            .get(name)
            .map(|versions| versions.iter().collect())
            .unwrap_or_default()
    }

    pub fn load(&self, entry: &RegisteredVersion) -> Result<ModelArtifact> {
        let path = self.root.join(&entry.path);
        if !path.exists() {
            return Err(GradecastError::artifact_not_found("Registered model", &path));
        }
        let model = TrainedRegressor::from_bytes(&fs::read(&path)?)?;
        Ok(ModelArtifact {
            name: entry.name.clone(),
            version: entry.version,
            stage: entry.stage,
            metrics: entry.metrics.clone(),
            model,
        })
    }
}
