//! Storage Backend for Experiment Tracking
//!
//! Provides storage backends for persisting experiments and run artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use super::tracker::Experiment;
use crate::error::{GradecastError, Result};
use crate::utils::write_atomic;

/// Storage backend trait
pub trait StorageBackend: Send + Sync {
    /// Save experiments to storage
    fn save_experiments(&self, experiments: &[Experiment]) -> Result<()>;

    /// Load experiments from storage
    fn load_experiments(&self) -> Result<Vec<Experiment>>;

    /// Store an artifact under `<experiment_id>/<run_id>/<name>`
    fn write_artifact(&self, experiment_id: &str, run_id: &str, name: &str, bytes: &[u8]) -> Result<PathBuf>;

    /// Read an artifact written by [`StorageBackend::write_artifact`]
    fn read_artifact(&self, experiment_id: &str, run_id: &str, name: &str) -> Result<Vec<u8>>;

    /// Delete an experiment and its artifacts
    fn delete_experiment(&self, experiment_id: &str) -> Result<()>;
}

/// Local file system storage backend
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn experiments_file(&self) -> PathBuf {
        self.base_dir.join("experiments.json")
    }

    fn artifact_path(&self, experiment_id: &str, run_id: &str, name: &str) -> Result<PathBuf> {
        let plain = |s: &str| !s.is_empty() && !s.contains(['/', '\\']) && s != "." && s != "..";
        if !plain(experiment_id) || !plain(run_id) || !plain(name) {
            return Err(GradecastError::invalid_parameter(
                "artifact",
                format!("{}/{}/{}", experiment_id, run_id, name),
                "path components must be plain names",
            ));
        }
        Ok(self.base_dir.join(experiment_id).join(run_id).join(name))
    }
}

impl StorageBackend for LocalStorage {
    fn save_experiments(&self, experiments: &[Experiment]) -> Result<()> {
        let json = serde_json::to_vec_pretty(experiments)?;
        write_atomic(&self.experiments_file(), &json)
    }

    fn load_experiments(&self) -> Result<Vec<Experiment>> {
        let file_path = self.experiments_file();
        if !file_path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read(&file_path)?;
        Ok(serde_json::from_slice(&contents)?)
    }

    fn write_artifact(&self, experiment_id: &str, run_id: &str, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.artifact_path(experiment_id, run_id, name)?;
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    fn read_artifact(&self, experiment_id: &str, run_id: &str, name: &str) -> Result<Vec<u8>> {
        let path = self.artifact_path(experiment_id, run_id, name)?;
        if !path.exists() {
            return Err(GradecastError::artifact_not_found("Run artifact", &path));
        }
        Ok(fs::read(path)?)
    }

    fn delete_experiment(&self, experiment_id: &str) -> Result<()> {
        let exp_dir = self.base_dir.join(experiment_id);
        if exp_dir.exists() {
            fs::remove_dir_all(&exp_dir)?;
        }
        let mut experiments = self.load_experiments()?;
        experiments.retain(|e| e.experiment_id != experiment_id);
        self.save_experiments(&experiments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_store_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert!(storage.load_experiments().unwrap().is_empty());
    }

    #[test]
    fn test_experiments_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        let experiments = vec![Experiment::new("0", "students")];
        storage.save_experiments(&experiments).unwrap();
        assert!(dir.path().join("experiments.json").exists());

        let loaded = storage.load_experiments().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "students");
    }

    #[test]
    fn test_artifact_layout() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        let path = storage.write_artifact("0", "abc", "model.bin", b"blob").unwrap();
        assert_eq!(path, dir.path().join("0").join("abc").join("model.bin"));
        assert_eq!(storage.read_artifact("0", "abc", "model.bin").unwrap(), b"blob");
        assert!(matches!(
            storage.read_artifact("0", "abc", "other.bin"),
            Err(GradecastError::ArtifactNotFound { .. })
        ));
    }

    #[test]
    fn test_artifact_names_cannot_escape() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert!(storage.write_artifact("0", "..", "x", b"").is_err());
        assert!(storage.write_artifact("0", "run", "a/b", b"").is_err());
    }

    #[test]
    fn test_delete_experiment() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage
            .save_experiments(&[Experiment::new("0", "a"), Experiment::new("1", "b")])
            .unwrap();
        storage.write_artifact("0", "r", "m.bin", b"x").unwrap();
        storage.delete_experiment("0").unwrap();
        assert!(!dir.path().join("0").exists());
        let left = storage.load_experiments().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].experiment_id, "1");
    }
}
