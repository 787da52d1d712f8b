//! Well-known artifact locations and blob I/O

use crate::error::{GradecastError, Result};
use crate::preprocessing::{CategoryCodec, DimensionalityReducer};
pub use crate::utils::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const ENCODER_DIR: &str = "encoders";
pub const PREPROCESSOR_DIR: &str = "preprocessors";
pub const ENCODER_FILE: &str = "onehot_encoder.bin";
pub const REDUCER_FILE: &str = "pca_model.bin";

/// Paths of the codec and reducer blobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub encoder: PathBuf,
    pub reducer: PathBuf,
}

impl ArtifactPaths {
    pub fn new(encoder: impl Into<PathBuf>, reducer: impl Into<PathBuf>) -> Self {
        Self {
            encoder: encoder.into(),
            reducer: reducer.into(),
        }
    }

    /// `<models_dir>/encoders/onehot_encoder.bin` and `<models_dir>/preprocessors/pca_model.bin`
    pub fn under(models_dir: impl AsRef<Path>) -> Self {
        let root = models_dir.as_ref();
        Self::new(
            root.join(ENCODER_DIR).join(ENCODER_FILE),
            root.join(PREPROCESSOR_DIR).join(REDUCER_FILE),
        )
    }

    /// Separate encoder and preprocessor directories
    pub fn in_dirs(encoder_dir: impl AsRef<Path>, preprocessor_dir: impl AsRef<Path>) -> Self {
        Self::new(
            encoder_dir.as_ref().join(ENCODER_FILE),
            preprocessor_dir.as_ref().join(REDUCER_FILE),
        )
    }

    pub fn all_exist(&self) -> bool {
        self.encoder.exists() && self.reducer.exists()
    }
}

/// Read a blob, mapping a missing file to `ArtifactNotFound`
pub fn read_artifact(kind: &str, path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(GradecastError::artifact_not_found(kind, path));
    }
    Ok(std::fs::read(path)?)
}

/// Delete a blob left by an earlier run, if any
pub fn remove_stale_artifact(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
        warn!(path = %path.display(), "Removed artifact from a previous run");
    }
    Ok(())
}

pub fn load_codec(path: &Path) -> Result<CategoryCodec> {
    let codec = CategoryCodec::from_bytes(&read_artifact("Encoder", path)?)?;
    info!(path = %path.display(), onehot = codec.onehot_columns().len(), "Loaded category codec");
    Ok(codec)
}

pub fn load_reducer(path: &Path) -> Result<DimensionalityReducer> {
    let reducer = DimensionalityReducer::from_bytes(&read_artifact("PCA model", path)?)?;
    info!(
        path = %path.display(),
        n_features_in = reducer.n_features_in(),
        n_components = reducer.n_components(),
        "Loaded dimensionality reducer"
    );
    Ok(reducer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_well_known_layout() {
        let paths = ArtifactPaths::under("models");
        assert_eq!(paths.encoder, PathBuf::from("models/encoders/onehot_encoder.bin"));
        assert_eq!(paths.reducer, PathBuf::from("models/preprocessors/pca_model.bin"));
    }

    #[test]
    fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let err = load_codec(&dir.path().join("nope.bin")).unwrap_err();
        assert!(matches!(err, GradecastError::ArtifactNotFound { .. }));
        assert!(err.to_string().contains("nope.bin"));
    }
}
