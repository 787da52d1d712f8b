//! Application state management

use crate::error::{GradecastError, Result};
use crate::inference::ModelPredictor;
use tokio::sync::RwLock;

use super::ServerConfig;

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    pub predictor: RwLock<ModelPredictor>,
}

impl AppState {
    pub fn new(config: ServerConfig, predictor: ModelPredictor) -> Self {
        Self {
            config,
            predictor: RwLock::new(predictor),
        }
    }

    /// Load artifacts from the configured directories; never fails
    pub fn load(config: ServerConfig) -> Self {
        let predictor = config.predictor().load_or_degrade();
        Self::new(config, predictor)
    }

    /// Swap in a freshly loaded predictor; the old one stays on failure.
    /// File reads and decoding run on the blocking pool.
    pub async fn reload(&self) -> Result<()> {
        let mut fresh = self.config.predictor();
        let fresh = tokio::task::spawn_blocking(move || fresh.load().map(|_| fresh))
            .await
            .map_err(|e| GradecastError::DataError(format!("artifact load task failed: {}", e)))??;
        *self.predictor.write().await = fresh;
        Ok(())
    }
}
