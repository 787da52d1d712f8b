//! Prediction HTTP service
//!
//! Loads the published model once at startup and serves `/predict`. When
//! artifacts are missing the server still starts and reports not-ready.

mod api;
mod error;
mod handlers;
mod state;

pub use api::create_router;
pub use error::ServerError;
pub use handlers::HealthResponse;
pub use state::AppState;

use crate::config::TrainingSettings;
use crate::inference::ModelPredictor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub models_dir: PathBuf,
    pub mlflow_dir: PathBuf,
    pub experiment_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&TrainingSettings::default())
    }
}

impl ServerConfig {
    /// Directories from the training settings; host and port from
    /// `API_HOST` / `API_PORT` when set
    pub fn from_settings(settings: &TrainingSettings) -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            models_dir: settings.paths.models_dir.clone(),
            mlflow_dir: settings.paths.mlflow_dir.clone(),
            experiment_name: settings.model_training.experiment_name.clone(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// An unloaded predictor pointed at this config's directories
    pub fn predictor(&self) -> ModelPredictor {
        ModelPredictor::new(&self.models_dir, &self.mlflow_dir, &self.experiment_name)
    }
}

/// Start the server with the given configuration
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let start_time = chrono::Utc::now();
    info!(
        models_dir = %config.models_dir.display(),
        mlflow_dir = %config.mlflow_dir.display(),
        started_at = %start_time.to_rfc3339(),
        "Loading artifacts"
    );

    let state = Arc::new(AppState::load(config.clone()));
    if !state.predictor.read().await.is_ready() {
        warn!("API will start but predictions will fail until artifacts are loaded");
    }
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(address = %addr, "Prediction server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, pid = std::process::id(), "Server listening and ready to accept connections");

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
        let uptime = chrono::Utc::now().signed_duration_since(start_time);
        info!(uptime_secs = uptime.num_seconds(), "Shutdown signal received, stopping server gracefully");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
            models_dir: PathBuf::from("models"),
            mlflow_dir: PathBuf::from("mlruns"),
            experiment_name: "exp".to_string(),
        }
        .with_host("127.0.0.1")
        .with_port(9001);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9001);
        assert_eq!(config.models_dir, PathBuf::from("models"));
        assert_eq!(config.mlflow_dir, PathBuf::from("mlruns"));
    }
}
