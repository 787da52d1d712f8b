//! HTTP request handlers

use std::sync::Arc;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::inference::{PredictionResponse, StudentInput};

use super::error::{Result, ServerError};
use super::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub preprocessors_loaded: bool,
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Student Performance Prediction API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/health",
        "predict": "/predict",
    }))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let predictor = state.predictor.read().await;
    let status = if predictor.is_ready() { "healthy" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        model_loaded: predictor.model_loaded(),
        preprocessors_loaded: predictor.preprocessors_loaded(),
    })
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<StudentInput>, JsonRejection>,
) -> Result<Json<PredictionResponse>> {
    let Json(student) = payload.map_err(|rejection| {
        if rejection.status() == StatusCode::UNPROCESSABLE_ENTITY {
            ServerError::Unprocessable(rejection.body_text())
        } else {
            ServerError::BadRequest(rejection.body_text())
        }
    })?;

    let predictor = state.predictor.read().await;
    if !predictor.is_ready() {
        return Err(ServerError::NotReady);
    }
    let response = predictor.predict(&student).map_err(|e| {
        warn!(error = %e, "Prediction error");
        ServerError::from(e)
    })?;
    info!(prediction = %response.prediction, "Prediction made");
    Ok(Json(response))
}

/// Re-read artifacts and the published model from disk
pub async fn reload(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>> {
    state.reload().await.map_err(|e| {
        warn!(error = %e, "Reload failed");
        ServerError::from(e)
    })?;
    info!("Predictor reloaded");
    Ok(health_check(State(state)).await)
}
