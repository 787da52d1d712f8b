//! Error types for the server

use crate::error::GradecastError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Model not ready")]
    NotReady,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unprocessable input: {0}")]
    Unprocessable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<GradecastError> for ServerError {
    fn from(err: GradecastError) -> Self {
        match err {
            GradecastError::ModelNotFitted
            | GradecastError::NoModelAvailable(_)
            | GradecastError::ArtifactNotFound { .. } => ServerError::NotReady,
            GradecastError::UnseenCategory { .. } | GradecastError::InvalidParameter { .. } => {
                ServerError::Unprocessable(err.to_string())
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotReady => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Model or preprocessors not loaded".to_string(),
            ),
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServerError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            ServerError::Internal(msg) => {
                tracing::error!(detail = %msg, "Prediction failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Prediction failed".to_string())
            }
        };

        let body = Json(json!({
            "error": true,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: ServerError| e.into_response().status();
        assert_eq!(status(GradecastError::ModelNotFitted.into()), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(
                GradecastError::UnseenCategory {
                    column: "Class_X_Percentage".into(),
                    value: "TOP".into()
                }
                .into()
            ),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(GradecastError::ShapeMismatch {
                expected: 10,
                actual: 8,
                expected_columns: vec![]
            }
            .into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status(ServerError::BadRequest("x".into())), StatusCode::BAD_REQUEST);
    }
}
