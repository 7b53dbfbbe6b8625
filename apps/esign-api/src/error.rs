//! Error types for the e-signature API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use esign_core::SignatureError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Signature(e) => match e {
                SignatureError::Validation(_) => StatusCode::BAD_REQUEST,
                SignatureError::Conflict(_)
                | SignatureError::InvalidTransition { .. }
                | SignatureError::AlreadySent(_)
                | SignatureError::NotSendable(_)
                | SignatureError::NotResendable(_)
                | SignatureError::NotYetSent(_) => StatusCode::CONFLICT,
                SignatureError::DownstreamProvider(_) => StatusCode::BAD_GATEWAY,
                SignatureError::Precondition(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SignatureError::DocumentNotFound(_) | SignatureError::NotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                SignatureError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Signature(e) => e.code(),
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::Database(_) => "DATABASE_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Signature(SignatureError::Store(e)) => {
                tracing::error!("Store error: {}", e);
                "Storage error".to_string()
            }
            ApiError::Signature(e @ SignatureError::InvalidTransition { .. }) => {
                tracing::warn!("{}", e);
                format!("Signature request already processed: {}", e)
            }
            ApiError::Signature(e) => e.to_string(),
            ApiError::InvalidRequest(msg) => msg.clone(),
            ApiError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
