use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use esign_core::EnvelopeError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Core(#[from] EnvelopeError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
    #[error(transparent)]
    Core(#[from] EnvelopeError),
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED",
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::FORBIDDEN,
            code: "FORBIDDEN",
            message: message.into(),
        }
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::GONE,
            code: "EXPIRED",
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: message.into(),
        }
    }
}

/// HTTP status for an engine error.
pub fn status_for(err: &EnvelopeError) -> StatusCode {
    match err {
        EnvelopeError::NotFound(_) => StatusCode::NOT_FOUND,
        EnvelopeError::Expired { .. } | EnvelopeError::Invalidated | EnvelopeError::Closed { .. } => {
            StatusCode::GONE
        }
        EnvelopeError::ValidationFailed { .. }
        | EnvelopeError::InvalidState(_)
        | EnvelopeError::AlreadySigned => StatusCode::BAD_REQUEST,
        EnvelopeError::Throttled(_) => StatusCode::TOO_MANY_REQUESTS,
        EnvelopeError::Conflict(_) => StatusCode::CONFLICT,
        EnvelopeError::IntegrationFailure { .. } => StatusCode::BAD_GATEWAY,
        EnvelopeError::Storage(_) | EnvelopeError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http {
                status,
                code,
                message,
            } => (status, Json(json!({ "error": message, "code": code }))).into_response(),
            ApiError::Core(err) => {
                let status = status_for(&err);
                if !err.is_client_error() {
                    tracing::error!(
                        status = status.as_u16(),
                        code = err.code(),
                        error = %err,
                        "request failed"
                    );
                }
                let mut body = json!({ "error": err.to_string(), "code": err.code() });
                match &err {
                    EnvelopeError::Closed {
                        status,
                        already_signed,
                        signed_at,
                    } => {
                        body["status"] = json!(status);
                        body["already_signed"] = json!(already_signed);
                        body["signed_at"] = json!(signed_at);
                    }
                    EnvelopeError::Expired { expired_at } => {
                        body["expired_at"] = json!(expired_at);
                    }
                    _ => {}
                }
                (status, Json(body)).into_response()
            }
        }
    }
}
