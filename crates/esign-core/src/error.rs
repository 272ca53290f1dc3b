use crate::types::EnvelopeStatus;
use crate::validator::ValidationCode;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Envelope engine errors.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("signing link expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    #[error("signing link has already been used")]
    Invalidated,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed [{code}]: {message}")]
    ValidationFailed { code: ValidationCode, message: String },

    #[error("signer has already signed this envelope")]
    AlreadySigned,

    #[error("envelope is no longer open for signing (status {status})")]
    Closed {
        status: EnvelopeStatus,
        already_signed: bool,
        signed_at: Option<DateTime<Utc>>,
    },

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("envelope {0} was modified concurrently too many times")]
    Conflict(String),

    #[error("{collaborator} integration failed: {message}")]
    IntegrationFailure {
        collaborator: &'static str,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EnvelopeError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn action_not_allowed(action: &str, status: EnvelopeStatus) -> Self {
        Self::InvalidState(format!(
            "'{}' is not allowed while envelope status is {}",
            action, status
        ))
    }

    pub fn validation(code: ValidationCode, message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            code,
            message: message.into(),
        }
    }

    pub fn integration(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::IntegrationFailure {
            collaborator,
            message: message.into(),
        }
    }

    /// Machine-readable error code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Expired { .. } => "EXPIRED",
            Self::Invalidated => "INVALIDATED",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::ValidationFailed { code, .. } => code.as_str(),
            Self::AlreadySigned => "ALREADY_SIGNED",
            Self::Closed { .. } => "ENVELOPE_CLOSED",
            Self::Throttled(_) => "THROTTLED",
            Self::Conflict(_) => "CONFLICT",
            Self::IntegrationFailure { .. } => "INTEGRATION_FAILURE",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// True for errors a client can correct or must accept (never retried server-side).
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::Conflict(_)
                | Self::IntegrationFailure { .. }
                | Self::Storage(_)
                | Self::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
