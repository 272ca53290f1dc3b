//! Serves documents behind expiring signed URLs.

use crate::error::ApiError;
use crate::ServiceState;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use chrono::Utc;
use esign_adapters::UrlVerificationError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DocumentQuery {
    pub expires: i64,
    pub signature: String,
}

pub async fn download(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
    Query(query): Query<DocumentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .urls
        .verify(&key, query.expires, &query.signature, Utc::now())
        .map_err(|err| match err {
            UrlVerificationError::Expired => ApiError::gone(err.to_string()),
            UrlVerificationError::Malformed | UrlVerificationError::BadSignature => {
                ApiError::forbidden(err.to_string())
            }
        })?;

    let path = state
        .documents
        .resolve(&key)
        .map_err(|_| ApiError::not_found(format!("document '{}' not found", key)))?;
    let bytes = tokio::fs::read(&path).await.map_err(|err| {
        tracing::warn!(document = %key, error = %err, "signed document unavailable");
        ApiError::not_found(format!("document '{}' not found", key))
    })?;

    let content_type = if key.to_ascii_lowercase().ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/octet-stream"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}
