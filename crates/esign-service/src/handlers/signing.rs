//! Signer routes, authenticated by the token in the path.

use crate::error::ApiError;
use crate::extract::Client;
use crate::ServiceState;
use axum::extract::{Path, State};
use axum::Json;
use esign_core::{DeclineOutcome, FieldSubmission, SigningSession, SubmitOutcome};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub signatures: Vec<FieldSubmission>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeclineRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn open_session(
    State(state): State<ServiceState>,
    Path(token): Path<String>,
    Client(request): Client,
) -> Result<Json<SigningSession>, ApiError> {
    Ok(Json(state.engine.open(&token, &request).await?))
}

pub async fn submit(
    State(state): State<ServiceState>,
    Path(token): Path<String>,
    Client(request): Client,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<SubmitOutcome>, ApiError> {
    Ok(Json(
        state
            .engine
            .submit(&token, &body.signatures, &request)
            .await?,
    ))
}

pub async fn decline(
    State(state): State<ServiceState>,
    Path(token): Path<String>,
    Client(request): Client,
    body: Option<Json<DeclineRequest>>,
) -> Result<Json<DeclineOutcome>, ApiError> {
    let reason = body.and_then(|Json(body)| body.reason);
    Ok(Json(state.engine.decline(&token, reason, &request).await?))
}
