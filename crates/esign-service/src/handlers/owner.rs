//! Owner routes. Every envelope lookup is scoped to the calling owner.

use crate::error::ApiError;
use crate::extract::Owner;
use crate::ServiceState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use esign_core::{
    AuditTrail, BulkDeleteOutcome, CreatedEnvelope, EnvelopeFilter, EnvelopeId, EnvelopePage,
    EnvelopeView, NewEnvelope, ReminderOutcome, SealOutcome, SendOutcome,
};
use serde::Deserialize;

const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ResendRequest {
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoidRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<String>,
}

fn parse_id(raw: &str) -> Result<EnvelopeId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("envelope '{}' not found", raw)))
}

pub async fn create_envelope(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Json(request): Json<NewEnvelope>,
) -> Result<(StatusCode, Json<CreatedEnvelope>), ApiError> {
    let created = state.engine.create(&owner, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_envelopes(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Query(mut filter): Query<EnvelopeFilter>,
) -> Result<Json<EnvelopePage>, ApiError> {
    filter.limit = filter.limit.clamp(1, MAX_PAGE_SIZE);
    Ok(Json(state.engine.list(&owner, &filter).await?))
}

pub async fn get_envelope(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<EnvelopeView>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get(&owner, &id).await?))
}

pub async fn audit_trail(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<AuditTrail>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.audit_trail(&owner, &id).await?))
}

pub async fn send(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<SendOutcome>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.send(&owner, &id).await?))
}

pub async fn remind(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<ReminderOutcome>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.remind(&owner, &id).await?))
}

pub async fn resend(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<ResendRequest>,
) -> Result<Json<ReminderOutcome>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.resend(&owner, &id, &body.email).await?))
}

pub async fn seal(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<SealOutcome>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.seal(&owner, &id).await?))
}

pub async fn void(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    body: Option<Json<VoidRequest>>,
) -> Result<Json<EnvelopeView>, ApiError> {
    let id = parse_id(&id)?;
    let reason = body.and_then(|Json(body)| body.reason);
    Ok(Json(state.engine.void(&owner, &id, reason).await?))
}

pub async fn update_note(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<NoteRequest>,
) -> Result<Json<EnvelopeView>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.update_note(&owner, &id, body.note).await?))
}

pub async fn archive(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<EnvelopeView>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.archive(&owner, &id).await?))
}

pub async fn unarchive(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> Result<Json<EnvelopeView>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.unarchive(&owner, &id).await?))
}

/// Ids that do not parse cannot name an envelope and are ignored.
pub async fn bulk_delete(
    State(state): State<ServiceState>,
    Owner(owner): Owner,
    Json(body): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteOutcome>, ApiError> {
    let ids: Vec<EnvelopeId> = body
        .ids
        .iter()
        .filter_map(|raw| raw.parse().ok())
        .collect();
    Ok(Json(state.engine.bulk_delete(&owner, &ids).await?))
}
