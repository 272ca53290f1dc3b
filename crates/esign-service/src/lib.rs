#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod extract;
mod handlers;

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use esign_adapters::{
    KeyedUrlSigner, LocalSealingService, TracingNotificationDispatcher,
    WebhookNotificationDispatcher,
};
use esign_core::{EngineConfig, NotificationDispatcher, SigningEngine, TokenAuthority};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use config::ServiceConfig;
pub use error::{ApiError, ServiceError};

#[derive(Clone)]
pub struct ServiceState {
    pub engine: SigningEngine,
    pub documents: Arc<LocalSealingService>,
    pub urls: Arc<KeyedUrlSigner>,
    pub storage_backend: &'static str,
    enable_cors: bool,
}

impl ServiceState {
    pub async fn bootstrap(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let store_config = config.storage.resolve().map_err(ServiceError::Config)?;
        let store = store_config.bootstrap().await?;
        let storage_backend = store.backend_label();

        tokio::fs::create_dir_all(&config.documents.root)
            .await
            .map_err(|e| {
                ServiceError::Config(format!(
                    "cannot create document root {}: {}",
                    config.documents.root.display(),
                    e
                ))
            })?;
        let documents = Arc::new(LocalSealingService::new(config.documents.root.clone()));
        let url_secret = match config
            .documents
            .checked_url_secret()
            .map_err(ServiceError::Config)?
        {
            Some(secret) => secret.to_string(),
            None => {
                warn!(
                    "documents.url_secret is not set; signed document links will not survive a restart"
                );
                TokenAuthority::generate()
            }
        };
        let urls = Arc::new(KeyedUrlSigner::new(
            config.documents.public_base_url.clone(),
            &url_secret,
            config.documents.url_ttl_secs,
        ));

        let sign_base_url = config.notifications.sign_base_url.clone();
        let notifier: Arc<dyn NotificationDispatcher> = match &config.notifications.webhook_url {
            Some(endpoint) if !endpoint.trim().is_empty() => {
                info!(endpoint = %endpoint, "delivering notifications via webhook");
                Arc::new(WebhookNotificationDispatcher::new(
                    endpoint.clone(),
                    sign_base_url,
                ))
            }
            _ => Arc::new(TracingNotificationDispatcher::new(sign_base_url)),
        };

        let engine = SigningEngine::new(
            store,
            documents.clone(),
            notifier,
            urls.clone(),
            config.engine.clone(),
        );

        Ok(Self {
            engine,
            documents,
            urls,
            storage_backend,
            enable_cors: config.server.enable_cors,
        })
    }
}

/// Image fields a single submission may carry at full size.
const MAX_IMAGES_PER_REQUEST: usize = 4;
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// Request body cap: room for several maximum-size signature images once
/// base64-encoded, plus the surrounding JSON.
pub fn request_body_limit(config: &EngineConfig) -> usize {
    let encoded_image = (config.max_signature_bytes + 2) / 3 * 4;
    encoded_image * MAX_IMAGES_PER_REQUEST + BODY_OVERHEAD_BYTES
}

pub fn build_router(state: ServiceState) -> Router {
    let enable_cors = state.enable_cors;
    let body_limit = request_body_limit(state.engine.config());
    let router = Router::new()
        .route("/health", get(health))
        // Token-authenticated signer routes
        .route("/sign/:token", get(handlers::signing::open_session))
        .route("/sign/:token/submit", post(handlers::signing::submit))
        .route("/sign/:token/decline", post(handlers::signing::decline))
        // Owner routes
        .route(
            "/envelopes",
            get(handlers::owner::list_envelopes).post(handlers::owner::create_envelope),
        )
        .route("/envelopes/bulk-delete", post(handlers::owner::bulk_delete))
        .route("/envelopes/:id", get(handlers::owner::get_envelope))
        .route("/envelopes/:id/audit", get(handlers::owner::audit_trail))
        .route("/envelopes/:id/send", post(handlers::owner::send))
        .route("/envelopes/:id/remind", post(handlers::owner::remind))
        .route("/envelopes/:id/resend", post(handlers::owner::resend))
        .route("/envelopes/:id/seal", post(handlers::owner::seal))
        .route("/envelopes/:id/void", post(handlers::owner::void))
        .route("/envelopes/:id/note", put(handlers::owner::update_note))
        .route("/envelopes/:id/archive", post(handlers::owner::archive))
        .route("/envelopes/:id/unarchive", post(handlers::owner::unarchive))
        // Signed document downloads
        .route("/documents/*key", get(handlers::documents::download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "esign-service",
        storage_backend: state.storage_backend,
    })
}
