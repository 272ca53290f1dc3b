//! Envelope persistence.

mod memory;
mod postgres;

pub use memory::MemoryEnvelopeStore;
pub use postgres::PostgresEnvelopeStore;

use crate::error::EnvelopeError;
use crate::types::{Envelope, EnvelopeId, EnvelopeStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type StoreResult<T> = Result<T, EnvelopeError>;

/// Owner-scoped listing filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeFilter {
    #[serde(default)]
    pub status: Option<EnvelopeStatus>,
    #[serde(default)]
    pub archived: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for EnvelopeFilter {
    fn default() -> Self {
        Self {
            status: None,
            archived: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl EnvelopeFilter {
    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.status.map_or(true, |s| envelope.status() == s)
            && self.archived.map_or(true, |a| envelope.is_archived() == a)
    }
}

/// Durable home of envelope documents.
///
/// Writes after creation go through [`EnvelopeStore::replace`], a conditional
/// write keyed on the revision the caller loaded.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    fn backend_label(&self) -> &'static str;

    /// Persist a new envelope. Fails if the id already exists.
    async fn insert(&self, envelope: &Envelope) -> StoreResult<()>;

    async fn get(&self, id: &EnvelopeId) -> StoreResult<Option<Envelope>>;

    /// Envelope owning the given signer token.
    async fn find_by_token(&self, token: &str) -> StoreResult<Option<Envelope>>;

    /// Page of an owner's envelopes, newest first, plus the unpaged total.
    async fn list_by_owner(
        &self,
        owner_id: &str,
        filter: &EnvelopeFilter,
    ) -> StoreResult<(Vec<Envelope>, usize)>;

    /// Overwrite the stored envelope only if its revision still equals
    /// `expected_revision`. Returns false when another writer got there first.
    async fn replace(&self, envelope: &Envelope, expected_revision: u64) -> StoreResult<bool>;

    /// Remove the envelope only if it belongs to `owner_id` and is archived,
    /// checked atomically with the removal. Returns whether it was removed.
    async fn delete_archived(&self, id: &EnvelopeId, owner_id: &str) -> StoreResult<bool>;
}

/// Envelope persistence backend configuration.
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// Keep envelopes in process memory only.
    #[default]
    Memory,
    /// Persist envelopes as JSONB documents in PostgreSQL.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub async fn bootstrap(self) -> StoreResult<Arc<dyn EnvelopeStore>> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryEnvelopeStore::new())),
            Self::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresEnvelopeStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                Ok(Arc::new(store))
            }
        }
    }
}
