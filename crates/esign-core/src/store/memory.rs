use super::{EnvelopeFilter, EnvelopeStore, StoreResult};
use crate::error::EnvelopeError;
use crate::types::{Envelope, EnvelopeId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    envelopes: HashMap<EnvelopeId, Envelope>,
    tokens: HashMap<String, EnvelopeId>,
}

impl Tables {
    /// Store `envelope`, replacing any previous version and its token lookups.
    fn put(&mut self, envelope: &Envelope) {
        if let Some(previous) = self.envelopes.insert(envelope.id, envelope.clone()) {
            self.drop_tokens(&previous);
        }
        for token in envelope.tokens() {
            self.tokens.insert(token.to_string(), envelope.id);
        }
    }

    fn drop_tokens(&mut self, envelope: &Envelope) {
        for token in envelope.tokens() {
            if self.tokens.get(token) == Some(&envelope.id) {
                self.tokens.remove(token);
            }
        }
    }
}

/// In-memory store for development and testing.
#[derive(Debug, Default)]
pub struct MemoryEnvelopeStore {
    tables: RwLock<Tables>,
}

impl MemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvelopeStore for MemoryEnvelopeStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, envelope: &Envelope) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.envelopes.contains_key(&envelope.id) {
            return Err(EnvelopeError::Storage(format!(
                "envelope {} already exists",
                envelope.id
            )));
        }
        tables.put(envelope);
        Ok(())
    }

    async fn get(&self, id: &EnvelopeId) -> StoreResult<Option<Envelope>> {
        Ok(self.tables.read().await.envelopes.get(id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<Envelope>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tokens
            .get(token)
            .and_then(|id| tables.envelopes.get(id))
            .cloned())
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        filter: &EnvelopeFilter,
    ) -> StoreResult<(Vec<Envelope>, usize)> {
        let tables = self.tables.read().await;
        let mut matching: Vec<&Envelope> = tables
            .envelopes
            .values()
            .filter(|e| e.owner_id == owner_id && filter.matches(e))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn replace(&self, envelope: &Envelope, expected_revision: u64) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.envelopes.get(&envelope.id) {
            Some(current) if current.revision() == expected_revision => {}
            Some(_) => return Ok(false),
            None => return Err(EnvelopeError::not_found(format!("envelope {}", envelope.id))),
        }
        tables.put(envelope);
        Ok(true)
    }

    async fn delete_archived(&self, id: &EnvelopeId, owner_id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let deletable = tables
            .envelopes
            .get(id)
            .map_or(false, |e| e.owner_id == owner_id && e.is_archived());
        if !deletable {
            return Ok(false);
        }
        if let Some(removed) = tables.envelopes.remove(id) {
            tables.drop_tokens(&removed);
        }
        Ok(true)
    }
}
