use crate::error::EnvelopeError;
use crate::types::RequestContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audit event kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    Created,
    Sent,
    Opened,
    Signed,
    Declined,
    Voided,
    Completed,
    PdfSealed,
    PdfSealingFailed,
    ReminderSent,
}

/// Who performed an audited action.
#[derive(Debug, Clone, Default)]
pub struct AuditActor {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditActor {
    pub fn owner(user_id: &str, email: Option<&str>, request: &RequestContext) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            email: email.map(str::to_string),
            ip: Some(request.ip.clone()),
            user_agent: Some(request.user_agent.clone()),
        }
    }

    /// Signer actions carry no user id; the signer is identified by email.
    pub fn signer(email: &str, request: &RequestContext) -> Self {
        Self {
            user_id: None,
            email: Some(email.to_string()),
            ip: Some(request.ip.clone()),
            user_agent: Some(request.user_agent.clone()),
        }
    }

    pub fn system() -> Self {
        Self::default()
    }
}

/// Hash-chained audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub index: u64,
    pub event: AuditEventKind,
    pub timestamp: DateTime<Utc>,
    pub actor_user_id: Option<String>,
    pub actor_email: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: Value,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// Append-only envelope history.
///
/// Entries are only ever pushed at the end; each one commits to the hash of its
/// predecessor so any rewrite of persisted history breaks [`AuditLog::verify_chain`].
/// Deserialization goes through [`AuditLog::from_entries`], so a tampered
/// document fails to load.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<AuditEvent>", into = "Vec<AuditEvent>")]
pub struct AuditLog {
    entries: Vec<AuditEvent>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuild a log from persisted entries and verify hash-chain integrity.
    pub fn from_entries(entries: Vec<AuditEvent>) -> Result<Self, EnvelopeError> {
        let log = Self { entries };

        for (expected_index, entry) in log.entries.iter().enumerate() {
            if entry.index != expected_index as u64 {
                return Err(EnvelopeError::Serialization(format!(
                    "audit index gap detected at position {} (found {})",
                    expected_index, entry.index
                )));
            }
        }

        if !log.verify_chain() {
            return Err(EnvelopeError::Serialization(
                "persisted audit hash-chain verification failed".to_string(),
            ));
        }

        Ok(log)
    }

    pub fn entries(&self) -> &[AuditEvent] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<AuditEvent> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&AuditEvent> {
        self.entries.last()
    }

    /// Number of entries of the given kind.
    pub fn count(&self, kind: AuditEventKind) -> usize {
        self.entries.iter().filter(|e| e.event == kind).count()
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.index != position as u64 || entry.previous_hash != previous_hash {
                return false;
            }
            if entry.entry_hash != compute_entry_hash(entry) {
                return false;
            }
            previous_hash = Some(entry.entry_hash.clone());
        }
        true
    }

    pub(crate) fn append(
        &mut self,
        event: AuditEventKind,
        actor: &AuditActor,
        details: Value,
        timestamp: DateTime<Utc>,
    ) -> &AuditEvent {
        let mut entry = AuditEvent {
            index: self.entries.len() as u64,
            event,
            timestamp,
            actor_user_id: actor.user_id.clone(),
            actor_email: actor.email.clone(),
            ip: actor.ip.clone(),
            user_agent: actor.user_agent.clone(),
            details,
            previous_hash: self.entries.last().map(|e| e.entry_hash.clone()),
            entry_hash: String::new(),
        };
        entry.entry_hash = compute_entry_hash(&entry);
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }
}

fn compute_entry_hash(entry: &AuditEvent) -> String {
    let material = serde_json::json!({
        "index": entry.index,
        "event": entry.event,
        "timestamp": entry.timestamp,
        "actor_user_id": entry.actor_user_id,
        "actor_email": entry.actor_email,
        "ip": entry.ip,
        "user_agent": entry.user_agent,
        "details": entry.details,
        "previous_hash": entry.previous_hash,
    });

    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

impl TryFrom<Vec<AuditEvent>> for AuditLog {
    type Error = EnvelopeError;

    fn try_from(entries: Vec<AuditEvent>) -> Result<Self, Self::Error> {
        Self::from_entries(entries)
    }
}

impl From<AuditLog> for Vec<AuditEvent> {
    fn from(log: AuditLog) -> Self {
        log.into_entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_log() -> AuditLog {
        let mut log = AuditLog::new();
        let request = RequestContext::new("10.0.0.1", "test-agent");
        let now = Utc::now();
        log.append(
            AuditEventKind::Created,
            &AuditActor::owner("owner-1", Some("owner@example.com"), &request),
            json!({"signers": 2}),
            now,
        );
        log.append(
            AuditEventKind::Signed,
            &AuditActor::signer("a@example.com", &request),
            json!({"fields": ["f1"]}),
            now,
        );
        log
    }

    #[test]
    fn verifies_hash_chain() {
        let log = sample_log();
        assert!(log.verify_chain());
        assert_eq!(log.entries()[1].previous_hash.as_deref(), Some(log.entries()[0].entry_hash.as_str()));
        assert_eq!(log.count(AuditEventKind::Signed), 1);
    }

    #[test]
    fn detects_tampered_entries() {
        let mut tampered = sample_log();
        tampered.entries[0].details = json!({"signers": 3});
        assert!(!tampered.verify_chain());

        let mut reordered = sample_log();
        reordered.entries.swap(0, 1);
        assert!(!reordered.verify_chain());
    }

    #[test]
    fn rebuild_rejects_index_gaps() {
        let mut entries = sample_log().into_entries();
        entries.remove(0);
        let err = AuditLog::from_entries(entries).unwrap_err();
        assert!(err.to_string().contains("index gap"));
    }

    #[test]
    fn serializes_event_kinds_in_screaming_case() {
        let log = sample_log();
        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value[1]["event"], "SIGNED");
        assert_eq!(
            serde_json::to_value(AuditEventKind::PdfSealingFailed).unwrap(),
            "PDF_SEALING_FAILED"
        );

        let back: AuditLog = serde_json::from_value(value).unwrap();
        assert!(back.verify_chain());
    }

    #[test]
    fn deserializing_a_tampered_log_fails() {
        let mut value = serde_json::to_value(sample_log()).unwrap();
        value[0]["details"] = json!({"signers": 3});
        let err = serde_json::from_value::<AuditLog>(value).unwrap_err();
        assert!(err.to_string().contains("hash-chain verification failed"));

        let mut value = serde_json::to_value(sample_log()).unwrap();
        value.as_array_mut().unwrap().remove(0);
        assert!(serde_json::from_value::<AuditLog>(value).is_err());
    }
}
