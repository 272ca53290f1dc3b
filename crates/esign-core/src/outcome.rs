use crate::audit::AuditEvent;
use crate::types::{
    Envelope, EnvelopeId, EnvelopeStatus, SignatureField, Signer, SignerStatus, SigningMode,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Signer as shown to the owner and to the signer themselves. Never carries the token.
#[derive(Debug, Clone, Serialize)]
pub struct SignerView {
    pub email: String,
    pub name: String,
    pub role: String,
    pub order: u32,
    pub status: SignerStatus,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
    pub token_expires: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub notification_count: u32,
}

impl From<&Signer> for SignerView {
    fn from(signer: &Signer) -> Self {
        Self {
            email: signer.email.clone(),
            name: signer.name.clone(),
            role: signer.role.clone(),
            order: signer.order,
            status: signer.status,
            signed_at: signer.signed_at,
            declined_at: signer.declined_at,
            decline_reason: signer.decline_reason.clone(),
            token_expires: signer.token_expires,
            notified_at: signer.notified_at,
            last_notified_at: signer.last_notified_at,
            notification_count: signer.notification_count,
        }
    }
}

/// Owner-facing envelope representation.
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeView {
    pub id: EnvelopeId,
    pub contract_id: Option<String>,
    pub title: String,
    pub message: String,
    pub document_ref: String,
    pub owner_note: Option<String>,
    pub signing_mode: SigningMode,
    pub status: EnvelopeStatus,
    pub signers: Vec<SignerView>,
    pub signature_fields: Vec<SignatureField>,
    pub signed_count: usize,
    pub sealed_document_ref: Option<String>,
    pub pdf_hash_original: Option<String>,
    pub pdf_hash_final: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub declined_at: Option<DateTime<Utc>>,
    pub archived: bool,
    pub revision: u64,
}

impl From<&Envelope> for EnvelopeView {
    fn from(envelope: &Envelope) -> Self {
        Self {
            id: envelope.id,
            contract_id: envelope.contract_id.clone(),
            title: envelope.title.clone(),
            message: envelope.message.clone(),
            document_ref: envelope.document_ref.clone(),
            owner_note: envelope.owner_note.clone(),
            signing_mode: envelope.signing_mode,
            status: envelope.status(),
            signers: envelope.signers().iter().map(SignerView::from).collect(),
            signature_fields: envelope.signature_fields().to_vec(),
            signed_count: envelope.signed_count(),
            sealed_document_ref: envelope.sealed_document_ref().map(str::to_string),
            pdf_hash_original: envelope.pdf_hash_original().map(str::to_string),
            pdf_hash_final: envelope.pdf_hash_final().map(str::to_string),
            created_at: envelope.created_at,
            updated_at: envelope.updated_at(),
            expires_at: envelope.expires_at,
            completed_at: envelope.completed_at(),
            voided_at: envelope.voided_at(),
            void_reason: envelope.void_reason().map(str::to_string),
            declined_at: envelope.declined_at(),
            archived: envelope.is_archived(),
            revision: envelope.revision(),
        }
    }
}

/// Creation result; tokens are returned once so the owner can distribute links out of band.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedEnvelope {
    pub envelope: EnvelopeView,
    pub signing_links: Vec<SigningLink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SigningLink {
    pub email: String,
    pub token: String,
}

/// Envelope header shown to a signer.
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeSummary {
    pub id: EnvelopeId,
    pub title: String,
    pub message: String,
    pub status: EnvelopeStatus,
    pub signing_mode: SigningMode,
    pub owner_email: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub signer_count: usize,
    pub signed_count: usize,
}

impl From<&Envelope> for EnvelopeSummary {
    fn from(envelope: &Envelope) -> Self {
        Self {
            id: envelope.id,
            title: envelope.title.clone(),
            message: envelope.message.clone(),
            status: envelope.status(),
            signing_mode: envelope.signing_mode,
            owner_email: envelope.owner_email.clone(),
            expires_at: envelope.expires_at,
            signer_count: envelope.signers().len(),
            signed_count: envelope.signed_count(),
        }
    }
}

/// What a signer sees when opening their link.
#[derive(Debug, Clone, Serialize)]
pub struct SigningSession {
    pub envelope: EnvelopeSummary,
    pub signer: SignerView,
    pub fields: Vec<SignatureField>,
    pub preview_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub envelope_id: EnvelopeId,
    pub status: EnvelopeStatus,
    pub notified: Vec<String>,
    pub delivered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub envelope_id: EnvelopeId,
    pub status: EnvelopeStatus,
    pub all_signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub sealed_document_url: Option<String>,
    /// The signer had already signed; nothing was written.
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeclineOutcome {
    pub envelope_id: EnvelopeId,
    pub status: EnvelopeStatus,
    pub declined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReminderOutcome {
    pub envelope_id: EnvelopeId,
    pub reminded: Vec<String>,
    pub delivered: usize,
    pub throttled: usize,
    pub token_reissued: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SealOutcome {
    pub envelope_id: EnvelopeId,
    pub sealed_document_ref: Option<String>,
    pub sealed_document_url: Option<String>,
    pub hash_original: Option<String>,
    pub hash_final: Option<String>,
    pub signatures_covered: usize,
    /// False when a newer seal was already recorded.
    pub recorded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditTrail {
    pub envelope_id: EnvelopeId,
    pub chain_valid: bool,
    pub entries: Vec<AuditEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvelopePage {
    pub envelopes: Vec<EnvelopeView>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkDeleteOutcome {
    pub deleted: Vec<EnvelopeId>,
    pub skipped: Vec<EnvelopeId>,
}
