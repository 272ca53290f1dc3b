use crate::error::EnvelopeError;
use crate::types::{Envelope, Signer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of flattening an envelope's submitted values into the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealReceipt {
    pub sealed_ref: String,
    pub hash_original: String,
    pub hash_final: String,
}

/// Produces a tamper-evident rendition of the document with every submitted value applied.
#[async_trait]
pub trait SealingService: Send + Sync {
    async fn seal(&self, envelope: &Envelope) -> Result<SealReceipt, EnvelopeError>;

    /// Content hash of the unsealed source document, recorded with each signature.
    async fn document_hash(&self, document_ref: &str) -> Result<String, EnvelopeError>;
}

/// Delivers signer-facing messages.
///
/// Implementations return `Ok(false)` when the message was not accepted for delivery.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_signature_invitation(
        &self,
        signer: &Signer,
        envelope: &Envelope,
        from_email: &str,
    ) -> Result<bool, EnvelopeError>;

    async fn send_completion_notice(
        &self,
        recipient_email: &str,
        recipient_name: &str,
        envelope: &Envelope,
    ) -> Result<bool, EnvelopeError>;
}

/// Turns a stored document reference into a time-limited URL.
pub trait DocumentUrlSigner: Send + Sync {
    fn generate_signed_url(&self, document_ref: &str) -> Result<String, EnvelopeError>;
}
