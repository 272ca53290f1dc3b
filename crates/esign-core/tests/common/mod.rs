#![allow(dead_code)]

use async_trait::async_trait;
use esign_core::{
    DocumentUrlSigner, EngineConfig, Envelope, EnvelopeError, FieldInput, FieldPosition,
    FieldType, MemoryEnvelopeStore, NewEnvelope, NotificationDispatcher, OwnerContext,
    RequestContext, SealReceipt, SealingService, Signer, SignerInput, SigningEngine, SigningMode,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

#[derive(Default)]
pub struct FakeSealer {
    pub failing: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl SealingService for FakeSealer {
    async fn seal(&self, envelope: &Envelope) -> Result<SealReceipt, EnvelopeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EnvelopeError::integration("sealing", "renderer offline"));
        }
        let signed = envelope.signed_count();
        Ok(SealReceipt {
            sealed_ref: format!("{}.sealed-{}", envelope.document_ref, signed),
            hash_original: format!("orig:{}", envelope.document_ref),
            hash_final: format!("final:{}:{}", envelope.document_ref, signed),
        })
    }

    async fn document_hash(&self, document_ref: &str) -> Result<String, EnvelopeError> {
        Ok(format!("orig:{}", document_ref))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub invitations: Mutex<Vec<String>>,
    pub completions: Mutex<Vec<String>>,
    pub unreachable: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn invited(&self) -> Vec<String> {
        self.invitations.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completions.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn send_signature_invitation(
        &self,
        signer: &Signer,
        _envelope: &Envelope,
        _from_email: &str,
    ) -> Result<bool, EnvelopeError> {
        if self.unreachable.lock().unwrap().contains(&signer.email) {
            return Err(EnvelopeError::integration("notification", "mailbox unavailable"));
        }
        self.invitations.lock().unwrap().push(signer.email.clone());
        Ok(true)
    }

    async fn send_completion_notice(
        &self,
        recipient_email: &str,
        _recipient_name: &str,
        _envelope: &Envelope,
    ) -> Result<bool, EnvelopeError> {
        self.completions
            .lock()
            .unwrap()
            .push(recipient_email.to_string());
        Ok(true)
    }
}

pub struct StaticUrls;

impl DocumentUrlSigner for StaticUrls {
    fn generate_signed_url(&self, document_ref: &str) -> Result<String, EnvelopeError> {
        Ok(format!("https://files.test/{}", document_ref))
    }
}

pub struct Harness {
    pub engine: SigningEngine,
    pub store: Arc<MemoryEnvelopeStore>,
    pub sealer: Arc<FakeSealer>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryEnvelopeStore::new());
    let sealer = Arc::new(FakeSealer::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = SigningEngine::new(
        store.clone(),
        sealer.clone(),
        notifier.clone(),
        Arc::new(StaticUrls),
        config,
    );
    Harness {
        engine,
        store,
        sealer,
        notifier,
    }
}

pub fn owner() -> OwnerContext {
    OwnerContext::new(
        "owner-1",
        Some("owner@example.com".to_string()),
        RequestContext::new("10.0.0.1", "owner-agent"),
    )
}

pub fn signer_request() -> RequestContext {
    RequestContext::new("203.0.113.7", "signer-agent")
}

/// One required signature field `sig-<n>` per signer.
pub fn new_envelope(mode: SigningMode, emails: &[&str]) -> NewEnvelope {
    NewEnvelope {
        contract_id: Some("contract-42".to_string()),
        title: "Service agreement".to_string(),
        message: "Please review and sign".to_string(),
        document_ref: "contracts/agreement.pdf".to_string(),
        signing_mode: mode,
        signers: emails
            .iter()
            .map(|email| SignerInput {
                email: email.to_string(),
                name: email.split('@').next().unwrap_or_default().to_string(),
                role: None,
                order: None,
            })
            .collect(),
        signature_fields: emails
            .iter()
            .enumerate()
            .map(|(i, email)| FieldInput {
                id: Some(format!("sig-{}", i + 1)),
                field_type: FieldType::Signature,
                page: 1,
                position: FieldPosition {
                    x: 72.0,
                    y: 600.0 - 60.0 * i as f64,
                    width: 180.0,
                    height: 40.0,
                    ..FieldPosition::default()
                },
                assignee_email: email.to_string(),
                required: true,
                label: Some("Signature".to_string()),
            })
            .collect(),
        expires_in_days: None,
    }
}
