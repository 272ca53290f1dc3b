//! Envelope e-signature workflow core.
//!
//! One envelope carries a document, its signers, their fields and a hash-chained
//! audit history. This crate owns the envelope state machine, per-signer token
//! lifecycle, field validation and persistence; rendering, delivery and URL
//! signing are collaborator traits implemented elsewhere.

#![deny(unsafe_code)]

pub mod audit;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
mod machine;
pub mod outcome;
pub mod store;
pub mod token;
pub mod types;
pub mod validator;

pub use audit::{AuditActor, AuditEvent, AuditEventKind, AuditLog};
pub use collaborators::{DocumentUrlSigner, NotificationDispatcher, SealReceipt, SealingService};
pub use config::{EngineConfig, SealMode};
pub use engine::SigningEngine;
pub use error::EnvelopeError;
pub use outcome::{
    AuditTrail, BulkDeleteOutcome, CreatedEnvelope, DeclineOutcome, EnvelopePage,
    EnvelopeSummary, EnvelopeView, ReminderOutcome, SealOutcome, SendOutcome, SignerView,
    SigningLink, SigningSession, SubmitOutcome,
};
pub use store::{
    EnvelopeFilter, EnvelopeStore, MemoryEnvelopeStore, PostgresEnvelopeStore, StoreConfig,
};
pub use token::{ResolvedToken, TokenAuthority};
pub use types::{
    normalize_email, Envelope, EnvelopeId, EnvelopeStatus, FieldInput, FieldPosition,
    FieldSubmission, FieldType, NewEnvelope, OwnerContext, RequestContext, SignatureField, Signer,
    SignerInput, SignerStatus, SigningMode,
};
pub use validator::{FieldValidator, ValidatedValue, ValidationCode};
