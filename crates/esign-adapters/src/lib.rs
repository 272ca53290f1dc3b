//! Collaborator adapters for the envelope engine.
//!
//! - [`LocalSealingService`]: seals documents kept under a local directory.
//! - [`KeyedUrlSigner`]: blake3-keyed, expiring document URLs.
//! - [`TracingNotificationDispatcher`], [`WebhookNotificationDispatcher`]: message delivery.
//! - [`RecordingNotificationDispatcher`]: in-memory dispatcher for tests and local runs.

#![deny(unsafe_code)]

mod notify;
mod sealing;
mod urls;

pub use notify::{
    NotificationKind, NotificationMessage, RecordingNotificationDispatcher,
    TracingNotificationDispatcher, WebhookNotificationDispatcher,
};
pub use sealing::LocalSealingService;
pub use urls::{KeyedUrlSigner, UrlVerificationError};
