use async_trait::async_trait;
use chrono::{DateTime, Utc};
use esign_core::{Envelope, EnvelopeError, EnvelopeId, NotificationDispatcher, Signer};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SignatureInvitation,
    CompletionNotice,
}

/// Rendered message handed to a delivery channel.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationMessage {
    pub kind: NotificationKind,
    pub to: String,
    pub recipient_name: String,
    pub from: Option<String>,
    pub envelope_id: EnvelopeId,
    pub title: String,
    pub message: String,
    pub sign_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NotificationMessage {
    fn invitation(sign_base_url: &str, signer: &Signer, envelope: &Envelope, from: &str) -> Self {
        Self {
            kind: NotificationKind::SignatureInvitation,
            to: signer.email.clone(),
            recipient_name: signer.name.clone(),
            from: Some(from.to_string()),
            envelope_id: envelope.id,
            title: envelope.title.clone(),
            message: envelope.message.clone(),
            sign_url: Some(format!(
                "{}/{}",
                sign_base_url.trim_end_matches('/'),
                signer.token
            )),
            expires_at: Some(signer.token_expires),
        }
    }

    fn completion(email: &str, name: &str, envelope: &Envelope) -> Self {
        Self {
            kind: NotificationKind::CompletionNotice,
            to: email.to_string(),
            recipient_name: name.to_string(),
            from: None,
            envelope_id: envelope.id,
            title: envelope.title.clone(),
            message: format!("All {} signers have signed.", envelope.signers().len()),
            sign_url: None,
            expires_at: None,
        }
    }
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone)]
pub struct TracingNotificationDispatcher {
    sign_base_url: String,
}

impl TracingNotificationDispatcher {
    pub fn new(sign_base_url: impl Into<String>) -> Self {
        Self {
            sign_base_url: sign_base_url.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for TracingNotificationDispatcher {
    async fn send_signature_invitation(
        &self,
        signer: &Signer,
        envelope: &Envelope,
        from_email: &str,
    ) -> Result<bool, EnvelopeError> {
        let message = NotificationMessage::invitation(&self.sign_base_url, signer, envelope, from_email);
        // the signing link is a bearer credential and never reaches the log
        info!(
            envelope_id = %message.envelope_id,
            to = %message.to,
            from = %from_email,
            link_expires = ?message.expires_at,
            "signature invitation"
        );
        Ok(true)
    }

    async fn send_completion_notice(
        &self,
        recipient_email: &str,
        recipient_name: &str,
        envelope: &Envelope,
    ) -> Result<bool, EnvelopeError> {
        let message = NotificationMessage::completion(recipient_email, recipient_name, envelope);
        info!(envelope_id = %message.envelope_id, to = %message.to, "completion notice");
        Ok(true)
    }
}

/// Posts notifications as JSON to an HTTP endpoint (mail relay, queue bridge, ...).
#[derive(Debug, Clone)]
pub struct WebhookNotificationDispatcher {
    client: reqwest::Client,
    endpoint: String,
    sign_base_url: String,
}

impl WebhookNotificationDispatcher {
    pub fn new(endpoint: impl Into<String>, sign_base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, sign_base_url)
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        sign_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            sign_base_url: sign_base_url.into(),
        }
    }

    async fn post(&self, message: &NotificationMessage) -> Result<bool, EnvelopeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await
            .map_err(|e| EnvelopeError::integration("notification", e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else {
            warn!(
                endpoint = %self.endpoint,
                status = status.as_u16(),
                to = %message.to,
                "notification webhook rejected message"
            );
            Ok(false)
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotificationDispatcher {
    async fn send_signature_invitation(
        &self,
        signer: &Signer,
        envelope: &Envelope,
        from_email: &str,
    ) -> Result<bool, EnvelopeError> {
        self.post(&NotificationMessage::invitation(
            &self.sign_base_url,
            signer,
            envelope,
            from_email,
        ))
        .await
    }

    async fn send_completion_notice(
        &self,
        recipient_email: &str,
        recipient_name: &str,
        envelope: &Envelope,
    ) -> Result<bool, EnvelopeError> {
        self.post(&NotificationMessage::completion(
            recipient_email,
            recipient_name,
            envelope,
        ))
        .await
    }
}

/// Keeps every message in memory. Recipients listed via [`Self::fail_for`] error out.
#[derive(Debug, Default)]
pub struct RecordingNotificationDispatcher {
    sign_base_url: String,
    sent: Mutex<Vec<NotificationMessage>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingNotificationDispatcher {
    pub fn new(sign_base_url: impl Into<String>) -> Self {
        Self {
            sign_base_url: sign_base_url.into(),
            ..Self::default()
        }
    }

    pub fn fail_for(&self, email: impl Into<String>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(email.into());
        }
    }

    pub fn messages(&self) -> Vec<NotificationMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn messages_of(&self, kind: NotificationKind) -> Vec<NotificationMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.kind == kind)
            .collect()
    }

    fn record(&self, message: NotificationMessage) -> Result<bool, EnvelopeError> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&message.to))
            .unwrap_or(false);
        if failing {
            return Err(EnvelopeError::integration(
                "notification",
                format!("delivery to {} failed", message.to),
            ));
        }
        self.sent
            .lock()
            .map_err(|_| EnvelopeError::integration("notification", "recorder poisoned"))?
            .push(message);
        Ok(true)
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotificationDispatcher {
    async fn send_signature_invitation(
        &self,
        signer: &Signer,
        envelope: &Envelope,
        from_email: &str,
    ) -> Result<bool, EnvelopeError> {
        self.record(NotificationMessage::invitation(
            &self.sign_base_url,
            signer,
            envelope,
            from_email,
        ))
    }

    async fn send_completion_notice(
        &self,
        recipient_email: &str,
        recipient_name: &str,
        envelope: &Envelope,
    ) -> Result<bool, EnvelopeError> {
        self.record(NotificationMessage::completion(
            recipient_email,
            recipient_name,
            envelope,
        ))
    }
}
