use serde::{Deserialize, Serialize};

/// Where sealing runs relative to the request that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SealMode {
    /// Seal after the signature is committed, before responding.
    #[default]
    Inline,
    /// Seal on a spawned tokio task; the response does not wait for it.
    Background,
}

/// Signing engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default token and envelope lifetime.
    pub token_ttl_days: u32,
    /// Upper bound accepted for `expires_in_days` on creation.
    pub max_expires_in_days: u32,
    pub max_signature_bytes: usize,
    pub max_text_chars: usize,
    /// Minimum gap between two notifications to the same signer.
    pub reminder_cooldown_secs: u64,
    /// Conditional write attempts before giving up with a conflict.
    pub max_write_attempts: u32,
    pub seal_mode: SealMode,
    /// Sender address for invitations when the owner's email is unknown.
    pub default_from_email: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_ttl_days: 14,
            max_expires_in_days: 365,
            max_signature_bytes: 2 * 1024 * 1024,
            max_text_chars: 1000,
            reminder_cooldown_secs: 300,
            max_write_attempts: 8,
            seal_mode: SealMode::Inline,
            default_from_email: "no-reply@esign.local".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn reminder_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reminder_cooldown_secs.min(u64::from(u32::MAX)) as i64)
    }
}
