use crate::error::EnvelopeError;
use crate::store::EnvelopeStore;
use crate::types::{Envelope, Signer};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::fmt::Write;

const TOKEN_BYTES: usize = 32;

/// Issues and resolves per-signer signing tokens.
#[derive(Debug, Clone)]
pub struct TokenAuthority {
    default_ttl: Duration,
}

/// An envelope together with the position of the signer a token belongs to.
#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub envelope: Envelope,
    pub signer_index: usize,
}

impl TokenAuthority {
    pub fn new(default_ttl_days: u32) -> Self {
        Self {
            default_ttl: Duration::days(i64::from(default_ttl_days.max(1))),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Opaque 256-bit token rendered as lowercase hex.
    pub fn generate() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes.iter().fold(String::with_capacity(TOKEN_BYTES * 2), |mut out, b| {
            let _ = write!(out, "{:02x}", b);
            out
        })
    }

    /// Give `signer` a fresh, valid token expiring at `expires`.
    pub(crate) fn issue(signer: &mut Signer, expires: DateTime<Utc>) {
        signer.token = Self::generate();
        signer.token_expires = expires;
        signer.token_invalidated = false;
    }

    pub(crate) fn invalidate(signer: &mut Signer) {
        signer.token_invalidated = true;
    }

    pub fn is_expired(signer: &Signer, now: DateTime<Utc>) -> bool {
        now > signer.token_expires
    }

    /// Look a token up and reject it when unknown or expired.
    ///
    /// Invalidation is left to the caller: a signer who already signed replays
    /// through an invalidated token.
    pub async fn resolve(
        store: &dyn EnvelopeStore,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedToken, EnvelopeError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(EnvelopeError::not_found("signing link"));
        }

        let envelope = store
            .find_by_token(token)
            .await?
            .ok_or_else(|| EnvelopeError::not_found("signing link"))?;
        let signer_index = envelope
            .signer_index_by_token(token)
            .ok_or_else(|| EnvelopeError::not_found("signing link"))?;

        let signer = &envelope.signers()[signer_index];
        if Self::is_expired(signer, now) {
            return Err(EnvelopeError::Expired {
                expired_at: signer.token_expires,
            });
        }

        Ok(ResolvedToken {
            envelope,
            signer_index,
        })
    }
}
