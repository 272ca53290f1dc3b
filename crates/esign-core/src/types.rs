use crate::audit::AuditLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Envelope identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(Uuid);

impl EnvelopeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EnvelopeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// How signers are invited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SigningMode {
    /// Exactly one signer.
    Single,
    /// One signer at a time, lowest `order` first.
    Sequential,
    /// Every signer is invited at once.
    #[default]
    Parallel,
}

/// Envelope lifecycle status.
///
/// Serialized as a flat string; sequential progress is encoded as `AWAITING_SIGNER_<order>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeStatus {
    Draft,
    Sent,
    AwaitingSigner(u32),
    Signed,
    Completed,
    Voided,
    Declined,
}

const AWAITING_PREFIX: &str = "AWAITING_SIGNER_";

impl EnvelopeStatus {
    /// No further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Voided | Self::Declined)
    }

    /// Invitations went out and signatures are still being collected.
    pub fn is_awaiting_signatures(self) -> bool {
        matches!(self, Self::Sent | Self::AwaitingSigner(_) | Self::Signed)
    }
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => f.write_str("DRAFT"),
            Self::Sent => f.write_str("SENT"),
            Self::AwaitingSigner(order) => write!(f, "{}{}", AWAITING_PREFIX, order),
            Self::Signed => f.write_str("SIGNED"),
            Self::Completed => f.write_str("COMPLETED"),
            Self::Voided => f.write_str("VOIDED"),
            Self::Declined => f.write_str("DECLINED"),
        }
    }
}

impl FromStr for EnvelopeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "DRAFT" => Ok(Self::Draft),
            "SENT" => Ok(Self::Sent),
            "SIGNED" => Ok(Self::Signed),
            "COMPLETED" => Ok(Self::Completed),
            "VOIDED" => Ok(Self::Voided),
            "DECLINED" => Ok(Self::Declined),
            other => other
                .strip_prefix(AWAITING_PREFIX)
                .and_then(|order| order.parse::<u32>().ok())
                .map(Self::AwaitingSigner)
                .ok_or_else(|| format!("unknown envelope status '{}'", s)),
        }
    }
}

impl Serialize for EnvelopeStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EnvelopeStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-signer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignerStatus {
    Pending,
    Signed,
    Declined,
}

/// One invited party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signer {
    pub email: String,
    pub name: String,
    pub role: String,
    pub order: u32,
    pub status: SignerStatus,
    pub token: String,
    pub token_expires: DateTime<Utc>,
    #[serde(default)]
    pub token_invalidated: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// First invitation attempt.
    pub notified_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notification_count: u32,
}

impl Signer {
    pub fn is_pending(&self) -> bool {
        self.status == SignerStatus::Pending
    }

    pub fn has_signed(&self) -> bool {
        self.status == SignerStatus::Signed
    }
}

/// Placeable widget kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Signature,
    Initial,
    Date,
    Text,
    Location,
}

impl FieldType {
    /// Fields whose value is an image payload.
    pub fn is_image(self) -> bool {
        matches!(self, Self::Signature | Self::Initial)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Initial => "initial",
            Self::Date => "date",
            Self::Text => "text",
            Self::Location => "location",
        }
    }
}

/// Field placement. Absolute coordinates are in PDF points; the optional
/// normalized coordinates are fractions of the page size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FieldPosition {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub x_pct: Option<f64>,
    #[serde(default)]
    pub y_pct: Option<f64>,
    #[serde(default)]
    pub width_pct: Option<f64>,
    #[serde(default)]
    pub height_pct: Option<f64>,
}

impl FieldPosition {
    pub(crate) fn normalized(&self) -> [Option<f64>; 4] {
        [self.x_pct, self.y_pct, self.width_pct, self.height_pct]
    }
}

/// Signature field placed on the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub page: u32,
    #[serde(flatten)]
    pub position: FieldPosition,
    pub assignee_email: String,
    pub required: bool,
    pub label: Option<String>,
    pub value: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
}

/// Signing session aggregate: document, parties, fields and history.
///
/// Workflow state is only writable through the state machine; callers read it
/// through accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub owner_id: String,
    pub owner_email: Option<String>,
    pub contract_id: Option<String>,
    pub title: String,
    pub message: String,
    pub document_ref: String,
    pub owner_note: Option<String>,
    pub signing_mode: SigningMode,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub(crate) status: EnvelopeStatus,
    pub(crate) signers: Vec<Signer>,
    pub(crate) signature_fields: Vec<SignatureField>,
    pub(crate) sealed_document_ref: Option<String>,
    pub(crate) pdf_hash_original: Option<String>,
    pub(crate) pdf_hash_final: Option<String>,
    #[serde(default)]
    pub(crate) sealed_signer_count: usize,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) voided_at: Option<DateTime<Utc>>,
    pub(crate) void_reason: Option<String>,
    pub(crate) declined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) archived: bool,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) revision: u64,
    pub(crate) audit: AuditLog,
}

impl Envelope {
    pub fn status(&self) -> EnvelopeStatus {
        self.status
    }

    pub fn signers(&self) -> &[Signer] {
        &self.signers
    }

    pub fn signature_fields(&self) -> &[SignatureField] {
        &self.signature_fields
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn sealed_document_ref(&self) -> Option<&str> {
        self.sealed_document_ref.as_deref()
    }

    pub fn pdf_hash_original(&self) -> Option<&str> {
        self.pdf_hash_original.as_deref()
    }

    pub fn pdf_hash_final(&self) -> Option<&str> {
        self.pdf_hash_final.as_deref()
    }

    pub fn sealed_signer_count(&self) -> usize {
        self.sealed_signer_count
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn voided_at(&self) -> Option<DateTime<Utc>> {
        self.voided_at
    }

    pub fn void_reason(&self) -> Option<&str> {
        self.void_reason.as_deref()
    }

    pub fn declined_at(&self) -> Option<DateTime<Utc>> {
        self.declined_at
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Completion predicate: every signer has signed.
    pub fn all_signed(&self) -> bool {
        self.signers.iter().all(Signer::has_signed)
    }

    pub fn signed_count(&self) -> usize {
        self.signers.iter().filter(|s| s.has_signed()).count()
    }

    pub fn signer_index_by_token(&self, token: &str) -> Option<usize> {
        self.signers.iter().position(|s| s.token == token)
    }

    pub fn signer_index_by_email(&self, email: &str) -> Option<usize> {
        let email = normalize_email(email);
        self.signers.iter().position(|s| s.email == email)
    }

    pub fn fields_for(&self, email: &str) -> Vec<&SignatureField> {
        let email = normalize_email(email);
        self.signature_fields
            .iter()
            .filter(|f| f.assignee_email == email)
            .collect()
    }

    /// Lowest-order pending signer; ties go to the earlier array position.
    pub fn next_pending_signer(&self) -> Option<usize> {
        self.signers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_pending())
            .min_by_key(|(idx, s)| (s.order, *idx))
            .map(|(idx, _)| idx)
    }

    /// Whether the signer at `idx` may act now under the envelope's signing mode.
    pub fn is_turn_of(&self, idx: usize) -> bool {
        match self.signing_mode {
            SigningMode::Sequential => self.next_pending_signer() == Some(idx),
            SigningMode::Single | SigningMode::Parallel => true,
        }
    }

    /// Sealed artifact is missing or older than the latest signature.
    pub fn needs_seal(&self) -> bool {
        let signed = self.signed_count();
        signed > 0 && (self.sealed_document_ref.is_none() || self.sealed_signer_count < signed)
    }

    /// Reference of the most complete rendition available.
    pub fn current_document_ref(&self) -> &str {
        self.sealed_document_ref
            .as_deref()
            .unwrap_or(&self.document_ref)
    }

    /// Bump revision before a conditional write; returns the revision the write expects.
    pub(crate) fn begin_write(&mut self, now: DateTime<Utc>) -> u64 {
        let expected = self.revision;
        self.revision += 1;
        self.updated_at = now;
        expected
    }

    pub(crate) fn tokens(&self) -> impl Iterator<Item = &str> {
        self.signers.iter().map(|s| s.token.as_str())
    }
}

/// Lower-case, trimmed email; the durable signer identity key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Network origin of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: String,
}

impl RequestContext {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new("unknown", "unknown")
    }
}

/// Authenticated envelope owner performing an action.
#[derive(Debug, Clone)]
pub struct OwnerContext {
    pub user_id: String,
    pub email: Option<String>,
    pub request: RequestContext,
}

impl OwnerContext {
    pub fn new(user_id: impl Into<String>, email: Option<String>, request: RequestContext) -> Self {
        Self {
            user_id: user_id.into(),
            email,
            request,
        }
    }
}

/// Signer as supplied by the owner at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerInput {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
}

/// Field as supplied by the owner at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    pub page: u32,
    #[serde(flatten)]
    pub position: FieldPosition,
    pub assignee_email: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Envelope creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEnvelope {
    #[serde(default)]
    pub contract_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub document_ref: String,
    #[serde(default)]
    pub signing_mode: SigningMode,
    pub signers: Vec<SignerInput>,
    pub signature_fields: Vec<FieldInput>,
    #[serde(default)]
    pub expires_in_days: Option<u32>,
}

/// One `{fieldId, value}` pair submitted by a signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSubmission {
    #[serde(alias = "fieldId")]
    pub field_id: String,
    pub value: String,
}

impl FieldSubmission {
    pub fn new(field_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            value: value.into(),
        }
    }
}
