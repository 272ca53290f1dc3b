//! Pure envelope transitions.
//!
//! Every function here either rejects without touching the envelope, returns
//! [`Step::Unchanged`] without touching it, or mutates it in place and returns
//! [`Step::Commit`]. The engine persists committed envelopes with a conditional
//! write and re-runs the transition on fresh state when it loses a race.

use crate::audit::{AuditActor, AuditEventKind, AuditLog};
use crate::collaborators::SealReceipt;
use crate::error::EnvelopeError;
use crate::token::TokenAuthority;
use crate::types::{
    normalize_email, Envelope, EnvelopeId, EnvelopeStatus, FieldSubmission, NewEnvelope,
    OwnerContext, RequestContext, SignatureField, Signer, SignerStatus, SigningMode,
};
use crate::validator::{FieldValidator, ValidationCode};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashSet;

/// Outcome of a transition that may legitimately leave the envelope untouched.
#[derive(Debug)]
pub(crate) enum Step<T> {
    Commit(T),
    Unchanged(T),
}

/// What a submit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitEffect {
    /// The signer had already signed; nothing changed.
    Replayed,
    Applied {
        /// Sequential mode: the signer whose turn it is now.
        next_signer: Option<usize>,
        completed: bool,
    },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ResendEffect {
    pub index: usize,
    pub token_reissued: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ReminderEffect {
    pub due: Vec<usize>,
    pub throttled: usize,
}

const DEFAULT_ROLE: &str = "Signer";
const DEFAULT_VOID_REASON: &str = "Voided by owner";

fn invalid(message: impl Into<String>) -> EnvelopeError {
    EnvelopeError::validation(ValidationCode::InvalidEnvelope, message)
}

fn mark_notified(signer: &mut Signer, now: DateTime<Utc>) {
    if signer.notified_at.is_none() {
        signer.notified_at = Some(now);
    }
    signer.last_notified_at = Some(now);
    signer.notification_count += 1;
}

fn within_cooldown(signer: &Signer, cooldown: Duration, now: DateTime<Utc>) -> bool {
    signer
        .last_notified_at
        .map_or(false, |last| now - last < cooldown)
}

/// Build a DRAFT envelope from an owner request.
pub(crate) fn create(
    owner: &OwnerContext,
    request: NewEnvelope,
    default_ttl: Duration,
    max_expires_in_days: u32,
    document_hash: Option<String>,
    now: DateTime<Utc>,
) -> Result<Envelope, EnvelopeError> {
    let title = request.title.trim().to_string();
    if title.is_empty() {
        return Err(invalid("title is required"));
    }
    let document_ref = request.document_ref.trim().to_string();
    if document_ref.is_empty() {
        return Err(invalid("document_ref is required"));
    }
    if request.signers.is_empty() {
        return Err(invalid("at least one signer is required"));
    }
    if request.signing_mode == SigningMode::Single && request.signers.len() != 1 {
        return Err(invalid("SINGLE signing mode requires exactly one signer"));
    }

    let ttl = match request.expires_in_days {
        Some(days) if days == 0 || days > max_expires_in_days => {
            return Err(invalid(format!(
                "expires_in_days must be between 1 and {}",
                max_expires_in_days
            )))
        }
        Some(days) => Duration::days(i64::from(days)),
        None => default_ttl,
    };
    let expires_at = now + ttl;

    let mut seen_emails = HashSet::new();
    let mut signers = Vec::with_capacity(request.signers.len());
    for (position, input) in request.signers.into_iter().enumerate() {
        let email = normalize_email(&input.email);
        if email.is_empty() || !email.contains('@') {
            return Err(invalid(format!("signer {} has an invalid email", position + 1)));
        }
        if !seen_emails.insert(email.clone()) {
            return Err(invalid(format!("signer email '{}' appears more than once", email)));
        }
        let name = match input.name.trim() {
            "" => email.clone(),
            name => name.to_string(),
        };
        let role = input
            .role
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_ROLE.to_string());

        let mut signer = Signer {
            email,
            name,
            role,
            order: input.order.unwrap_or(position as u32 + 1),
            status: SignerStatus::Pending,
            token: String::new(),
            token_expires: expires_at,
            token_invalidated: false,
            signed_at: None,
            declined_at: None,
            decline_reason: None,
            ip: None,
            user_agent: None,
            notified_at: None,
            last_notified_at: None,
            notification_count: 0,
        };
        TokenAuthority::issue(&mut signer, expires_at);
        signers.push(signer);
    }

    let mut field_ids = HashSet::new();
    let mut fields = Vec::with_capacity(request.signature_fields.len());
    for (position, input) in request.signature_fields.into_iter().enumerate() {
        let id = input
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("field-{}", position + 1));
        if !field_ids.insert(id.clone()) {
            return Err(EnvelopeError::validation(
                ValidationCode::DuplicateField,
                format!("field id '{}' appears more than once", id),
            ));
        }

        let assignee_email = normalize_email(&input.assignee_email);
        if !seen_emails.contains(&assignee_email) {
            return Err(invalid(format!(
                "field '{}' is assigned to '{}', who is not a signer",
                id, assignee_email
            )));
        }
        if input.page == 0 {
            return Err(invalid(format!("field '{}' page numbers start at 1", id)));
        }
        let position_ok = input.position.width > 0.0
            && input.position.height > 0.0
            && input.position.x >= 0.0
            && input.position.y >= 0.0
            && input
                .position
                .normalized()
                .iter()
                .flatten()
                .all(|pct| (0.0..=1.0).contains(pct));
        if !position_ok {
            return Err(invalid(format!("field '{}' has an invalid position", id)));
        }

        fields.push(SignatureField {
            id,
            field_type: input.field_type,
            page: input.page,
            position: input.position,
            assignee_email,
            required: input.required,
            label: input.label,
            value: None,
            signed_at: None,
        });
    }

    if let Some(unassigned) = signers
        .iter()
        .find(|s| !fields.iter().any(|f| f.assignee_email == s.email))
    {
        return Err(invalid(format!(
            "signer '{}' has no signature fields",
            unassigned.email
        )));
    }

    let mut envelope = Envelope {
        id: EnvelopeId::generate(),
        owner_id: owner.user_id.clone(),
        owner_email: owner.email.as_deref().map(normalize_email),
        contract_id: request.contract_id,
        title,
        message: request.message.trim().to_string(),
        document_ref,
        owner_note: None,
        signing_mode: request.signing_mode,
        created_at: now,
        expires_at,
        status: EnvelopeStatus::Draft,
        signers,
        signature_fields: fields,
        sealed_document_ref: None,
        pdf_hash_original: document_hash,
        pdf_hash_final: None,
        sealed_signer_count: 0,
        completed_at: None,
        voided_at: None,
        void_reason: None,
        declined_at: None,
        archived: false,
        updated_at: now,
        revision: 0,
        audit: AuditLog::new(),
    };

    let actor = AuditActor::owner(&owner.user_id, owner.email.as_deref(), &owner.request);
    let details = json!({
        "title": envelope.title,
        "signing_mode": envelope.signing_mode,
        "signers": envelope.signers.iter().map(|s| &s.email).collect::<Vec<_>>(),
        "fields": envelope.signature_fields.len(),
        "expires_at": envelope.expires_at,
    });
    envelope.audit.append(AuditEventKind::Created, &actor, details, now);
    Ok(envelope)
}

/// DRAFT -> SENT or AWAITING_SIGNER_n. Returns the signers to invite.
pub(crate) fn send(
    envelope: &mut Envelope,
    actor: &AuditActor,
    now: DateTime<Utc>,
) -> Result<Step<Vec<usize>>, EnvelopeError> {
    if envelope.status != EnvelopeStatus::Draft {
        return Err(EnvelopeError::action_not_allowed("send", envelope.status));
    }

    let notify: Vec<usize> = match envelope.signing_mode {
        SigningMode::Sequential => {
            let next = envelope
                .next_pending_signer()
                .ok_or_else(|| EnvelopeError::InvalidState("no pending signers".to_string()))?;
            envelope.status = EnvelopeStatus::AwaitingSigner(envelope.signers[next].order);
            vec![next]
        }
        SigningMode::Single | SigningMode::Parallel => {
            envelope.status = EnvelopeStatus::Sent;
            (0..envelope.signers.len())
                .filter(|&i| envelope.signers[i].is_pending())
                .collect()
        }
    };

    for &idx in &notify {
        mark_notified(&mut envelope.signers[idx], now);
    }

    let details = json!({
        "status": envelope.status,
        "notified": notify.iter().map(|&i| &envelope.signers[i].email).collect::<Vec<_>>(),
    });
    envelope.audit.append(AuditEventKind::Sent, actor, details, now);
    Ok(Step::Commit(notify))
}

/// Signer loads the session.
pub(crate) fn open(
    envelope: &mut Envelope,
    idx: usize,
    request: &RequestContext,
    now: DateTime<Utc>,
) -> Result<Step<()>, EnvelopeError> {
    if envelope.status == EnvelopeStatus::Draft {
        return Err(EnvelopeError::action_not_allowed("open", envelope.status));
    }

    let signer = &envelope.signers[idx];
    if signer.has_signed() || signer.token_invalidated || envelope.status.is_terminal() {
        return Err(EnvelopeError::Closed {
            status: envelope.status,
            already_signed: signer.has_signed(),
            signed_at: signer.signed_at,
        });
    }

    let actor = AuditActor::signer(&signer.email, request);
    let details = json!({ "signer": signer.email, "order": signer.order });
    envelope.audit.append(AuditEventKind::Opened, &actor, details, now);
    Ok(Step::Commit(()))
}

/// Apply one signer's field values.
pub(crate) fn submit(
    envelope: &mut Envelope,
    idx: usize,
    submissions: &[FieldSubmission],
    validator: &FieldValidator,
    request: &RequestContext,
    now: DateTime<Utc>,
) -> Result<Step<SubmitEffect>, EnvelopeError> {
    // a voided envelope answers no signer action, replays included
    if envelope.status == EnvelopeStatus::Voided {
        return Err(EnvelopeError::action_not_allowed("submit", envelope.status));
    }
    let signer = &envelope.signers[idx];
    if signer.has_signed() {
        return Ok(Step::Unchanged(SubmitEffect::Replayed));
    }
    if signer.token_invalidated {
        return Err(EnvelopeError::Invalidated);
    }
    if !envelope.status.is_awaiting_signatures() {
        return Err(EnvelopeError::action_not_allowed("submit", envelope.status));
    }
    if !envelope.is_turn_of(idx) {
        return Err(EnvelopeError::InvalidState(
            "it is not this signer's turn to sign".to_string(),
        ));
    }

    let accepted = validator.validate(&envelope.signature_fields, &signer.email, submissions)?;

    let mut hasher = blake3::Hasher::new();
    let mut field_ids = Vec::with_capacity(accepted.len());
    for value in &accepted {
        let field = &mut envelope.signature_fields[value.field_index];
        field.value = Some(value.value.clone());
        field.signed_at = Some(now);
        hasher.update(field.id.as_bytes());
        hasher.update(&[0]);
        hasher.update(value.value.as_bytes());
        hasher.update(&[0]);
        field_ids.push(field.id.clone());
    }
    let document_hash = envelope
        .pdf_hash_final
        .clone()
        .or_else(|| envelope.pdf_hash_original.clone());
    if let Some(hash) = &document_hash {
        hasher.update(hash.as_bytes());
    }
    let integrity_hash = hasher.finalize().to_hex().to_string();

    let signer = &mut envelope.signers[idx];
    signer.status = SignerStatus::Signed;
    signer.signed_at = Some(now);
    signer.ip = Some(request.ip.clone());
    signer.user_agent = Some(request.user_agent.clone());
    TokenAuthority::invalidate(signer);

    let actor = AuditActor::signer(&signer.email, request);
    let details = json!({
        "signer": signer.email,
        "fields": field_ids,
        "integrity_hash": integrity_hash,
        "document_hash": document_hash,
    });
    envelope.audit.append(AuditEventKind::Signed, &actor, details, now);

    if envelope.all_signed() {
        envelope.status = EnvelopeStatus::Completed;
        envelope.completed_at = Some(now);
        let details = json!({ "signers": envelope.signers.len() });
        envelope
            .audit
            .append(AuditEventKind::Completed, &AuditActor::system(), details, now);
        return Ok(Step::Commit(SubmitEffect::Applied {
            next_signer: None,
            completed: true,
        }));
    }

    let next_signer = match envelope.signing_mode {
        SigningMode::Sequential => {
            let next = envelope
                .next_pending_signer()
                .ok_or_else(|| EnvelopeError::InvalidState("no pending signers".to_string()))?;
            envelope.status = EnvelopeStatus::AwaitingSigner(envelope.signers[next].order);
            mark_notified(&mut envelope.signers[next], now);
            Some(next)
        }
        SigningMode::Single | SigningMode::Parallel => {
            envelope.status = EnvelopeStatus::Signed;
            None
        }
    };

    Ok(Step::Commit(SubmitEffect::Applied {
        next_signer,
        completed: false,
    }))
}

/// Signer refuses; halts the whole envelope.
pub(crate) fn decline(
    envelope: &mut Envelope,
    idx: usize,
    reason: Option<String>,
    request: &RequestContext,
    now: DateTime<Utc>,
) -> Result<Step<()>, EnvelopeError> {
    if envelope.status == EnvelopeStatus::Voided {
        return Err(EnvelopeError::action_not_allowed("decline", envelope.status));
    }
    let signer = &envelope.signers[idx];
    if signer.has_signed() {
        return Err(EnvelopeError::AlreadySigned);
    }
    if signer.token_invalidated {
        return Err(EnvelopeError::Invalidated);
    }
    if !envelope.status.is_awaiting_signatures() {
        return Err(EnvelopeError::action_not_allowed("decline", envelope.status));
    }
    if !envelope.is_turn_of(idx) {
        return Err(EnvelopeError::InvalidState(
            "this signer has not been invited yet".to_string(),
        ));
    }

    let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    let signer = &mut envelope.signers[idx];
    signer.status = SignerStatus::Declined;
    signer.declined_at = Some(now);
    signer.decline_reason = reason.clone();
    signer.ip = Some(request.ip.clone());
    signer.user_agent = Some(request.user_agent.clone());
    TokenAuthority::invalidate(signer);

    let actor = AuditActor::signer(&signer.email, request);
    let details = json!({ "signer": signer.email, "reason": reason });
    envelope.status = EnvelopeStatus::Declined;
    envelope.declined_at = Some(now);
    envelope.audit.append(AuditEventKind::Declined, &actor, details, now);
    Ok(Step::Commit(()))
}

/// Owner cancels the envelope.
pub(crate) fn void(
    envelope: &mut Envelope,
    reason: Option<String>,
    actor: &AuditActor,
    now: DateTime<Utc>,
) -> Result<Step<()>, EnvelopeError> {
    if envelope.status.is_terminal() {
        return Err(EnvelopeError::action_not_allowed("void", envelope.status));
    }

    let reason = reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_VOID_REASON.to_string());
    let details = json!({ "previous_status": envelope.status, "reason": reason });
    envelope.status = EnvelopeStatus::Voided;
    envelope.voided_at = Some(now);
    envelope.void_reason = Some(reason);
    envelope.audit.append(AuditEventKind::Voided, actor, details, now);
    Ok(Step::Commit(()))
}

/// Re-notify pending signers outside their cooldown.
pub(crate) fn remind(
    envelope: &mut Envelope,
    actor: &AuditActor,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Result<Step<ReminderEffect>, EnvelopeError> {
    if !envelope.status.is_awaiting_signatures() {
        return Err(EnvelopeError::action_not_allowed("remind", envelope.status));
    }

    let targets: Vec<usize> = match envelope.signing_mode {
        SigningMode::Sequential => envelope.next_pending_signer().into_iter().collect(),
        SigningMode::Single | SigningMode::Parallel => (0..envelope.signers.len())
            .filter(|&i| envelope.signers[i].is_pending())
            .collect(),
    };
    if targets.is_empty() {
        return Err(EnvelopeError::InvalidState("no pending signers".to_string()));
    }

    let (due, throttled): (Vec<usize>, Vec<usize>) = targets
        .into_iter()
        .partition(|&i| !within_cooldown(&envelope.signers[i], cooldown, now));
    if due.is_empty() {
        return Err(EnvelopeError::Throttled(format!(
            "every pending signer was notified less than {} seconds ago",
            cooldown.num_seconds()
        )));
    }

    for &idx in &due {
        mark_notified(&mut envelope.signers[idx], now);
    }
    let details = json!({
        "reminded": due.iter().map(|&i| &envelope.signers[i].email).collect::<Vec<_>>(),
        "throttled": throttled.len(),
    });
    envelope.audit.append(AuditEventKind::ReminderSent, actor, details, now);
    Ok(Step::Commit(ReminderEffect {
        due,
        throttled: throttled.len(),
    }))
}

/// Re-invite one pending signer, re-issuing an expired token.
pub(crate) fn resend(
    envelope: &mut Envelope,
    email: &str,
    actor: &AuditActor,
    cooldown: Duration,
    token_ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Step<ResendEffect>, EnvelopeError> {
    if !envelope.status.is_awaiting_signatures() {
        return Err(EnvelopeError::action_not_allowed("resend", envelope.status));
    }
    let idx = envelope
        .signer_index_by_email(email)
        .ok_or_else(|| EnvelopeError::not_found(format!("signer '{}'", normalize_email(email))))?;

    let signer = &envelope.signers[idx];
    if !signer.is_pending() {
        return Err(EnvelopeError::InvalidState(
            "signer has already responded".to_string(),
        ));
    }
    if !envelope.is_turn_of(idx) {
        return Err(EnvelopeError::InvalidState(
            "it is not this signer's turn to sign".to_string(),
        ));
    }
    if within_cooldown(signer, cooldown, now) {
        return Err(EnvelopeError::Throttled(format!(
            "'{}' was notified less than {} seconds ago",
            signer.email,
            cooldown.num_seconds()
        )));
    }

    let token_reissued = TokenAuthority::is_expired(signer, now);
    let signer = &mut envelope.signers[idx];
    if token_reissued {
        let expires = now + token_ttl;
        TokenAuthority::issue(signer, expires);
        envelope.expires_at = envelope.expires_at.max(expires);
    }
    mark_notified(signer, now);

    let details = json!({
        "resent_to": signer.email,
        "token_reissued": token_reissued,
    });
    envelope.audit.append(AuditEventKind::ReminderSent, actor, details, now);
    Ok(Step::Commit(ResendEffect {
        index: idx,
        token_reissued,
    }))
}

/// Preconditions for an owner-triggered seal.
pub(crate) fn check_manual_seal(envelope: &Envelope) -> Result<(), EnvelopeError> {
    if envelope.status == EnvelopeStatus::Voided {
        return Err(EnvelopeError::action_not_allowed("seal", envelope.status));
    }
    if envelope.signed_count() == 0 {
        return Err(EnvelopeError::InvalidState(
            "there are no signatures to seal".to_string(),
        ));
    }
    if !envelope.needs_seal() {
        return Err(EnvelopeError::InvalidState(
            "sealed document already covers every signature".to_string(),
        ));
    }
    Ok(())
}

/// Record a sealed rendition covering `covered` signatures.
///
/// Results older than the stored seal are ignored.
pub(crate) fn record_seal(
    envelope: &mut Envelope,
    receipt: &SealReceipt,
    covered: usize,
    now: DateTime<Utc>,
) -> Step<bool> {
    let stale = envelope.sealed_document_ref.is_some() && envelope.sealed_signer_count >= covered;
    if stale || envelope.status == EnvelopeStatus::Voided {
        return Step::Unchanged(false);
    }

    envelope.sealed_document_ref = Some(receipt.sealed_ref.clone());
    envelope.pdf_hash_original = Some(receipt.hash_original.clone());
    envelope.pdf_hash_final = Some(receipt.hash_final.clone());
    envelope.sealed_signer_count = covered;

    let details = json!({
        "sealed_ref": receipt.sealed_ref,
        "hash_original": receipt.hash_original,
        "hash_final": receipt.hash_final,
        "signatures": covered,
    });
    envelope
        .audit
        .append(AuditEventKind::PdfSealed, &AuditActor::system(), details, now);
    Step::Commit(true)
}

pub(crate) fn record_seal_failure(
    envelope: &mut Envelope,
    error: &EnvelopeError,
    covered: usize,
    now: DateTime<Utc>,
) -> Step<()> {
    if envelope.sealed_document_ref.is_some() && envelope.sealed_signer_count >= covered {
        return Step::Unchanged(());
    }
    let details = json!({ "error": error.to_string(), "signatures": covered });
    envelope.audit.append(
        AuditEventKind::PdfSealingFailed,
        &AuditActor::system(),
        details,
        now,
    );
    Step::Commit(())
}

pub(crate) fn update_note(envelope: &mut Envelope, note: Option<String>) -> Step<()> {
    let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    if envelope.owner_note == note {
        return Step::Unchanged(());
    }
    envelope.owner_note = note;
    Step::Commit(())
}

pub(crate) fn set_archived(envelope: &mut Envelope, archived: bool) -> Step<()> {
    if envelope.archived == archived {
        return Step::Unchanged(());
    }
    envelope.archived = archived;
    Step::Commit(())
}
