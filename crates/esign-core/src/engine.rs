use crate::audit::AuditActor;
use crate::collaborators::{DocumentUrlSigner, NotificationDispatcher, SealingService};
use crate::config::{EngineConfig, SealMode};
use crate::error::EnvelopeError;
use crate::machine::{self, Step, SubmitEffect};
use crate::outcome::{
    AuditTrail, BulkDeleteOutcome, CreatedEnvelope, DeclineOutcome, EnvelopePage,
    EnvelopeSummary, EnvelopeView, ReminderOutcome, SealOutcome, SendOutcome, SignerView,
    SigningLink, SigningSession, SubmitOutcome,
};
use crate::store::{EnvelopeFilter, EnvelopeStore};
use crate::token::TokenAuthority;
use crate::types::{
    Envelope, EnvelopeId, FieldSubmission, NewEnvelope, OwnerContext, RequestContext,
};
use crate::validator::FieldValidator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a load -> transition -> conditional write cycle.
struct Mutation<T> {
    envelope: Envelope,
    value: T,
    committed: bool,
}

/// Envelope workflow entry points for owners and signers.
///
/// Every mutation loads the envelope, runs a pure transition and persists it with a
/// revision-checked write, retrying on fresh state when another writer won. Side
/// effects (notifications, sealing) only run after the write that justifies them.
#[derive(Clone)]
pub struct SigningEngine {
    store: Arc<dyn EnvelopeStore>,
    sealing: Arc<dyn SealingService>,
    notifier: Arc<dyn NotificationDispatcher>,
    urls: Arc<dyn DocumentUrlSigner>,
    validator: FieldValidator,
    tokens: TokenAuthority,
    config: Arc<EngineConfig>,
}

impl SigningEngine {
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        sealing: Arc<dyn SealingService>,
        notifier: Arc<dyn NotificationDispatcher>,
        urls: Arc<dyn DocumentUrlSigner>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            sealing,
            notifier,
            urls,
            validator: FieldValidator::new(config.max_signature_bytes, config.max_text_chars),
            tokens: TokenAuthority::new(config.token_ttl_days),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EnvelopeStore> {
        &self.store
    }

    // ----- owner operations -------------------------------------------------

    pub async fn create(
        &self,
        owner: &OwnerContext,
        request: NewEnvelope,
    ) -> Result<CreatedEnvelope, EnvelopeError> {
        let document_hash = match self.sealing.document_hash(request.document_ref.trim()).await {
            Ok(hash) => Some(hash),
            Err(err) => {
                warn!(document_ref = %request.document_ref, error = %err, "document hash unavailable at creation");
                None
            }
        };

        let envelope = machine::create(
            owner,
            request,
            self.tokens.default_ttl(),
            self.config.max_expires_in_days,
            document_hash,
            Utc::now(),
        )?;
        self.store.insert(&envelope).await?;

        info!(
            envelope_id = %envelope.id,
            owner_id = %envelope.owner_id,
            signers = envelope.signers().len(),
            mode = ?envelope.signing_mode,
            "envelope created"
        );
        Ok(CreatedEnvelope {
            envelope: EnvelopeView::from(&envelope),
            signing_links: envelope
                .signers()
                .iter()
                .map(|s| SigningLink {
                    email: s.email.clone(),
                    token: s.token.clone(),
                })
                .collect(),
        })
    }

    pub async fn send(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
    ) -> Result<SendOutcome, EnvelopeError> {
        let actor = owner_actor(owner);
        let mutation = self
            .mutate_by_id(id, Some(&owner.user_id), |envelope, now| {
                machine::send(envelope, &actor, now)
            })
            .await?;

        let envelope = &mutation.envelope;
        let delivered = self.invite(envelope, &mutation.value).await;
        info!(envelope_id = %id, status = %envelope.status(), notified = mutation.value.len(), "envelope sent");

        Ok(SendOutcome {
            envelope_id: *id,
            status: envelope.status(),
            notified: emails(envelope, &mutation.value),
            delivered,
        })
    }

    pub async fn remind(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
    ) -> Result<ReminderOutcome, EnvelopeError> {
        let actor = owner_actor(owner);
        let cooldown = self.config.reminder_cooldown();
        let mutation = self
            .mutate_by_id(id, Some(&owner.user_id), |envelope, now| {
                machine::remind(envelope, &actor, cooldown, now)
            })
            .await?;

        let effect = &mutation.value;
        let delivered = self.invite(&mutation.envelope, &effect.due).await;
        info!(envelope_id = %id, reminded = effect.due.len(), throttled = effect.throttled, "reminders sent");

        Ok(ReminderOutcome {
            envelope_id: *id,
            reminded: emails(&mutation.envelope, &effect.due),
            delivered,
            throttled: effect.throttled,
            token_reissued: false,
        })
    }

    pub async fn resend(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
        email: &str,
    ) -> Result<ReminderOutcome, EnvelopeError> {
        let actor = owner_actor(owner);
        let cooldown = self.config.reminder_cooldown();
        let ttl = self.tokens.default_ttl();
        let mutation = self
            .mutate_by_id(id, Some(&owner.user_id), |envelope, now| {
                machine::resend(envelope, email, &actor, cooldown, ttl, now)
            })
            .await?;

        let effect = mutation.value;
        let delivered = self.invite(&mutation.envelope, &[effect.index]).await;
        info!(envelope_id = %id, token_reissued = effect.token_reissued, "invitation resent");

        Ok(ReminderOutcome {
            envelope_id: *id,
            reminded: emails(&mutation.envelope, &[effect.index]),
            delivered,
            throttled: 0,
            token_reissued: effect.token_reissued,
        })
    }

    pub async fn void(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
        reason: Option<String>,
    ) -> Result<EnvelopeView, EnvelopeError> {
        let actor = owner_actor(owner);
        let mutation = self
            .mutate_by_id(id, Some(&owner.user_id), |envelope, now| {
                machine::void(envelope, reason.clone(), &actor, now)
            })
            .await?;
        info!(envelope_id = %id, "envelope voided");
        Ok(EnvelopeView::from(&mutation.envelope))
    }

    /// Owner-triggered seal retry.
    pub async fn seal(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
    ) -> Result<SealOutcome, EnvelopeError> {
        let envelope = self.load_owned(id, &owner.user_id).await?;
        machine::check_manual_seal(&envelope)?;
        self.seal_and_record(envelope).await
    }

    pub async fn update_note(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
        note: Option<String>,
    ) -> Result<EnvelopeView, EnvelopeError> {
        let mutation = self
            .mutate_by_id(id, Some(&owner.user_id), |envelope, _| {
                Ok(machine::update_note(envelope, note.clone()))
            })
            .await?;
        Ok(EnvelopeView::from(&mutation.envelope))
    }

    pub async fn archive(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
    ) -> Result<EnvelopeView, EnvelopeError> {
        self.set_archived(owner, id, true).await
    }

    pub async fn unarchive(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
    ) -> Result<EnvelopeView, EnvelopeError> {
        self.set_archived(owner, id, false).await
    }

    async fn set_archived(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
        archived: bool,
    ) -> Result<EnvelopeView, EnvelopeError> {
        let mutation = self
            .mutate_by_id(id, Some(&owner.user_id), |envelope, _| {
                Ok(machine::set_archived(envelope, archived))
            })
            .await?;
        debug!(envelope_id = %id, archived, committed = mutation.committed, "archive flag updated");
        Ok(EnvelopeView::from(&mutation.envelope))
    }

    /// Delete archived envelopes owned by the caller; everything else is reported as skipped.
    pub async fn bulk_delete(
        &self,
        owner: &OwnerContext,
        ids: &[EnvelopeId],
    ) -> Result<BulkDeleteOutcome, EnvelopeError> {
        let mut outcome = BulkDeleteOutcome::default();
        for id in ids {
            if self.store.delete_archived(id, &owner.user_id).await? {
                outcome.deleted.push(*id);
            } else {
                outcome.skipped.push(*id);
            }
        }
        info!(
            owner_id = %owner.user_id,
            deleted = outcome.deleted.len(),
            skipped = outcome.skipped.len(),
            "bulk delete finished"
        );
        Ok(outcome)
    }

    pub async fn get(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
    ) -> Result<EnvelopeView, EnvelopeError> {
        let envelope = self.load_owned(id, &owner.user_id).await?;
        Ok(EnvelopeView::from(&envelope))
    }

    pub async fn list(
        &self,
        owner: &OwnerContext,
        filter: &EnvelopeFilter,
    ) -> Result<EnvelopePage, EnvelopeError> {
        let (envelopes, total) = self.store.list_by_owner(&owner.user_id, filter).await?;
        Ok(EnvelopePage {
            envelopes: envelopes.iter().map(EnvelopeView::from).collect(),
            total,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    pub async fn audit_trail(
        &self,
        owner: &OwnerContext,
        id: &EnvelopeId,
    ) -> Result<AuditTrail, EnvelopeError> {
        let envelope = self.load_owned(id, &owner.user_id).await?;
        let chain_valid = envelope.audit().verify_chain();
        if !chain_valid {
            warn!(envelope_id = %id, "audit hash-chain verification failed");
        }
        Ok(AuditTrail {
            envelope_id: *id,
            chain_valid,
            entries: envelope.audit().entries().to_vec(),
        })
    }

    // ----- signer operations ------------------------------------------------

    /// Load the signing session behind a token.
    pub async fn open(
        &self,
        token: &str,
        request: &RequestContext,
    ) -> Result<SigningSession, EnvelopeError> {
        let mutation = self
            .mutate_by_token(token, |envelope, idx, now| {
                machine::open(envelope, idx, request, now).map(|step| match step {
                    Step::Commit(()) => Step::Commit(idx),
                    Step::Unchanged(()) => Step::Unchanged(idx),
                })
            })
            .await?;

        let envelope = &mutation.envelope;
        let signer = &envelope.signers()[mutation.value];
        let preview_url = self.urls.generate_signed_url(envelope.current_document_ref())?;
        debug!(envelope_id = %envelope.id, signer = %signer.email, "signing session opened");

        Ok(SigningSession {
            envelope: EnvelopeSummary::from(envelope),
            signer: SignerView::from(signer),
            fields: envelope
                .fields_for(&signer.email)
                .into_iter()
                .cloned()
                .collect(),
            preview_url,
        })
    }

    pub async fn submit(
        &self,
        token: &str,
        submissions: &[FieldSubmission],
        request: &RequestContext,
    ) -> Result<SubmitOutcome, EnvelopeError> {
        let validator = &self.validator;
        let mutation = self
            .mutate_by_token(token, |envelope, idx, now| {
                machine::submit(envelope, idx, submissions, validator, request, now)
                    .map(|step| match step {
                        Step::Commit(effect) => Step::Commit((idx, effect)),
                        Step::Unchanged(effect) => Step::Unchanged((idx, effect)),
                    })
            })
            .await?;

        let (idx, effect) = mutation.value;
        let mut envelope = mutation.envelope;
        let replayed = effect == SubmitEffect::Replayed;

        if let SubmitEffect::Applied {
            next_signer,
            completed,
        } = effect
        {
            info!(
                envelope_id = %envelope.id,
                signer = %envelope.signers()[idx].email,
                status = %envelope.status(),
                "signature recorded"
            );
            if let Some(next) = next_signer {
                self.invite(&envelope, &[next]).await;
            }

            match self.config.seal_mode {
                SealMode::Inline => {
                    if let Ok(outcome) = self.seal_and_record(envelope.clone()).await {
                        if outcome.recorded {
                            if let Some(latest) = self.store.get(&envelope.id).await? {
                                envelope = latest;
                            }
                        }
                    }
                }
                SealMode::Background => {
                    let engine = self.clone();
                    let snapshot = envelope.clone();
                    tokio::spawn(async move {
                        let _ = engine.seal_and_record(snapshot).await;
                    });
                }
            }

            if completed {
                self.notify_completion(&envelope).await;
            }
        } else {
            debug!(envelope_id = %envelope.id, "submit replayed for a signer who already signed");
        }

        let sealed_document_url = match envelope.sealed_document_ref() {
            Some(sealed) => match self.urls.generate_signed_url(sealed) {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!(envelope_id = %envelope.id, error = %err, "sealed document url unavailable");
                    None
                }
            },
            None => None,
        };

        Ok(SubmitOutcome {
            envelope_id: envelope.id,
            status: envelope.status(),
            all_signed: envelope.all_signed(),
            signed_at: envelope.signers()[idx].signed_at,
            completed_at: envelope.completed_at(),
            sealed_document_url,
            replayed,
        })
    }

    pub async fn decline(
        &self,
        token: &str,
        reason: Option<String>,
        request: &RequestContext,
    ) -> Result<DeclineOutcome, EnvelopeError> {
        let mutation = self
            .mutate_by_token(token, |envelope, idx, now| {
                machine::decline(envelope, idx, reason.clone(), request, now)
            })
            .await?;

        let envelope = &mutation.envelope;
        info!(envelope_id = %envelope.id, "envelope declined");
        Ok(DeclineOutcome {
            envelope_id: envelope.id,
            status: envelope.status(),
            declined_at: envelope.declined_at(),
        })
    }

    // ----- internals --------------------------------------------------------

    async fn load_owned(&self, id: &EnvelopeId, owner_id: &str) -> Result<Envelope, EnvelopeError> {
        match self.store.get(id).await? {
            Some(envelope) if envelope.owner_id == owner_id => Ok(envelope),
            _ => Err(EnvelopeError::not_found(format!("envelope {}", id))),
        }
    }

    async fn mutate_by_id<T, F>(
        &self,
        id: &EnvelopeId,
        owner_id: Option<&str>,
        mut transition: F,
    ) -> Result<Mutation<T>, EnvelopeError>
    where
        F: FnMut(&mut Envelope, DateTime<Utc>) -> Result<Step<T>, EnvelopeError>,
    {
        for attempt in 1..=self.config.max_write_attempts.max(1) {
            let mut envelope = match owner_id {
                Some(owner_id) => self.load_owned(id, owner_id).await?,
                None => self
                    .store
                    .get(id)
                    .await?
                    .ok_or_else(|| EnvelopeError::not_found(format!("envelope {}", id)))?,
            };
            let now = Utc::now();
            match transition(&mut envelope, now)? {
                Step::Unchanged(value) => {
                    return Ok(Mutation {
                        envelope,
                        value,
                        committed: false,
                    })
                }
                Step::Commit(value) => {
                    if self.commit(&mut envelope, now).await? {
                        return Ok(Mutation {
                            envelope,
                            value,
                            committed: true,
                        });
                    }
                    debug!(envelope_id = %id, attempt, "conditional write lost, retrying");
                }
            }
        }
        warn!(envelope_id = %id, "write attempts exhausted");
        Err(EnvelopeError::Conflict(id.to_string()))
    }

    async fn mutate_by_token<T, F>(
        &self,
        token: &str,
        mut transition: F,
    ) -> Result<Mutation<T>, EnvelopeError>
    where
        F: FnMut(&mut Envelope, usize, DateTime<Utc>) -> Result<Step<T>, EnvelopeError>,
    {
        let mut last_id = None;
        for attempt in 1..=self.config.max_write_attempts.max(1) {
            let now = Utc::now();
            let resolved = TokenAuthority::resolve(self.store.as_ref(), token, now).await?;
            let mut envelope = resolved.envelope;
            last_id = Some(envelope.id);
            match transition(&mut envelope, resolved.signer_index, now)? {
                Step::Unchanged(value) => {
                    return Ok(Mutation {
                        envelope,
                        value,
                        committed: false,
                    })
                }
                Step::Commit(value) => {
                    if self.commit(&mut envelope, now).await? {
                        return Ok(Mutation {
                            envelope,
                            value,
                            committed: true,
                        });
                    }
                    debug!(envelope_id = %envelope.id, attempt, "conditional write lost, retrying");
                }
            }
        }
        let id = last_id.map(|id| id.to_string()).unwrap_or_default();
        warn!(envelope_id = %id, "write attempts exhausted");
        Err(EnvelopeError::Conflict(id))
    }

    async fn commit(&self, envelope: &mut Envelope, now: DateTime<Utc>) -> Result<bool, EnvelopeError> {
        let expected = envelope.begin_write(now);
        self.store.replace(envelope, expected).await
    }

    /// Seal `snapshot` and record the result as a separate conditional write.
    async fn seal_and_record(&self, snapshot: Envelope) -> Result<SealOutcome, EnvelopeError> {
        let id = snapshot.id;
        let covered = snapshot.signed_count();

        match self.sealing.seal(&snapshot).await {
            Ok(receipt) => {
                let mutation = self
                    .mutate_by_id(&id, None, |envelope, now| {
                        Ok(machine::record_seal(envelope, &receipt, covered, now))
                    })
                    .await?;
                let envelope = &mutation.envelope;
                info!(
                    envelope_id = %id,
                    sealed_ref = %receipt.sealed_ref,
                    signatures = covered,
                    recorded = mutation.value,
                    "document sealed"
                );
                let sealed_document_url = envelope
                    .sealed_document_ref()
                    .and_then(|r| self.urls.generate_signed_url(r).ok());
                Ok(SealOutcome {
                    envelope_id: id,
                    sealed_document_ref: envelope.sealed_document_ref().map(str::to_string),
                    sealed_document_url,
                    hash_original: envelope.pdf_hash_original().map(str::to_string),
                    hash_final: envelope.pdf_hash_final().map(str::to_string),
                    signatures_covered: envelope.sealed_signer_count(),
                    recorded: mutation.value,
                })
            }
            Err(err) => {
                warn!(envelope_id = %id, error = %err, "sealing failed");
                if let Err(record_err) = self
                    .mutate_by_id(&id, None, |envelope, now| {
                        Ok(machine::record_seal_failure(envelope, &err, covered, now))
                    })
                    .await
                {
                    warn!(envelope_id = %id, error = %record_err, "could not record sealing failure");
                }
                Err(err)
            }
        }
    }

    /// Send invitations; returns how many were accepted for delivery.
    async fn invite(&self, envelope: &Envelope, indices: &[usize]) -> usize {
        let from = envelope
            .owner_email
            .as_deref()
            .unwrap_or(&self.config.default_from_email);
        let mut delivered = 0;
        for &idx in indices {
            let signer = &envelope.signers()[idx];
            match self
                .notifier
                .send_signature_invitation(signer, envelope, from)
                .await
            {
                Ok(true) => delivered += 1,
                Ok(false) => {
                    warn!(envelope_id = %envelope.id, signer = %signer.email, "invitation not accepted for delivery")
                }
                Err(err) => {
                    warn!(envelope_id = %envelope.id, signer = %signer.email, error = %err, "invitation failed")
                }
            }
        }
        delivered
    }

    async fn notify_completion(&self, envelope: &Envelope) {
        let mut recipients: Vec<(&str, &str)> = envelope
            .signers()
            .iter()
            .map(|s| (s.email.as_str(), s.name.as_str()))
            .collect();
        if let Some(owner_email) = envelope.owner_email.as_deref() {
            if !recipients.iter().any(|(email, _)| *email == owner_email) {
                recipients.push((owner_email, owner_email));
            }
        }

        for (email, name) in recipients {
            match self
                .notifier
                .send_completion_notice(email, name, envelope)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(envelope_id = %envelope.id, recipient = %email, "completion notice not accepted for delivery")
                }
                Err(err) => {
                    warn!(envelope_id = %envelope.id, recipient = %email, error = %err, "completion notice failed")
                }
            }
        }
    }
}

fn owner_actor(owner: &OwnerContext) -> AuditActor {
    AuditActor::owner(&owner.user_id, owner.email.as_deref(), &owner.request)
}

fn emails(envelope: &Envelope, indices: &[usize]) -> Vec<String> {
    indices
        .iter()
        .map(|&i| envelope.signers()[i].email.clone())
        .collect()
}
