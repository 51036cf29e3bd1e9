use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::services::crypto::CredentialCipher;
use crate::application::services::render::render_template;
use crate::application::services::resilience::{CallPolicy, ResilienceError, ResilienceExecutor};
use crate::application::services::schedule::{compute_scheduled_utc, resolve_snapshot};
use crate::application::services::transport::{MailTransport, OutboundMail, TransportError};
use crate::domain::events::normalize_message_id;
use crate::domain::models::{
    DeliveryLogKind, Enrollment, NewDeliveryLogEntry, SenderSnapshot, SenderStatus, Sequence,
    SequenceStep,
};
use crate::domain::repositories::{
    Advance, ContactRepository, DeliveryLogRepository, EnrollmentRepository, SenderRepository,
    SequenceRepository,
};

#[derive(Debug, Clone)]
pub struct PassSettings {
    /// Rows selected per pass when the caller does not supply a limit.
    pub batch_limit: u32,
    /// Attempt ceiling before a transiently failing row is parked as failed.
    pub max_attempts: i32,
    /// How far a transient failure pushes scheduled_at forward.
    pub retry_cooldown: Duration,
    pub mail_retries: u32,
    pub mail_base_delay: Duration,
    pub mail_timeout: Duration,
    pub breaker_threshold: u32,
    pub breaker_reset: Duration,
    pub fallback_timezone: Option<String>,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            max_attempts: 5,
            retry_cooldown: Duration::from_secs(15 * 60),
            mail_retries: 3,
            mail_base_delay: Duration::from_millis(500),
            mail_timeout: Duration::from_secs(30),
            breaker_threshold: 5,
            breaker_reset: Duration::from_secs(5 * 60),
            fallback_timezone: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassRequest {
    pub limit: Option<u32>,
    pub team_id: Option<Uuid>,
    /// Set on the on-demand trigger path; stamps the rows it dispatches.
    pub manual: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    Sent,
    Failed,
    Delayed,
    Skipped,
    /// The row left pending (or lost its schedule) between selection and
    /// claim; another worker or reconciliation got there first.
    Stale,
}

impl RowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowAction::Sent => "sent",
            RowAction::Failed => "failed",
            RowAction::Delayed => "delayed",
            RowAction::Skipped => "skipped",
            RowAction::Stale => "stale",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RowDetail {
    pub contact_id: Uuid,
    pub sequence_id: Uuid,
    pub step_order: Option<i32>,
    pub action: RowAction,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub scanned: u32,
    pub sent: u32,
    pub failed: u32,
    /// Rows deferred or rescheduled; they stay pending for a later pass.
    pub retried: u32,
    pub skipped: u32,
    pub duration_ms: u64,
    pub details: Vec<RowDetail>,
}

impl PassReport {
    pub fn worked(&self) -> bool {
        self.sent + self.failed + self.retried > 0
    }

    fn tally(&mut self, detail: RowDetail) {
        match detail.action {
            RowAction::Sent => self.sent += 1,
            RowAction::Failed => self.failed += 1,
            RowAction::Delayed => self.retried += 1,
            RowAction::Skipped | RowAction::Stale => self.skipped += 1,
        }
        self.details.push(detail);
    }
}

/// One polling pass of the delivery engine: select due pending rows, enforce
/// per-sequence gap throttling, render and dispatch, and advance each row.
///
/// Row-level delivery failures are contained and recorded per row; only
/// storage failures propagate and abort the pass.
pub struct RunDeliveryPass {
    sequences: Arc<dyn SequenceRepository>,
    contacts: Arc<dyn ContactRepository>,
    senders: Arc<dyn SenderRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    logs: Arc<dyn DeliveryLogRepository>,
    transport: Arc<dyn MailTransport>,
    resilience: Arc<ResilienceExecutor>,
    cipher: Arc<CredentialCipher>,
    settings: PassSettings,
}

struct SequenceBundle {
    sequence: Sequence,
    steps: Vec<SequenceStep>,
}

impl RunDeliveryPass {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sequences: Arc<dyn SequenceRepository>,
        contacts: Arc<dyn ContactRepository>,
        senders: Arc<dyn SenderRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        logs: Arc<dyn DeliveryLogRepository>,
        transport: Arc<dyn MailTransport>,
        resilience: Arc<ResilienceExecutor>,
        cipher: Arc<CredentialCipher>,
        settings: PassSettings,
    ) -> Self {
        Self {
            sequences,
            contacts,
            senders,
            enrollments,
            logs,
            transport,
            resilience,
            cipher,
            settings,
        }
    }

    pub async fn execute(&self, request: PassRequest) -> anyhow::Result<PassReport> {
        let started = Instant::now();
        let now = Utc::now();
        let limit = request.limit.unwrap_or(self.settings.batch_limit);

        let due = self.enrollments.find_due(now, limit, request.team_id).await?;

        let mut report = PassReport::default();
        let mut cache: HashMap<Uuid, Option<SequenceBundle>> = HashMap::new();

        // Rows are processed sequentially within a pass so per-sequence gap
        // throttling stays correct without a distributed lock.
        for row in due {
            report.scanned += 1;
            let detail = self.process_row(&row, now, request.manual, &mut cache).await?;
            report.tally(detail);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            scanned = report.scanned,
            sent = report.sent,
            failed = report.failed,
            retried = report.retried,
            skipped = report.skipped,
            duration_ms = report.duration_ms,
            "delivery pass finished"
        );
        Ok(report)
    }

    async fn process_row(
        &self,
        row: &Enrollment,
        now: DateTime<Utc>,
        manual: bool,
        cache: &mut HashMap<Uuid, Option<SequenceBundle>>,
    ) -> anyhow::Result<RowDetail> {
        let detail = |action: RowAction, step: Option<i32>, reason: Option<String>| RowDetail {
            contact_id: row.contact_id,
            sequence_id: row.sequence_id,
            step_order: step,
            action,
            reason,
        };

        let Some(bundle) = self.sequence_bundle(row.sequence_id, cache).await? else {
            // Draft/paused/deleted sequences, or ones without steps or an
            // eligible sender, are skipped; the row stays pending and
            // resumes if the sequence becomes active again.
            return Ok(detail(
                RowAction::Skipped,
                row.current_step,
                Some("sequence_not_dispatchable".to_string()),
            ));
        };
        let sequence = &bundle.sequence;
        let steps = &bundle.steps;

        let step_order = row.current_step.unwrap_or(1);
        let Some(step) = steps.iter().find(|s| s.order == step_order) else {
            // Step pointer no longer matches the sequence definition.
            if self
                .enrollments
                .record_skip(row.id, now, Advance::Terminated)
                .await?
            {
                self.append_log(row, Some(step_order), DeliveryLogKind::Skipped, "skipped")
                    .reason("step_not_found")
                    .save(self.logs.as_ref())
                    .await?;
            }
            return Ok(detail(
                RowAction::Skipped,
                Some(step_order),
                Some("step_not_found".to_string()),
            ));
        };

        // Skip/stop evaluation for the current step. Sequence-level stop
        // conditions take precedence over per-step skip flags.
        if let Some(reason) = self.stop_reason(sequence, row) {
            if self
                .enrollments
                .record_skip(row.id, now, Advance::Terminated)
                .await?
            {
                self.append_log(row, Some(step.order), DeliveryLogKind::Skipped, "skipped")
                    .reason(reason)
                    .save(self.logs.as_ref())
                    .await?;
            }
            return Ok(detail(
                RowAction::Skipped,
                Some(step.order),
                Some(reason.to_string()),
            ));
        }
        if self.step_skipped(step, row) {
            let contact_tz = self.contact_timezone(row.contact_id).await?;
            let advance = self.plan_advance(sequence, steps, step.order, row, now, contact_tz.as_deref());
            if self.enrollments.record_skip(row.id, now, advance).await? {
                self.append_log(row, Some(step.order), DeliveryLogKind::Skipped, "skipped")
                    .reason("step_skip_condition")
                    .save(self.logs.as_ref())
                    .await?;
            }
            return Ok(detail(
                RowAction::Skipped,
                Some(step.order),
                Some("step_skip_condition".to_string()),
            ));
        }

        // Minimum inter-send gap, re-checked at dispatch time against the
        // most recent send anywhere in the sequence.
        if sequence.min_gap_minutes > 0
            && let Some(last_sent) = self.enrollments.last_sent_at(sequence.id).await?
        {
            let gap = chrono::Duration::minutes(sequence.min_gap_minutes);
            let elapsed = now - last_sent;
            if elapsed < gap {
                let wait_secs = (gap - elapsed).num_seconds();
                self.enrollments.record_throttle(row.id, now).await?;
                self.append_log(row, Some(step.order), DeliveryLogKind::Delayed, "pending")
                    .reason("delayed_due_to_min_gap")
                    .payload(json!({
                        "min_gap_minutes": sequence.min_gap_minutes,
                        "retry_in_seconds": wait_secs,
                    }))
                    .save(self.logs.as_ref())
                    .await?;
                return Ok(detail(
                    RowAction::Delayed,
                    Some(step.order),
                    Some("delayed_due_to_min_gap".to_string()),
                ));
            }
        }

        let Some(contact) = self.contacts.get(row.contact_id).await? else {
            if self
                .enrollments
                .record_failure(row.id, now, "contact_missing", None)
                .await?
            {
                self.append_log(row, Some(step.order), DeliveryLogKind::Failed, "failed")
                    .reason("contact_missing")
                    .save(self.logs.as_ref())
                    .await?;
            }
            return Ok(detail(
                RowAction::Failed,
                Some(step.order),
                Some("contact_missing".to_string()),
            ));
        };

        let snapshot = match self.sender_snapshot(sequence).await? {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                if self
                    .enrollments
                    .record_failure(row.id, now, &reason, None)
                    .await?
                {
                    self.append_log(row, Some(step.order), DeliveryLogKind::Failed, "failed")
                        .reason(reason.clone())
                        .save(self.logs.as_ref())
                        .await?;
                }
                return Ok(detail(RowAction::Failed, Some(step.order), Some(reason)));
            }
        };

        // Atomic claim: clears scheduled_at so neither a concurrent worker
        // nor a later pass can select this row again. A miss means another
        // actor (worker or reconciliation) already owns the row.
        if !self.enrollments.claim(row.id, now, manual).await? {
            return Ok(detail(
                RowAction::Stale,
                Some(step.order),
                Some("claim_lost".to_string()),
            ));
        }

        let mail = OutboundMail {
            to: contact.email.clone(),
            subject: render_template(&step.subject_template, &contact),
            html: render_template(&step.body_template, &contact),
            text: render_template(&step.body_template, &contact),
        };
        let policy = self.mail_policy(&snapshot);

        let outcome = self
            .resilience
            .execute("deliver_step", &policy, || {
                self.transport.send(&snapshot, &mail)
            })
            .await;
        // Decrypted credentials live only for the dispatch above.
        drop(snapshot);

        match outcome {
            Ok(receipt) => {
                let advance = self.plan_advance(
                    sequence,
                    steps,
                    step.order,
                    row,
                    now,
                    contact.timezone.as_deref(),
                );
                self.enrollments.record_sent(row.id, now, advance).await?;
                self.append_log(row, Some(step.order), DeliveryLogKind::Sent, "sent")
                    .message_id(normalize_message_id(&receipt.message_id))
                    .payload(json!({
                        "response": receipt.response,
                        "accepted": receipt.accepted,
                        "rejected": receipt.rejected,
                    }))
                    .save(self.logs.as_ref())
                    .await?;
                Ok(detail(RowAction::Sent, Some(step.order), None))
            }
            Err(error) => {
                self.handle_dispatch_failure(row, step, now, error, detail)
                    .await
            }
        }
    }

    async fn handle_dispatch_failure(
        &self,
        row: &Enrollment,
        step: &SequenceStep,
        now: DateTime<Utc>,
        error: ResilienceError<TransportError>,
        detail: impl Fn(RowAction, Option<i32>, Option<String>) -> RowDetail,
    ) -> anyhow::Result<RowDetail> {
        let kind = error.kind();
        let description = error.to_string();
        let attempts = row.attempts + 1; // claim already counted this attempt
        warn!(
            sequence_id = %row.sequence_id,
            contact_id = %row.contact_id,
            step = step.order,
            attempts,
            kind,
            %description,
            "dispatch failed"
        );

        let exhausted = attempts >= self.settings.max_attempts;
        if error.is_transient() && !exhausted {
            let retry_at = now + chrono::Duration::from_std(self.settings.retry_cooldown)?;
            let rescheduled = self
                .enrollments
                .record_failure(row.id, now, &description, Some(retry_at))
                .await?;
            // No retry log when reconciliation took the row between the
            // claim and this write.
            if rescheduled {
                self.append_log(row, Some(step.order), DeliveryLogKind::Delayed, "pending")
                    .reason(kind)
                    .payload(json!({ "error": description, "retry_at": retry_at }))
                    .save(self.logs.as_ref())
                    .await?;
            }
            Ok(detail(
                RowAction::Delayed,
                Some(step.order),
                Some(kind.to_string()),
            ))
        } else {
            self.enrollments
                .record_failure(row.id, now, &description, None)
                .await?;
            self.append_log(row, Some(step.order), DeliveryLogKind::Failed, "failed")
                .reason(kind)
                .payload(json!({ "error": description, "attempts": attempts }))
                .save(self.logs.as_ref())
                .await?;
            Ok(detail(
                RowAction::Failed,
                Some(step.order),
                Some(kind.to_string()),
            ))
        }
    }

    async fn sequence_bundle<'a>(
        &self,
        sequence_id: Uuid,
        cache: &'a mut HashMap<Uuid, Option<SequenceBundle>>,
    ) -> anyhow::Result<Option<&'a SequenceBundle>> {
        if !cache.contains_key(&sequence_id) {
            let bundle = match self.sequences.get(sequence_id).await? {
                Some(sequence) if sequence.dispatchable() => {
                    let steps = self.sequences.steps(sequence_id).await?;
                    if steps.is_empty() {
                        None
                    } else {
                        Some(SequenceBundle { sequence, steps })
                    }
                }
                _ => None,
            };
            cache.insert(sequence_id, bundle);
        }
        Ok(cache.get(&sequence_id).and_then(|b| b.as_ref()))
    }

    async fn sender_snapshot(
        &self,
        sequence: &Sequence,
    ) -> anyhow::Result<Result<SenderSnapshot, String>> {
        let Some(sender_id) = sequence.sender_id else {
            return Ok(Err("sender_unassigned".to_string()));
        };
        let Some(profile) = self.senders.get(sender_id).await? else {
            return Ok(Err("sender_missing".to_string()));
        };
        if profile.status != SenderStatus::Active {
            return Ok(Err("sender_disabled".to_string()));
        }
        let smtp_password = match self.cipher.decrypt(&profile.smtp_password_encrypted) {
            Ok(password) => password,
            Err(error) => {
                warn!(sender_id = %profile.id, %error, "credential decryption failed");
                return Ok(Err("sender_credentials_unreadable".to_string()));
            }
        };
        Ok(Ok(SenderSnapshot {
            sender_id: profile.id,
            from_name: profile.from_name,
            from_address: profile.from_address,
            smtp_host: profile.smtp_host,
            smtp_port: profile.smtp_port,
            smtp_username: profile.smtp_username,
            smtp_password,
            status: profile.status,
        }))
    }

    async fn contact_timezone(&self, contact_id: Uuid) -> anyhow::Result<Option<String>> {
        Ok(self
            .contacts
            .get(contact_id)
            .await?
            .and_then(|contact| contact.timezone))
    }

    fn stop_reason(&self, sequence: &Sequence, row: &Enrollment) -> Option<&'static str> {
        if sequence.stop_conditions.stop_on_reply && row.replied_at.is_some() {
            Some("stopped_on_reply")
        } else if sequence.stop_conditions.stop_on_bounce && row.bounced_at.is_some() {
            Some("stopped_on_bounce")
        } else {
            None
        }
    }

    fn step_skipped(&self, step: &SequenceStep, row: &Enrollment) -> bool {
        (step.skip_if_replied && row.replied_at.is_some())
            || (step.skip_if_bounced && row.bounced_at.is_some())
    }

    /// Determine where the row goes after the given step: the next step the
    /// skip conditions allow (with its schedule), completion, or an early
    /// stop-condition termination.
    fn plan_advance(
        &self,
        sequence: &Sequence,
        steps: &[SequenceStep],
        from_order: i32,
        row: &Enrollment,
        now: DateTime<Utc>,
        contact_timezone: Option<&str>,
    ) -> Advance {
        for step in steps.iter().filter(|s| s.order > from_order) {
            if self.stop_reason(sequence, row).is_some() {
                return Advance::Terminated;
            }
            if self.step_skipped(step, row) {
                continue;
            }
            let delay_hours = match (row.replied_at, step.reply_delay_hours) {
                (Some(_), Some(alternate)) => alternate,
                _ => step.delay_hours,
            };
            let mut random = || rand::rng().random::<f64>();
            let scheduled_at = compute_scheduled_utc(
                now,
                delay_hours,
                contact_timezone,
                self.settings.fallback_timezone.as_deref(),
                &sequence.schedule,
                &mut random,
            );
            let snapshot = resolve_snapshot(
                &sequence.schedule,
                contact_timezone,
                self.settings.fallback_timezone.as_deref(),
            );
            return Advance::Continue {
                step_order: step.order,
                scheduled_at,
                snapshot,
            };
        }
        Advance::Finished
    }

    fn mail_policy(&self, snapshot: &SenderSnapshot) -> CallPolicy {
        CallPolicy {
            breaker_key: snapshot.breaker_key(),
            retries: self.settings.mail_retries,
            base_delay: self.settings.mail_base_delay,
            timeout: self.settings.mail_timeout,
            breaker_threshold: self.settings.breaker_threshold,
            breaker_reset: self.settings.breaker_reset,
        }
    }

    fn append_log(
        &self,
        row: &Enrollment,
        step_order: Option<i32>,
        kind: DeliveryLogKind,
        status: &str,
    ) -> LogBuilder {
        LogBuilder {
            entry: NewDeliveryLogEntry {
                contact_id: row.contact_id,
                sequence_id: row.sequence_id,
                step_order,
                kind,
                status: status.to_string(),
                message_id: None,
                reason: None,
                payload: None,
            },
        }
    }
}

struct LogBuilder {
    entry: NewDeliveryLogEntry,
}

impl LogBuilder {
    fn reason(mut self, reason: impl Into<String>) -> Self {
        self.entry.reason = Some(reason.into());
        self
    }

    fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.entry.message_id = Some(message_id.into());
        self
    }

    fn payload(mut self, payload: serde_json::Value) -> Self {
        self.entry.payload = Some(payload);
        self
    }

    async fn save(self, logs: &dyn DeliveryLogRepository) -> anyhow::Result<()> {
        logs.append(self.entry).await?;
        Ok(())
    }
}
