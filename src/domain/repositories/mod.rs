use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::models::{
    Contact, DeliveryLogEntry, DeliveryLogKind, Enrollment, NewDeliveryLogEntry, ScheduleSnapshot,
    SenderProfile, Sequence, SequenceStep,
};

#[async_trait]
pub trait SequenceRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Sequence>>;
    /// Steps ordered by their 1-based position.
    async fn steps(&self, sequence_id: Uuid) -> anyhow::Result<Vec<SequenceStep>>;
}

#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Contact>>;
}

#[async_trait]
pub trait SenderRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<SenderProfile>>;
}

/// Where the worker lands after a dispatch or a pre-dispatch skip.
#[derive(Debug, Clone)]
pub enum Advance {
    /// Wait on a later step: row stays pending with a fresh schedule.
    Continue {
        step_order: i32,
        scheduled_at: DateTime<Utc>,
        snapshot: ScheduleSnapshot,
    },
    /// No steps remain; the enrollment ran to completion.
    Finished,
    /// A stop condition ended the enrollment early.
    Terminated,
}

/// All state transitions that matter for correctness are conditional
/// updates keyed on the row's current state, so concurrent workers and
/// reconciliation never double-apply. Methods returning `bool` report
/// whether the conditional matched; `false` means another actor got there
/// first and the caller has nothing to do.
#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Enrollment>>;

    async fn find_pair(
        &self,
        contact_id: Uuid,
        sequence_id: Uuid,
    ) -> anyhow::Result<Option<Enrollment>>;

    /// Pending rows whose scheduled_at has arrived, oldest first.
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        team_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<Enrollment>>;

    async fn list_by_sequence(&self, sequence_id: Uuid) -> anyhow::Result<Vec<Enrollment>>;

    /// Most recent sent_at across the whole sequence, for gap throttling.
    async fn last_sent_at(&self, sequence_id: Uuid) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Atomically take ownership of a due row: clears scheduled_at (making
    /// the row ineligible for re-selection, the same mechanism
    /// reconciliation uses) and bumps the attempt counter, conditional on
    /// the row still being pending with a scheduled_at.
    async fn claim(&self, id: Uuid, now: DateTime<Utc>, manual: bool) -> anyhow::Result<bool>;

    /// Successful dispatch: sets sent_at and applies the advance.
    async fn record_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        advance: Advance,
    ) -> anyhow::Result<bool>;

    /// Pre-dispatch skip of the current step.
    async fn record_skip(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        advance: Advance,
    ) -> anyhow::Result<bool>;

    /// Transient failure keeps the row pending with a pushed-out
    /// scheduled_at; a permanent failure (reschedule = None) parks it as
    /// failed.
    async fn record_failure(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        error: &str,
        reschedule: Option<DateTime<Utc>>,
    ) -> anyhow::Result<bool>;

    /// Min-gap deferral; the row keeps its schedule and is re-evaluated on
    /// a later pass.
    async fn record_throttle(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Reply reconciliation: state -> replied, replied_at set at most once,
    /// schedule and step pointer cleared, log appended — one atomic unit.
    /// `false` when the row is bounced (a reply never downgrades a bounce).
    async fn apply_reply(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        log: NewDeliveryLogEntry,
    ) -> anyhow::Result<bool>;

    /// Symmetric to [`apply_reply`]; `false` when the row is replied.
    async fn apply_bounce(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        log: NewDeliveryLogEntry,
    ) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait DeliveryLogRepository: Send + Sync {
    async fn append(&self, entry: NewDeliveryLogEntry) -> anyhow::Result<DeliveryLogEntry>;

    /// Sent rows whose normalised message id matches.
    async fn find_sent_by_message_id(
        &self,
        message_id: &str,
    ) -> anyhow::Result<Vec<DeliveryLogEntry>>;

    /// Message ids of all sent rows for one enrollment pair, used as the
    /// candidate audit set during reconciliation.
    async fn sent_message_ids(
        &self,
        contact_id: Uuid,
        sequence_id: Uuid,
    ) -> anyhow::Result<Vec<String>>;

    /// Whether a (message id, kind) pair was already recorded; replaying
    /// the same physical event must be a no-op.
    async fn event_exists(
        &self,
        message_id: &str,
        kind: DeliveryLogKind,
    ) -> anyhow::Result<bool>;

    /// Distinct contacts with at least one reply entry for the sequence.
    async fn replied_contacts(&self, sequence_id: Uuid) -> anyhow::Result<HashSet<Uuid>>;

    /// Historical sent tallies per step (None bucket for unmatched rows).
    async fn sent_counts_by_step(
        &self,
        sequence_id: Uuid,
    ) -> anyhow::Result<HashMap<Option<i32>, i64>>;

    /// Soft archival used when a sequence is deleted. Returns rows touched.
    async fn archive_replies(&self, sequence_id: Uuid) -> anyhow::Result<u64>;
}
