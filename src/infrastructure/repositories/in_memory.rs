use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{
    Contact, DeliveryLogEntry, DeliveryLogKind, Enrollment, EnrollmentState, NewDeliveryLogEntry,
    SenderProfile, Sequence, SequenceStep,
};
use crate::domain::repositories::{
    Advance, ContactRepository, DeliveryLogRepository, EnrollmentRepository, SenderRepository,
    SequenceRepository,
};

#[derive(Default)]
pub struct InMemorySequenceRepository {
    sequences: Arc<RwLock<HashMap<Uuid, Sequence>>>,
    steps: Arc<RwLock<HashMap<Uuid, Vec<SequenceStep>>>>,
}

impl InMemorySequenceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_sequence(&self, sequence: Sequence) {
        self.sequences.write().await.insert(sequence.id, sequence);
    }

    pub async fn put_steps(&self, sequence_id: Uuid, steps: Vec<SequenceStep>) {
        self.steps.write().await.insert(sequence_id, steps);
    }
}

#[async_trait]
impl SequenceRepository for InMemorySequenceRepository {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Sequence>> {
        Ok(self.sequences.read().await.get(&id).cloned())
    }

    async fn steps(&self, sequence_id: Uuid) -> anyhow::Result<Vec<SequenceStep>> {
        let mut steps = self
            .steps
            .read()
            .await
            .get(&sequence_id)
            .cloned()
            .unwrap_or_default();
        steps.sort_by_key(|step| step.order);
        Ok(steps)
    }
}

#[derive(Default)]
pub struct InMemoryContactRepository {
    contacts: Arc<RwLock<HashMap<Uuid, Contact>>>,
}

impl InMemoryContactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, contact: Contact) {
        self.contacts.write().await.insert(contact.id, contact);
    }
}

#[async_trait]
impl ContactRepository for InMemoryContactRepository {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Contact>> {
        Ok(self.contacts.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemorySenderRepository {
    senders: Arc<RwLock<HashMap<Uuid, SenderProfile>>>,
}

impl InMemorySenderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, sender: SenderProfile) {
        self.senders.write().await.insert(sender.id, sender);
    }
}

#[async_trait]
impl SenderRepository for InMemorySenderRepository {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<SenderProfile>> {
        Ok(self.senders.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryLogRepository {
    entries: Arc<RwLock<Vec<DeliveryLogEntry>>>,
}

impl InMemoryDeliveryLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<DeliveryLogEntry> {
        self.entries.read().await.clone()
    }

    async fn push(&self, entry: NewDeliveryLogEntry) -> DeliveryLogEntry {
        let stored = DeliveryLogEntry {
            id: Uuid::new_v4(),
            contact_id: entry.contact_id,
            sequence_id: entry.sequence_id,
            step_order: entry.step_order,
            kind: entry.kind,
            status: entry.status,
            message_id: entry.message_id,
            reason: entry.reason,
            payload: entry.payload,
            created_at: Utc::now(),
        };
        self.entries.write().await.push(stored.clone());
        stored
    }
}

#[async_trait]
impl DeliveryLogRepository for InMemoryDeliveryLogRepository {
    async fn append(&self, entry: NewDeliveryLogEntry) -> anyhow::Result<DeliveryLogEntry> {
        Ok(self.push(entry).await)
    }

    async fn find_sent_by_message_id(
        &self,
        message_id: &str,
    ) -> anyhow::Result<Vec<DeliveryLogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.kind == DeliveryLogKind::Sent)
            .filter(|e| e.message_id.as_deref() == Some(message_id))
            .cloned()
            .collect())
    }

    async fn sent_message_ids(
        &self,
        contact_id: Uuid,
        sequence_id: Uuid,
    ) -> anyhow::Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| {
                e.kind == DeliveryLogKind::Sent
                    && e.contact_id == contact_id
                    && e.sequence_id == sequence_id
            })
            .filter_map(|e| e.message_id.clone())
            .collect())
    }

    async fn event_exists(
        &self,
        message_id: &str,
        kind: DeliveryLogKind,
    ) -> anyhow::Result<bool> {
        // A soft-archived reply still counts as the reply having happened.
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.message_id.as_deref() == Some(message_id))
            .any(|e| {
                e.kind == kind
                    || (kind == DeliveryLogKind::Reply && e.kind == DeliveryLogKind::ReplyArchived)
            }))
    }

    async fn replied_contacts(&self, sequence_id: Uuid) -> anyhow::Result<HashSet<Uuid>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.kind == DeliveryLogKind::Reply && e.sequence_id == sequence_id)
            .map(|e| e.contact_id)
            .collect())
    }

    async fn sent_counts_by_step(
        &self,
        sequence_id: Uuid,
    ) -> anyhow::Result<HashMap<Option<i32>, i64>> {
        let mut counts = HashMap::new();
        for entry in self.entries.read().await.iter() {
            if entry.kind == DeliveryLogKind::Sent && entry.sequence_id == sequence_id {
                *counts.entry(entry.step_order).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn archive_replies(&self, sequence_id: Uuid) -> anyhow::Result<u64> {
        let mut entries = self.entries.write().await;
        let mut archived = 0;
        for entry in entries.iter_mut() {
            if entry.kind == DeliveryLogKind::Reply && entry.sequence_id == sequence_id {
                entry.kind = DeliveryLogKind::ReplyArchived;
                archived += 1;
            }
        }
        Ok(archived)
    }
}

/// In-memory enrollment store. Conditional transitions are applied under a
/// single write lock, mirroring the storage-level atomicity the Postgres
/// implementation gets from conditional UPDATEs.
pub struct InMemoryEnrollmentRepository {
    rows: Arc<RwLock<HashMap<Uuid, Enrollment>>>,
    logs: Arc<InMemoryDeliveryLogRepository>,
}

impl InMemoryEnrollmentRepository {
    pub fn new(logs: Arc<InMemoryDeliveryLogRepository>) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            logs,
        }
    }

    pub async fn put(&self, row: Enrollment) {
        self.rows.write().await.insert(row.id, row);
    }

    fn apply_advance(row: &mut Enrollment, at: DateTime<Utc>, advance: Advance, sent: bool) {
        match advance {
            Advance::Continue {
                step_order,
                scheduled_at,
                snapshot,
            } => {
                row.state = EnrollmentState::Pending;
                row.current_step = Some(step_order);
                row.scheduled_at = Some(scheduled_at);
                row.schedule_snapshot = Some(snapshot);
            }
            Advance::Finished => {
                if sent {
                    row.state = EnrollmentState::Sent;
                } else {
                    row.state = EnrollmentState::Skipped;
                    row.skipped_at = Some(at);
                }
                row.current_step = None;
                row.scheduled_at = None;
            }
            Advance::Terminated => {
                row.state = EnrollmentState::Skipped;
                row.skipped_at = Some(at);
                row.current_step = None;
                row.scheduled_at = None;
            }
        }
        row.updated_at = at;
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryEnrollmentRepository {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Enrollment>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_pair(
        &self,
        contact_id: Uuid,
        sequence_id: Uuid,
    ) -> anyhow::Result<Option<Enrollment>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.contact_id == contact_id && r.sequence_id == sequence_id)
            .cloned())
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        team_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<Enrollment>> {
        let rows = self.rows.read().await;
        let mut due: Vec<Enrollment> = rows
            .values()
            .filter(|r| r.state == EnrollmentState::Pending)
            .filter(|r| r.scheduled_at.is_some_and(|at| at <= now))
            .filter(|r| team_id.is_none_or(|team| r.team_id == team))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn list_by_sequence(&self, sequence_id: Uuid) -> anyhow::Result<Vec<Enrollment>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.sequence_id == sequence_id)
            .cloned()
            .collect())
    }

    async fn last_sent_at(&self, sequence_id: Uuid) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.sequence_id == sequence_id)
            .filter_map(|r| r.sent_at)
            .max())
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>, manual: bool) -> anyhow::Result<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.state != EnrollmentState::Pending || row.scheduled_at.is_none() {
            return Ok(false);
        }
        row.scheduled_at = None;
        row.attempts += 1;
        if manual {
            row.manually_triggered_at = Some(now);
        }
        row.updated_at = now;
        Ok(true)
    }

    async fn record_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        advance: Advance,
    ) -> anyhow::Result<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.state != EnrollmentState::Pending {
            return Ok(false);
        }
        row.sent_at = Some(sent_at);
        Self::apply_advance(row, sent_at, advance, true);
        Ok(true)
    }

    async fn record_skip(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        advance: Advance,
    ) -> anyhow::Result<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.state != EnrollmentState::Pending {
            return Ok(false);
        }
        Self::apply_advance(row, at, advance, false);
        Ok(true)
    }

    async fn record_failure(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        error: &str,
        reschedule: Option<DateTime<Utc>>,
    ) -> anyhow::Result<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.state != EnrollmentState::Pending {
            return Ok(false);
        }
        row.last_error = Some(error.to_string());
        match reschedule {
            Some(retry_at) => row.scheduled_at = Some(retry_at),
            None => {
                row.state = EnrollmentState::Failed;
                row.scheduled_at = None;
            }
        }
        row.updated_at = at;
        Ok(true)
    }

    async fn record_throttle(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.state != EnrollmentState::Pending {
            return Ok(false);
        }
        row.last_throttled_at = Some(at);
        row.updated_at = at;
        Ok(true)
    }

    async fn apply_reply(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        log: NewDeliveryLogEntry,
    ) -> anyhow::Result<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.state == EnrollmentState::Bounced {
            return Ok(false);
        }
        row.state = EnrollmentState::Replied;
        row.replied_at = row.replied_at.or(Some(at));
        row.scheduled_at = None;
        row.current_step = None;
        row.updated_at = at;
        drop(rows);
        self.logs.push(log).await;
        Ok(true)
    }

    async fn apply_bounce(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        log: NewDeliveryLogEntry,
    ) -> anyhow::Result<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.state == EnrollmentState::Replied {
            return Ok(false);
        }
        row.state = EnrollmentState::Bounced;
        row.bounced_at = row.bounced_at.or(Some(at));
        row.scheduled_at = None;
        row.current_step = None;
        row.updated_at = at;
        drop(rows);
        self.logs.push(log).await;
        Ok(true)
    }
}
