use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::events::{InboundEvent, InboundEventKind};
use crate::domain::models::{DeliveryLogKind, Enrollment, NewDeliveryLogEntry};
use crate::domain::repositories::{DeliveryLogRepository, EnrollmentRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The (message id, type) pair was already recorded; replay is a no-op.
    Duplicate,
    /// No unique (contact, sequence) row could be matched; events are never
    /// applied speculatively to an ambiguous row.
    TargetNotFound,
    /// The row is terminal in a way the event must not overwrite.
    StatusConflict,
    /// Structurally unusable event (empty message id).
    Invalid,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Duplicate => "duplicate",
            SkipReason::TargetNotFound => "target_not_found",
            SkipReason::StatusConflict => "status_conflict",
            SkipReason::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventOutcome {
    Processed {
        kind: InboundEventKind,
        contact_id: Uuid,
        sequence_id: Uuid,
    },
    Skipped {
        kind: InboundEventKind,
        reason: SkipReason,
    },
}

/// Reconciles inbound reply/bounce signals into enrollment state and the
/// append-only delivery log. Both the push endpoint and the file-drop
/// fallback feed this same usecase, so every write is deduplicated and
/// per-event atomic.
pub struct RecordSequenceEvents {
    enrollments: Arc<dyn EnrollmentRepository>,
    logs: Arc<dyn DeliveryLogRepository>,
}

impl RecordSequenceEvents {
    pub fn new(
        enrollments: Arc<dyn EnrollmentRepository>,
        logs: Arc<dyn DeliveryLogRepository>,
    ) -> Self {
        Self { enrollments, logs }
    }

    pub async fn execute(&self, events: Vec<InboundEvent>) -> anyhow::Result<Vec<EventOutcome>> {
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            outcomes.push(self.record_one(event).await?);
        }
        Ok(outcomes)
    }

    async fn record_one(&self, event: InboundEvent) -> anyhow::Result<EventOutcome> {
        let kind = event.kind;
        let message_id = event.normalized_message_id();
        if message_id.is_empty() {
            return Ok(EventOutcome::Skipped {
                kind,
                reason: SkipReason::Invalid,
            });
        }

        let log_kind = match kind {
            InboundEventKind::Reply => DeliveryLogKind::Reply,
            InboundEventKind::Bounce => DeliveryLogKind::Bounce,
        };
        if self.logs.event_exists(&message_id, log_kind).await? {
            return Ok(EventOutcome::Skipped {
                kind,
                reason: SkipReason::Duplicate,
            });
        }

        let Some((row, matched_step)) = self.resolve_target(&event, &message_id).await? else {
            warn!(%message_id, kind = kind.as_str(), "no unique target for inbound event");
            return Ok(EventOutcome::Skipped {
                kind,
                reason: SkipReason::TargetNotFound,
            });
        };

        // Audit trail: the candidate message ids considered while matching.
        let candidates = self
            .logs
            .sent_message_ids(row.contact_id, row.sequence_id)
            .await?;

        let entry = NewDeliveryLogEntry {
            contact_id: row.contact_id,
            sequence_id: row.sequence_id,
            step_order: matched_step,
            kind: log_kind,
            status: kind.as_str().to_string(),
            message_id: Some(message_id.clone()),
            reason: bounce_reason(&event),
            payload: Some(json!({
                "matched_message_id": message_id,
                "candidate_message_ids": candidates,
                "received": event.payload,
            })),
        };

        let applied = match kind {
            InboundEventKind::Reply => {
                self.enrollments
                    .apply_reply(row.id, event.occurred_at, entry)
                    .await?
            }
            InboundEventKind::Bounce => {
                self.enrollments
                    .apply_bounce(row.id, event.occurred_at, entry)
                    .await?
            }
        };

        if applied {
            info!(
                contact_id = %row.contact_id,
                sequence_id = %row.sequence_id,
                step = ?matched_step,
                kind = kind.as_str(),
                "inbound event reconciled"
            );
            Ok(EventOutcome::Processed {
                kind,
                contact_id: row.contact_id,
                sequence_id: row.sequence_id,
            })
        } else {
            Ok(EventOutcome::Skipped {
                kind,
                reason: SkipReason::StatusConflict,
            })
        }
    }

    /// Find the one row this event belongs to: the explicit (contact,
    /// sequence) hint when both halves are present and valid, otherwise a
    /// unique match among prior sent-log message ids.
    async fn resolve_target(
        &self,
        event: &InboundEvent,
        message_id: &str,
    ) -> anyhow::Result<Option<(Enrollment, Option<i32>)>> {
        if let (Some(contact_id), Some(sequence_id)) = (event.contact_id, event.sequence_id)
            && let Some(row) = self.enrollments.find_pair(contact_id, sequence_id).await?
        {
            let matched_step = self
                .logs
                .find_sent_by_message_id(message_id)
                .await?
                .into_iter()
                .find(|entry| {
                    entry.contact_id == contact_id && entry.sequence_id == sequence_id
                })
                .and_then(|entry| entry.step_order);
            return Ok(Some((row, matched_step)));
        }

        let matches = self.logs.find_sent_by_message_id(message_id).await?;
        let pairs: HashSet<(Uuid, Uuid)> = matches
            .iter()
            .map(|entry| (entry.contact_id, entry.sequence_id))
            .collect();
        if pairs.len() != 1 {
            return Ok(None);
        }
        let Some(&(contact_id, sequence_id)) = pairs.iter().next() else {
            return Ok(None);
        };
        let matched_step = matches.first().and_then(|entry| entry.step_order);
        Ok(self
            .enrollments
            .find_pair(contact_id, sequence_id)
            .await?
            .map(|row| (row, matched_step)))
    }
}

fn bounce_reason(event: &InboundEvent) -> Option<String> {
    if event.kind != InboundEventKind::Bounce {
        return None;
    }
    event
        .payload
        .as_ref()
        .and_then(|payload| payload.get("reason"))
        .and_then(|reason| reason.as_str())
        .map(|reason| reason.to_string())
}
