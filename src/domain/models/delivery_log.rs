use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryLogKind {
    Sent,
    Failed,
    Skipped,
    Delayed,
    Reply,
    Bounce,
    ReplyArchived,
}

impl DeliveryLogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryLogKind::Sent => "sent",
            DeliveryLogKind::Failed => "failed",
            DeliveryLogKind::Skipped => "skipped",
            DeliveryLogKind::Delayed => "delayed",
            DeliveryLogKind::Reply => "reply",
            DeliveryLogKind::Bounce => "bounce",
            DeliveryLogKind::ReplyArchived => "reply_archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(DeliveryLogKind::Sent),
            "failed" => Some(DeliveryLogKind::Failed),
            "skipped" => Some(DeliveryLogKind::Skipped),
            "delayed" => Some(DeliveryLogKind::Delayed),
            "reply" => Some(DeliveryLogKind::Reply),
            "bounce" => Some(DeliveryLogKind::Bounce),
            "reply_archived" => Some(DeliveryLogKind::ReplyArchived),
            _ => None,
        }
    }
}

/// Append-only audit trail. Rows are never mutated apart from the soft
/// archival transition reply -> reply_archived when a sequence is deleted.
#[derive(Debug, Clone)]
pub struct DeliveryLogEntry {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub sequence_id: Uuid,
    /// Null when no step could be matched to the event.
    pub step_order: Option<i32>,
    pub kind: DeliveryLogKind,
    pub status: String,
    /// Normalised provider message id, when one exists.
    pub message_id: Option<String>,
    pub reason: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// What the engine records after an attempt or a reconciled event; ids and
/// timestamps are assigned by the repository.
#[derive(Debug, Clone)]
pub struct NewDeliveryLogEntry {
    pub contact_id: Uuid,
    pub sequence_id: Uuid,
    pub step_order: Option<i32>,
    pub kind: DeliveryLogKind,
    pub status: String,
    pub message_id: Option<String>,
    pub reason: Option<String>,
    pub payload: Option<serde_json::Value>,
}
