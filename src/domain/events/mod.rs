use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundEventKind {
    Reply,
    Bounce,
}

impl InboundEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundEventKind::Reply => "reply",
            InboundEventKind::Bounce => "bounce",
        }
    }
}

/// A reply or bounce signal as received from the push endpoint or the
/// file-drop fallback. Transient: only its reconciled side effects persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub kind: InboundEventKind,
    pub message_id: String,
    pub contact_id: Option<Uuid>,
    pub sequence_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub payload: Option<serde_json::Value>,
}

impl InboundEvent {
    /// Angle brackets stripped, case folded, surrounding whitespace removed.
    /// Both ingestion paths normalise before matching or deduplicating.
    pub fn normalized_message_id(&self) -> String {
        normalize_message_id(&self.message_id)
    }
}

pub fn normalize_message_id(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_normalization_strips_brackets_and_case() {
        assert_eq!(
            normalize_message_id("  <ABC.123@Mail.Example> "),
            "abc.123@mail.example"
        );
        assert_eq!(normalize_message_id("plain@id"), "plain@id");
    }
}
