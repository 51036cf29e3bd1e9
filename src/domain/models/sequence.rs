use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceStatus {
    Draft,
    Active,
    Paused,
    Deleted,
}

impl SequenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceStatus::Draft => "draft",
            SequenceStatus::Active => "active",
            SequenceStatus::Paused => "paused",
            SequenceStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(SequenceStatus::Draft),
            "active" => Some(SequenceStatus::Active),
            "paused" => Some(SequenceStatus::Paused),
            "deleted" => Some(SequenceStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    Immediate,
    Fixed,
    Window,
}

/// A send window inside a local day, `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulePolicy {
    pub mode: ScheduleMode,
    /// Time-of-day target for `Fixed` mode.
    pub send_time: Option<NaiveTime>,
    /// Windows for `Immediate`/`Window` modes. Empty means the whole day.
    pub windows: Vec<SendWindow>,
    /// Empty means every day is allowed.
    pub weekdays: Vec<Weekday>,
    pub respect_contact_timezone: bool,
    /// IANA zone id configured on the sequence.
    pub timezone: Option<String>,
}

impl SchedulePolicy {
    pub fn allows_weekday(&self, weekday: Weekday) -> bool {
        self.weekdays.is_empty() || self.weekdays.contains(&weekday)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopConditions {
    pub stop_on_reply: bool,
    pub stop_on_bounce: bool,
}

#[derive(Debug, Clone)]
pub struct Sequence {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub status: SequenceStatus,
    pub sender_id: Option<Uuid>,
    pub schedule: SchedulePolicy,
    pub min_gap_minutes: i64,
    pub stop_conditions: StopConditions,
    pub launched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sequence {
    /// A sequence may only dispatch when active with an assigned sender.
    /// The step check lives at the call site because steps are loaded
    /// separately.
    pub fn dispatchable(&self) -> bool {
        self.status == SequenceStatus::Active && self.sender_id.is_some()
    }
}
