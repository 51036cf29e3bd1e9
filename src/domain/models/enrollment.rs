use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sequence::{ScheduleMode, SendWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    Pending,
    Sent,
    Replied,
    Bounced,
    Failed,
    Skipped,
}

impl EnrollmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentState::Pending => "pending",
            EnrollmentState::Sent => "sent",
            EnrollmentState::Replied => "replied",
            EnrollmentState::Bounced => "bounced",
            EnrollmentState::Failed => "failed",
            EnrollmentState::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(EnrollmentState::Pending),
            "sent" => Some(EnrollmentState::Sent),
            "replied" => Some(EnrollmentState::Replied),
            "bounced" => Some(EnrollmentState::Bounced),
            "failed" => Some(EnrollmentState::Failed),
            "skipped" => Some(EnrollmentState::Skipped),
            _ => None,
        }
    }
}

/// The resolved scheduling parameters used when `scheduled_at` was last
/// computed, kept on the row for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub mode: ScheduleMode,
    pub windows: Vec<SendWindow>,
    pub timezone: String,
}

/// One row per (contact, sequence).
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub sequence_id: Uuid,
    pub team_id: Uuid,
    pub state: EnrollmentState,
    /// 1-based order of the step the contact is currently waiting on.
    pub current_step: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub skipped_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_throttled_at: Option<DateTime<Utc>>,
    pub manually_triggered_at: Option<DateTime<Utc>>,
    pub schedule_snapshot: Option<ScheduleSnapshot>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
