use poem_openapi::Object;
use uuid::Uuid;

use crate::presentation::models::{EnrollmentStateDto, EventKindDto};

#[derive(Object)]
pub struct RowDetailDto {
    pub contact_id: Uuid,
    pub sequence_id: Uuid,
    pub step_order: Option<i32>,
    pub action: String,
    pub reason: Option<String>,
}

#[derive(Object)]
pub struct PassReportDto {
    pub scanned: u32,
    pub sent: u32,
    pub failed: u32,
    pub retried: u32,
    pub skipped: u32,
    pub duration_ms: u64,
    pub details: Vec<RowDetailDto>,
}

#[derive(Object)]
pub struct EventResultDto {
    #[oai(rename = "type")]
    pub kind: EventKindDto,
    /// "processed", or the skip reason.
    pub status: String,
    pub contact_id: Option<Uuid>,
    pub sequence_id: Option<Uuid>,
}

#[derive(Object)]
pub struct EventsResponseDto {
    pub processed: Vec<EventResultDto>,
}

#[derive(Object)]
pub struct StatusCountsDto {
    pub pending: u64,
    pub sent: u64,
    pub replied: u64,
    pub bounced: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Object)]
pub struct StepBreakdownDto {
    pub step_order: Option<i32>,
    pub counts: StatusCountsDto,
    pub sent_total: i64,
}

#[derive(Object)]
pub struct ContactBreakdownDto {
    pub contact_id: Uuid,
    pub state: EnrollmentStateDto,
    pub current_step: Option<i32>,
    pub scheduled_at: Option<String>,
    pub sent_at: Option<String>,
    pub replied_at: Option<String>,
    pub bounced_at: Option<String>,
    pub attempts: i32,
    pub updated_at: String,
}

#[derive(Object)]
pub struct SequenceStatusDto {
    pub total: u64,
    pub counts: StatusCountsDto,
    pub reply_count: u64,
    pub last_activity: Option<String>,
    pub per_step: Vec<StepBreakdownDto>,
    pub contacts: Vec<ContactBreakdownDto>,
}

#[derive(Object)]
pub struct ArchiveRepliesResponseDto {
    pub archived: u64,
}
