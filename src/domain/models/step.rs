use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SequenceStep {
    pub id: Uuid,
    pub sequence_id: Uuid,
    /// 1-based, contiguous and unique within a sequence.
    pub order: i32,
    pub subject_template: String,
    pub body_template: String,
    /// Hours to wait after the previous step was sent.
    pub delay_hours: i64,
    /// Alternate delay used when the contact replied to an earlier step.
    pub reply_delay_hours: Option<i64>,
    pub skip_if_replied: bool,
    pub skip_if_bounced: bool,
}
