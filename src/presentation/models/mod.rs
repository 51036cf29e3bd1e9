use poem_openapi::Enum;

use crate::domain::events::InboundEventKind;
use crate::domain::models::EnrollmentState;

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum EnrollmentStateDto {
    #[oai(rename = "pending")]
    Pending,
    #[oai(rename = "sent")]
    Sent,
    #[oai(rename = "replied")]
    Replied,
    #[oai(rename = "bounced")]
    Bounced,
    #[oai(rename = "failed")]
    Failed,
    #[oai(rename = "skipped")]
    Skipped,
}

impl From<EnrollmentState> for EnrollmentStateDto {
    fn from(value: EnrollmentState) -> Self {
        match value {
            EnrollmentState::Pending => EnrollmentStateDto::Pending,
            EnrollmentState::Sent => EnrollmentStateDto::Sent,
            EnrollmentState::Replied => EnrollmentStateDto::Replied,
            EnrollmentState::Bounced => EnrollmentStateDto::Bounced,
            EnrollmentState::Failed => EnrollmentStateDto::Failed,
            EnrollmentState::Skipped => EnrollmentStateDto::Skipped,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventKindDto {
    #[oai(rename = "reply")]
    Reply,
    #[oai(rename = "bounce")]
    Bounce,
}

impl From<InboundEventKind> for EventKindDto {
    fn from(value: InboundEventKind) -> Self {
        match value {
            InboundEventKind::Reply => EventKindDto::Reply,
            InboundEventKind::Bounce => EventKindDto::Bounce,
        }
    }
}
