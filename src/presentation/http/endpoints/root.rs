use std::sync::Arc;

use poem_openapi::Tags;

use crate::application::usecases::{
    archive_sequence_replies::ArchiveSequenceReplies, record_events::RecordSequenceEvents,
    run_delivery_pass::RunDeliveryPass, sequence_status::GetSequenceStatus,
};

pub struct ApiState {
    pub run_pass_usecase: Arc<RunDeliveryPass>,
    pub record_events_usecase: Arc<RecordSequenceEvents>,
    pub sequence_status_usecase: Arc<GetSequenceStatus>,
    pub archive_replies_usecase: Arc<ArchiveSequenceReplies>,
    pub api_secret: String,
}

/// Enum of API sections (tags)
#[derive(Tags)]
pub enum EndpointsTags {
    Health,
    Worker,
    Events,
    Sequences,
}

pub struct Endpoints;
