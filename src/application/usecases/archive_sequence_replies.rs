use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::domain::repositories::DeliveryLogRepository;

/// Soft archival invoked by the CRUD layer when a sequence is deleted:
/// reply log rows transition to reply_archived so reporting stops counting
/// them, without breaking the append-only audit trail.
pub struct ArchiveSequenceReplies {
    logs: Arc<dyn DeliveryLogRepository>,
}

impl ArchiveSequenceReplies {
    pub fn new(logs: Arc<dyn DeliveryLogRepository>) -> Self {
        Self { logs }
    }

    pub async fn execute(&self, sequence_id: Uuid) -> anyhow::Result<u64> {
        let archived = self.logs.archive_replies(sequence_id).await?;
        info!(%sequence_id, archived, "archived reply log entries");
        Ok(archived)
    }
}
