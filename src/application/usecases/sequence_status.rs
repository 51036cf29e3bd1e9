use std::sync::Arc;

use uuid::Uuid;

use crate::application::services::aggregate::{SequenceReport, aggregate};
use crate::domain::errors::DomainError;
use crate::domain::repositories::{
    DeliveryLogRepository, EnrollmentRepository, SequenceRepository,
};

/// Read-side status query consumed by the reporting layer. Folds the raw
/// enrollment rows through the pure aggregator; never mutates state.
pub struct GetSequenceStatus {
    sequences: Arc<dyn SequenceRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    logs: Arc<dyn DeliveryLogRepository>,
}

impl GetSequenceStatus {
    pub fn new(
        sequences: Arc<dyn SequenceRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        logs: Arc<dyn DeliveryLogRepository>,
    ) -> Self {
        Self {
            sequences,
            enrollments,
            logs,
        }
    }

    pub async fn execute(&self, sequence_id: Uuid) -> Result<SequenceReport, DomainError> {
        let Some(_sequence) = self.sequences.get(sequence_id).await? else {
            return Err(DomainError::NotFound(format!("sequence {sequence_id}")));
        };
        let steps = self.sequences.steps(sequence_id).await?;
        let rows = self.enrollments.list_by_sequence(sequence_id).await?;
        let replied_contacts = self.logs.replied_contacts(sequence_id).await?;
        let sent_per_step = self.logs.sent_counts_by_step(sequence_id).await?;

        Ok(aggregate(&rows, &steps, &sent_per_step, &replied_contacts))
    }
}
