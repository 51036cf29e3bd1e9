use crate::{
    application::services::aggregate::{
        ContactBreakdown, SequenceReport, StatusCounts, StepBreakdown,
    },
    application::usecases::record_events::EventOutcome,
    application::usecases::run_delivery_pass::{PassReport, RowDetail},
    presentation::http::responses::{
        ContactBreakdownDto, EventResultDto, PassReportDto, RowDetailDto, SequenceStatusDto,
        StatusCountsDto, StepBreakdownDto,
    },
};

pub fn map_pass_report(report: &PassReport) -> PassReportDto {
    PassReportDto {
        scanned: report.scanned,
        sent: report.sent,
        failed: report.failed,
        retried: report.retried,
        skipped: report.skipped,
        duration_ms: report.duration_ms,
        details: report.details.iter().map(map_row_detail).collect(),
    }
}

fn map_row_detail(detail: &RowDetail) -> RowDetailDto {
    RowDetailDto {
        contact_id: detail.contact_id,
        sequence_id: detail.sequence_id,
        step_order: detail.step_order,
        action: detail.action.as_str().to_string(),
        reason: detail.reason.clone(),
    }
}

pub fn map_event_outcome(outcome: &EventOutcome) -> EventResultDto {
    match outcome {
        EventOutcome::Processed {
            kind,
            contact_id,
            sequence_id,
        } => EventResultDto {
            kind: (*kind).into(),
            status: "processed".to_string(),
            contact_id: Some(*contact_id),
            sequence_id: Some(*sequence_id),
        },
        EventOutcome::Skipped { kind, reason } => EventResultDto {
            kind: (*kind).into(),
            status: reason.as_str().to_string(),
            contact_id: None,
            sequence_id: None,
        },
    }
}

pub fn map_sequence_report(report: &SequenceReport) -> SequenceStatusDto {
    SequenceStatusDto {
        total: report.summary.total,
        counts: map_counts(&report.summary.counts),
        reply_count: report.summary.reply_count,
        last_activity: report.summary.last_activity.map(|at| at.to_rfc3339()),
        per_step: report.per_step.iter().map(map_step).collect(),
        contacts: report.contacts.iter().map(map_contact).collect(),
    }
}

fn map_counts(counts: &StatusCounts) -> StatusCountsDto {
    StatusCountsDto {
        pending: counts.pending,
        sent: counts.sent,
        replied: counts.replied,
        bounced: counts.bounced,
        failed: counts.failed,
        skipped: counts.skipped,
    }
}

fn map_step(step: &StepBreakdown) -> StepBreakdownDto {
    StepBreakdownDto {
        step_order: step.step_order,
        counts: map_counts(&step.counts),
        sent_total: step.sent_total,
    }
}

fn map_contact(contact: &ContactBreakdown) -> ContactBreakdownDto {
    ContactBreakdownDto {
        contact_id: contact.contact_id,
        state: contact.state.into(),
        current_step: contact.current_step,
        scheduled_at: contact.scheduled_at.map(|at| at.to_rfc3339()),
        sent_at: contact.sent_at.map(|at| at.to_rfc3339()),
        replied_at: contact.replied_at.map(|at| at.to_rfc3339()),
        bounced_at: contact.bounced_at.map(|at| at.to_rfc3339()),
        attempts: contact.attempts,
        updated_at: contact.updated_at.to_rfc3339(),
    }
}
