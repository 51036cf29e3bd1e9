use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::models::{Enrollment, EnrollmentState, SequenceStep};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub sent: u64,
    pub replied: u64,
    pub bounced: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl StatusCounts {
    fn bump(&mut self, state: EnrollmentState) {
        match state {
            EnrollmentState::Pending => self.pending += 1,
            EnrollmentState::Sent => self.sent += 1,
            EnrollmentState::Replied => self.replied += 1,
            EnrollmentState::Bounced => self.bounced += 1,
            EnrollmentState::Failed => self.failed += 1,
            EnrollmentState::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.sent + self.replied + self.bounced + self.failed + self.skipped
    }
}

#[derive(Debug, Clone)]
pub struct StatusSummary {
    pub total: u64,
    pub counts: StatusCounts,
    /// Distinct contacts with a reply, counted once per contact even when a
    /// contact appears on multiple rows.
    pub reply_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StepBreakdown {
    /// None is the bucket for rows whose step could not be resolved.
    pub step_order: Option<i32>,
    /// Rows currently pointing at this step, by status.
    pub counts: StatusCounts,
    /// Historical sends through this step, supplied externally because the
    /// current-pointer counts undercount contacts that moved past it.
    pub sent_total: i64,
}

#[derive(Debug, Clone)]
pub struct ContactBreakdown {
    pub contact_id: Uuid,
    pub state: EnrollmentState,
    pub current_step: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SequenceReport {
    pub summary: StatusSummary,
    pub per_step: Vec<StepBreakdown>,
    pub contacts: Vec<ContactBreakdown>,
}

/// Pure read-side reducer folding raw enrollment rows into summary counters
/// and per-step breakdowns. Never mutates state.
pub fn aggregate(
    rows: &[Enrollment],
    steps: &[SequenceStep],
    sent_per_step: &HashMap<Option<i32>, i64>,
    replied_contacts: &HashSet<Uuid>,
) -> SequenceReport {
    let mut counts = StatusCounts::default();
    let mut last_activity: Option<DateTime<Utc>> = None;
    let mut repliers: HashSet<Uuid> = HashSet::new();
    let mut step_counts: HashMap<Option<i32>, StatusCounts> = HashMap::new();

    for row in rows {
        counts.bump(row.state);
        step_counts.entry(row.current_step).or_default().bump(row.state);
        if row.replied_at.is_some() || replied_contacts.contains(&row.contact_id) {
            repliers.insert(row.contact_id);
        }
        last_activity = match last_activity {
            Some(seen) => Some(seen.max(row.updated_at)),
            None => Some(row.updated_at),
        };
    }

    // Every defined step appears, including steps with zero current rows;
    // the null bucket and orphaned pointers appear only when populated.
    let mut orders: Vec<Option<i32>> = steps.iter().map(|s| Some(s.order)).collect();
    for key in step_counts.keys().chain(sent_per_step.keys()) {
        if !orders.contains(key) {
            orders.push(*key);
        }
    }
    orders.sort_by_key(|order| (order.is_none(), *order));

    let per_step = orders
        .into_iter()
        .map(|step_order| StepBreakdown {
            step_order,
            counts: step_counts.get(&step_order).cloned().unwrap_or_default(),
            sent_total: sent_per_step.get(&step_order).copied().unwrap_or(0),
        })
        .collect();

    let contacts = rows
        .iter()
        .map(|row| ContactBreakdown {
            contact_id: row.contact_id,
            state: row.state,
            current_step: row.current_step,
            scheduled_at: row.scheduled_at,
            sent_at: row.sent_at,
            replied_at: row.replied_at,
            bounced_at: row.bounced_at,
            attempts: row.attempts,
            updated_at: row.updated_at,
        })
        .collect();

    SequenceReport {
        summary: StatusSummary {
            total: rows.len() as u64,
            counts,
            reply_count: repliers.len() as u64,
            last_activity,
        },
        per_step,
        contacts,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn row(
        contact_id: Uuid,
        state: EnrollmentState,
        current_step: Option<i32>,
        replied_at: Option<DateTime<Utc>>,
    ) -> Enrollment {
        let now = Utc::now();
        Enrollment {
            id: Uuid::new_v4(),
            contact_id,
            sequence_id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            state,
            current_step,
            scheduled_at: None,
            sent_at: None,
            replied_at,
            bounced_at: None,
            skipped_at: None,
            attempts: 0,
            last_throttled_at: None,
            manually_triggered_at: None,
            schedule_snapshot: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn step(order: i32) -> SequenceStep {
        SequenceStep {
            id: Uuid::new_v4(),
            sequence_id: Uuid::new_v4(),
            order,
            subject_template: String::new(),
            body_template: String::new(),
            delay_hours: 24,
            reply_delay_hours: None,
            skip_if_replied: false,
            skip_if_bounced: false,
        }
    }

    #[test]
    fn totals_match_per_status_and_per_step_sums() {
        let replied = Uuid::new_v4();
        let rows = vec![
            row(Uuid::new_v4(), EnrollmentState::Pending, Some(1), None),
            row(Uuid::new_v4(), EnrollmentState::Sent, Some(2), None),
            row(replied, EnrollmentState::Replied, None, Some(Utc::now())),
            row(Uuid::new_v4(), EnrollmentState::Failed, None, None),
        ];
        let steps = vec![step(1), step(2), step(3)];

        let report = aggregate(&rows, &steps, &HashMap::new(), &HashSet::new());

        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.counts.total(), report.summary.total);
        let step_sum: u64 = report.per_step.iter().map(|s| s.counts.total()).sum();
        assert_eq!(step_sum, report.summary.total);
    }

    #[test]
    fn reply_count_deduplicates_contacts() {
        let contact = Uuid::new_v4();
        let rows = vec![
            row(contact, EnrollmentState::Replied, None, Some(Utc::now())),
            row(contact, EnrollmentState::Replied, None, Some(Utc::now())),
        ];
        let report = aggregate(&rows, &[], &HashMap::new(), &HashSet::new());
        assert_eq!(report.summary.reply_count, 1);
    }

    #[test]
    fn reply_log_entries_count_even_without_reply_timestamp() {
        let contact = Uuid::new_v4();
        let rows = vec![row(contact, EnrollmentState::Sent, Some(2), None)];
        let mut replied = HashSet::new();
        replied.insert(contact);

        let report = aggregate(&rows, &[], &HashMap::new(), &replied);
        assert_eq!(report.summary.reply_count, 1);
    }

    #[test]
    fn zero_row_steps_and_null_bucket_are_present() {
        let rows = vec![row(Uuid::new_v4(), EnrollmentState::Failed, None, None)];
        let steps = vec![step(1), step(2)];
        let mut sent_per_step = HashMap::new();
        sent_per_step.insert(Some(1), 12i64);

        let report = aggregate(&rows, &steps, &sent_per_step, &HashSet::new());

        let orders: Vec<Option<i32>> =
            report.per_step.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![Some(1), Some(2), None]);
        assert_eq!(report.per_step[0].sent_total, 12);
        assert_eq!(report.per_step[2].counts.failed, 1);
    }

    #[test]
    fn last_activity_is_the_latest_update() {
        let mut first = row(Uuid::new_v4(), EnrollmentState::Sent, None, None);
        let mut second = row(Uuid::new_v4(), EnrollmentState::Sent, None, None);
        first.updated_at = Utc::now() - Duration::hours(2);
        second.updated_at = Utc::now();

        let report = aggregate(
            &[first, second.clone()],
            &[],
            &HashMap::new(),
            &HashSet::new(),
        );
        assert_eq!(report.summary.last_activity, Some(second.updated_at));

        let empty = aggregate(&[], &[], &HashMap::new(), &HashSet::new());
        assert!(empty.summary.last_activity.is_none());
    }
}
