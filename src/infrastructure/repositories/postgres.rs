use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres, Row};
use uuid::Uuid;

use crate::domain::models::{
    Contact, DeliveryLogEntry, DeliveryLogKind, Enrollment, EnrollmentState, NewDeliveryLogEntry,
    SchedulePolicy, ScheduleSnapshot, SenderProfile, SenderStatus, Sequence, SequenceStatus,
    SequenceStep, StopConditions,
};
use crate::domain::repositories::{
    Advance, ContactRepository, DeliveryLogRepository, EnrollmentRepository, SenderRepository,
    SequenceRepository,
};

pub type PgPool = Pool<Postgres>;

const ENROLLMENT_COLUMNS: &str = "id, contact_id, sequence_id, team_id, status, current_step, \
     scheduled_at, sent_at, replied_at, bounced_at, skipped_at, attempts, last_throttled_at, \
     manually_triggered_at, schedule_snapshot, last_error, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresSequenceRepository {
    pool: PgPool,
}

impl PostgresSequenceRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl SequenceRepository for PostgresSequenceRepository {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Sequence>> {
        let record = sqlx::query_as::<_, SequenceRecord>(
            r#"
            SELECT id, team_id, name, status, sender_id, schedule, min_gap_minutes,
                   stop_on_reply, stop_on_bounce, launched_at, created_at, updated_at
            FROM sequences
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Sequence::try_from).transpose()
    }

    async fn steps(&self, sequence_id: Uuid) -> anyhow::Result<Vec<SequenceStep>> {
        let rows = sqlx::query_as::<_, StepRecord>(
            r#"
            SELECT id, sequence_id, step_order, subject_template, body_template,
                   delay_hours, reply_delay_hours, skip_if_replied, skip_if_bounced
            FROM sequence_steps
            WHERE sequence_id = $1
            ORDER BY step_order ASC
            "#,
        )
        .bind(sequence_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SequenceStep::from).collect())
    }
}

#[derive(Clone)]
pub struct PostgresContactRepository {
    pool: PgPool,
}

impl PostgresContactRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl ContactRepository for PostgresContactRepository {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Contact>> {
        let record = sqlx::query_as::<_, ContactRecord>(
            r#"
            SELECT id, team_id, email, first_name, last_name, company, custom_fields,
                   timezone, created_at, updated_at
            FROM contacts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Contact::try_from).transpose()
    }
}

#[derive(Clone)]
pub struct PostgresSenderRepository {
    pool: PgPool,
}

impl PostgresSenderRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl SenderRepository for PostgresSenderRepository {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<SenderProfile>> {
        let record = sqlx::query_as::<_, SenderRecord>(
            r#"
            SELECT id, team_id, from_name, from_address, smtp_host, smtp_port,
                   smtp_username, smtp_password_encrypted, status, created_at, updated_at
            FROM senders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(SenderProfile::try_from).transpose()
    }
}

#[derive(Clone)]
pub struct PostgresEnrollmentRepository {
    pool: PgPool,
}

impl PostgresEnrollmentRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl EnrollmentRepository for PostgresEnrollmentRepository {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Enrollment>> {
        let record = sqlx::query_as::<_, EnrollmentRecord>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Enrollment::try_from).transpose()
    }

    async fn find_pair(
        &self,
        contact_id: Uuid,
        sequence_id: Uuid,
    ) -> anyhow::Result<Option<Enrollment>> {
        let record = sqlx::query_as::<_, EnrollmentRecord>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
             WHERE contact_id = $1 AND sequence_id = $2"
        ))
        .bind(contact_id)
        .bind(sequence_id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Enrollment::try_from).transpose()
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        team_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<Enrollment>> {
        let rows = sqlx::query_as::<_, EnrollmentRecord>(
            r#"
            SELECT e.id, e.contact_id, e.sequence_id, e.team_id, e.status, e.current_step,
                   e.scheduled_at, e.sent_at, e.replied_at, e.bounced_at, e.skipped_at,
                   e.attempts, e.last_throttled_at, e.manually_triggered_at,
                   e.schedule_snapshot, e.last_error, e.created_at, e.updated_at
            FROM enrollments e
            JOIN sequences s ON s.id = e.sequence_id
            WHERE e.status = 'pending'
              AND e.scheduled_at IS NOT NULL
              AND e.scheduled_at <= $1
              AND s.status = 'active'
              AND ($2::uuid IS NULL OR e.team_id = $2)
            ORDER BY e.scheduled_at ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(team_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Enrollment::try_from).collect()
    }

    async fn list_by_sequence(&self, sequence_id: Uuid) -> anyhow::Result<Vec<Enrollment>> {
        let rows = sqlx::query_as::<_, EnrollmentRecord>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE sequence_id = $1"
        ))
        .bind(sequence_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Enrollment::try_from).collect()
    }

    async fn last_sent_at(&self, sequence_id: Uuid) -> anyhow::Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"SELECT MAX(sent_at) AS last_sent FROM enrollments WHERE sequence_id = $1"#,
        )
        .bind(sequence_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("last_sent")?)
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>, manual: bool) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE enrollments
            SET scheduled_at = NULL,
                attempts = attempts + 1,
                manually_triggered_at = CASE WHEN $3 THEN $2 ELSE manually_triggered_at END,
                updated_at = $2
            WHERE id = $1 AND status = 'pending' AND scheduled_at IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(manual)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
        advance: Advance,
    ) -> anyhow::Result<bool> {
        let result = match advance {
            Advance::Continue {
                step_order,
                scheduled_at,
                snapshot,
            } => {
                sqlx::query(
                    r#"
                    UPDATE enrollments
                    SET sent_at = $2,
                        current_step = $3,
                        scheduled_at = $4,
                        schedule_snapshot = $5,
                        updated_at = $2
                    WHERE id = $1 AND status = 'pending'
                    "#,
                )
                .bind(id)
                .bind(sent_at)
                .bind(step_order)
                .bind(scheduled_at)
                .bind(serde_json::to_value(&snapshot)?)
                .execute(&self.pool)
                .await?
            }
            Advance::Finished => {
                sqlx::query(
                    r#"
                    UPDATE enrollments
                    SET status = 'sent',
                        sent_at = $2,
                        current_step = NULL,
                        scheduled_at = NULL,
                        updated_at = $2
                    WHERE id = $1 AND status = 'pending'
                    "#,
                )
                .bind(id)
                .bind(sent_at)
                .execute(&self.pool)
                .await?
            }
            Advance::Terminated => {
                sqlx::query(
                    r#"
                    UPDATE enrollments
                    SET status = 'skipped',
                        sent_at = $2,
                        skipped_at = $2,
                        current_step = NULL,
                        scheduled_at = NULL,
                        updated_at = $2
                    WHERE id = $1 AND status = 'pending'
                    "#,
                )
                .bind(id)
                .bind(sent_at)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn record_skip(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        advance: Advance,
    ) -> anyhow::Result<bool> {
        let result = match advance {
            Advance::Continue {
                step_order,
                scheduled_at,
                snapshot,
            } => {
                sqlx::query(
                    r#"
                    UPDATE enrollments
                    SET current_step = $3,
                        scheduled_at = $4,
                        schedule_snapshot = $5,
                        updated_at = $2
                    WHERE id = $1 AND status = 'pending'
                    "#,
                )
                .bind(id)
                .bind(at)
                .bind(step_order)
                .bind(scheduled_at)
                .bind(serde_json::to_value(&snapshot)?)
                .execute(&self.pool)
                .await?
            }
            Advance::Finished | Advance::Terminated => {
                sqlx::query(
                    r#"
                    UPDATE enrollments
                    SET status = 'skipped',
                        skipped_at = $2,
                        current_step = NULL,
                        scheduled_at = NULL,
                        updated_at = $2
                    WHERE id = $1 AND status = 'pending'
                    "#,
                )
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        error: &str,
        reschedule: Option<DateTime<Utc>>,
    ) -> anyhow::Result<bool> {
        let result = match reschedule {
            Some(retry_at) => {
                sqlx::query(
                    r#"
                    UPDATE enrollments
                    SET scheduled_at = $3, last_error = $4, updated_at = $2
                    WHERE id = $1 AND status = 'pending'
                    "#,
                )
                .bind(id)
                .bind(at)
                .bind(retry_at)
                .bind(error)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE enrollments
                    SET status = 'failed', scheduled_at = NULL, last_error = $3, updated_at = $2
                    WHERE id = $1 AND status = 'pending'
                    "#,
                )
                .bind(id)
                .bind(at)
                .bind(error)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn record_throttle(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE enrollments
            SET last_throttled_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn apply_reply(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        log: NewDeliveryLogEntry,
    ) -> anyhow::Result<bool> {
        // Status transition and log append commit or roll back together.
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE enrollments
            SET status = 'replied',
                replied_at = COALESCE(replied_at, $2),
                scheduled_at = NULL,
                current_step = NULL,
                updated_at = $2
            WHERE id = $1 AND status <> 'bounced'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        insert_log(&mut tx, &log).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn apply_bounce(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        log: NewDeliveryLogEntry,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE enrollments
            SET status = 'bounced',
                bounced_at = COALESCE(bounced_at, $2),
                scheduled_at = NULL,
                current_step = NULL,
                updated_at = $2
            WHERE id = $1 AND status <> 'replied'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        insert_log(&mut tx, &log).await?;
        tx.commit().await?;
        Ok(true)
    }
}

async fn insert_log(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    log: &NewDeliveryLogEntry,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO delivery_log (
            id, contact_id, sequence_id, step_order, kind, status, message_id,
            reason, payload, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(log.contact_id)
    .bind(log.sequence_id)
    .bind(log.step_order)
    .bind(log.kind.as_str())
    .bind(&log.status)
    .bind(&log.message_id)
    .bind(&log.reason)
    .bind(&log.payload)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[derive(Clone)]
pub struct PostgresDeliveryLogRepository {
    pool: PgPool,
}

impl PostgresDeliveryLogRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl DeliveryLogRepository for PostgresDeliveryLogRepository {
    async fn append(&self, entry: NewDeliveryLogEntry) -> anyhow::Result<DeliveryLogEntry> {
        let record = sqlx::query_as::<_, DeliveryLogRecord>(
            r#"
            INSERT INTO delivery_log (
                id, contact_id, sequence_id, step_order, kind, status, message_id,
                reason, payload, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, contact_id, sequence_id, step_order, kind, status, message_id,
                      reason, payload, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.contact_id)
        .bind(entry.sequence_id)
        .bind(entry.step_order)
        .bind(entry.kind.as_str())
        .bind(&entry.status)
        .bind(&entry.message_id)
        .bind(&entry.reason)
        .bind(&entry.payload)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        record.try_into()
    }

    async fn find_sent_by_message_id(
        &self,
        message_id: &str,
    ) -> anyhow::Result<Vec<DeliveryLogEntry>> {
        let rows = sqlx::query_as::<_, DeliveryLogRecord>(
            r#"
            SELECT id, contact_id, sequence_id, step_order, kind, status, message_id,
                   reason, payload, created_at
            FROM delivery_log
            WHERE kind = 'sent' AND message_id = $1
            "#,
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DeliveryLogEntry::try_from).collect()
    }

    async fn sent_message_ids(
        &self,
        contact_id: Uuid,
        sequence_id: Uuid,
    ) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id FROM delivery_log
            WHERE kind = 'sent' AND contact_id = $1 AND sequence_id = $2
              AND message_id IS NOT NULL
            ORDER BY created_at ASC
            "#,
        )
        .bind(contact_id)
        .bind(sequence_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("message_id").map_err(Into::into))
            .collect()
    }

    async fn event_exists(
        &self,
        message_id: &str,
        kind: DeliveryLogKind,
    ) -> anyhow::Result<bool> {
        // A soft-archived reply still counts as the reply having happened.
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM delivery_log
                WHERE message_id = $2
                  AND (kind = $1 OR (kind = 'reply_archived' AND $1 = 'reply'))
            )
            "#,
        )
        .bind(kind.as_str())
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn replied_contacts(&self, sequence_id: Uuid) -> anyhow::Result<HashSet<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT contact_id FROM delivery_log
            WHERE kind = 'reply' AND sequence_id = $1
            "#,
        )
        .bind(sequence_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| row.try_get::<Uuid, _>("contact_id").map_err(Into::into))
            .collect()
    }

    async fn sent_counts_by_step(
        &self,
        sequence_id: Uuid,
    ) -> anyhow::Result<HashMap<Option<i32>, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT step_order, COUNT(*) AS sent_count
            FROM delivery_log
            WHERE kind = 'sent' AND sequence_id = $1
            GROUP BY step_order
            "#,
        )
        .bind(sequence_id)
        .fetch_all(&self.pool)
        .await?;
        let mut counts = HashMap::new();
        for row in rows {
            let step: Option<i32> = row.try_get("step_order")?;
            let count: i64 = row.try_get("sent_count")?;
            counts.insert(step, count);
        }
        Ok(counts)
    }

    async fn archive_replies(&self, sequence_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_log
            SET kind = 'reply_archived'
            WHERE kind = 'reply' AND sequence_id = $1
            "#,
        )
        .bind(sequence_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(FromRow)]
struct SequenceRecord {
    id: Uuid,
    team_id: Uuid,
    name: String,
    status: String,
    sender_id: Option<Uuid>,
    schedule: serde_json::Value,
    min_gap_minutes: i64,
    stop_on_reply: bool,
    stop_on_bounce: bool,
    launched_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SequenceRecord> for Sequence {
    type Error = anyhow::Error;

    fn try_from(record: SequenceRecord) -> Result<Self, Self::Error> {
        let schedule: SchedulePolicy = serde_json::from_value(record.schedule)?;
        Ok(Sequence {
            id: record.id,
            team_id: record.team_id,
            name: record.name,
            status: SequenceStatus::parse(&record.status)
                .ok_or_else(|| anyhow!("unknown sequence status: {}", record.status))?,
            sender_id: record.sender_id,
            schedule,
            min_gap_minutes: record.min_gap_minutes,
            stop_conditions: StopConditions {
                stop_on_reply: record.stop_on_reply,
                stop_on_bounce: record.stop_on_bounce,
            },
            launched_at: record.launched_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

#[derive(FromRow)]
struct StepRecord {
    id: Uuid,
    sequence_id: Uuid,
    step_order: i32,
    subject_template: String,
    body_template: String,
    delay_hours: i64,
    reply_delay_hours: Option<i64>,
    skip_if_replied: bool,
    skip_if_bounced: bool,
}

impl From<StepRecord> for SequenceStep {
    fn from(record: StepRecord) -> Self {
        SequenceStep {
            id: record.id,
            sequence_id: record.sequence_id,
            order: record.step_order,
            subject_template: record.subject_template,
            body_template: record.body_template,
            delay_hours: record.delay_hours,
            reply_delay_hours: record.reply_delay_hours,
            skip_if_replied: record.skip_if_replied,
            skip_if_bounced: record.skip_if_bounced,
        }
    }
}

#[derive(FromRow)]
struct ContactRecord {
    id: Uuid,
    team_id: Uuid,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    company: Option<String>,
    custom_fields: serde_json::Value,
    timezone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContactRecord> for Contact {
    type Error = anyhow::Error;

    fn try_from(record: ContactRecord) -> Result<Self, Self::Error> {
        let custom_fields: HashMap<String, String> =
            serde_json::from_value(record.custom_fields).unwrap_or_default();
        Ok(Contact {
            id: record.id,
            team_id: record.team_id,
            email: record.email,
            first_name: record.first_name,
            last_name: record.last_name,
            company: record.company,
            custom_fields,
            timezone: record.timezone,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SenderRecord {
    id: Uuid,
    team_id: Uuid,
    from_name: String,
    from_address: String,
    smtp_host: String,
    smtp_port: i32,
    smtp_username: String,
    smtp_password_encrypted: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SenderRecord> for SenderProfile {
    type Error = anyhow::Error;

    fn try_from(record: SenderRecord) -> Result<Self, Self::Error> {
        Ok(SenderProfile {
            id: record.id,
            team_id: record.team_id,
            from_name: record.from_name,
            from_address: record.from_address,
            smtp_host: record.smtp_host,
            smtp_port: u16::try_from(record.smtp_port)
                .map_err(|_| anyhow!("smtp port out of range: {}", record.smtp_port))?,
            smtp_username: record.smtp_username,
            smtp_password_encrypted: record.smtp_password_encrypted,
            status: SenderStatus::parse(&record.status)
                .ok_or_else(|| anyhow!("unknown sender status: {}", record.status))?,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

#[derive(FromRow)]
struct EnrollmentRecord {
    id: Uuid,
    contact_id: Uuid,
    sequence_id: Uuid,
    team_id: Uuid,
    status: String,
    current_step: Option<i32>,
    scheduled_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    replied_at: Option<DateTime<Utc>>,
    bounced_at: Option<DateTime<Utc>>,
    skipped_at: Option<DateTime<Utc>>,
    attempts: i32,
    last_throttled_at: Option<DateTime<Utc>>,
    manually_triggered_at: Option<DateTime<Utc>>,
    schedule_snapshot: Option<serde_json::Value>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EnrollmentRecord> for Enrollment {
    type Error = anyhow::Error;

    fn try_from(record: EnrollmentRecord) -> Result<Self, Self::Error> {
        let schedule_snapshot: Option<ScheduleSnapshot> = record
            .schedule_snapshot
            .map(serde_json::from_value)
            .transpose()?;
        Ok(Enrollment {
            id: record.id,
            contact_id: record.contact_id,
            sequence_id: record.sequence_id,
            team_id: record.team_id,
            state: EnrollmentState::parse(&record.status)
                .ok_or_else(|| anyhow!("unknown enrollment status: {}", record.status))?,
            current_step: record.current_step,
            scheduled_at: record.scheduled_at,
            sent_at: record.sent_at,
            replied_at: record.replied_at,
            bounced_at: record.bounced_at,
            skipped_at: record.skipped_at,
            attempts: record.attempts,
            last_throttled_at: record.last_throttled_at,
            manually_triggered_at: record.manually_triggered_at,
            schedule_snapshot,
            last_error: record.last_error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

#[derive(FromRow)]
struct DeliveryLogRecord {
    id: Uuid,
    contact_id: Uuid,
    sequence_id: Uuid,
    step_order: Option<i32>,
    kind: String,
    status: String,
    message_id: Option<String>,
    reason: Option<String>,
    payload: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DeliveryLogRecord> for DeliveryLogEntry {
    type Error = anyhow::Error;

    fn try_from(record: DeliveryLogRecord) -> Result<Self, Self::Error> {
        Ok(DeliveryLogEntry {
            id: record.id,
            contact_id: record.contact_id,
            sequence_id: record.sequence_id,
            step_order: record.step_order,
            kind: DeliveryLogKind::parse(&record.kind)
                .ok_or_else(|| anyhow!("unknown delivery log kind: {}", record.kind))?,
            status: record.status,
            message_id: record.message_id,
            reason: record.reason,
            payload: record.payload,
            created_at: record.created_at,
        })
    }
}
