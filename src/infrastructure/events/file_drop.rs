use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::usecases::record_events::RecordSequenceEvents;
use crate::application::worker::FallbackIngest;
use crate::domain::events::{InboundEvent, InboundEventKind};

/// Fallback ingestion for providers that cannot push webhooks: they drop
/// `.json` files into a directory and the worker drains it between passes.
/// Processed files move to `processed/`, unreadable ones to `failed/` with
/// the error written alongside, so nothing is ever silently lost.
pub struct FileDropScanner {
    drop_dir: PathBuf,
    events: Arc<RecordSequenceEvents>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DroppedEvent {
    #[serde(rename = "type")]
    kind: InboundEventKind,
    message_id: String,
    contact_id: Option<Uuid>,
    sequence_id: Option<Uuid>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    occurred_at: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
}

/// Absent or unparseable timestamps read as `None` and fall back to
/// receipt time.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .and_then(|raw| raw.parse::<DateTime<Utc>>().ok()))
}

impl DroppedEvent {
    fn into_event(self, received_at: DateTime<Utc>) -> InboundEvent {
        InboundEvent {
            kind: self.kind,
            message_id: self.message_id,
            contact_id: self.contact_id,
            sequence_id: self.sequence_id,
            occurred_at: self.occurred_at.unwrap_or(received_at),
            payload: self.payload,
        }
    }
}

impl FileDropScanner {
    pub fn new(drop_dir: PathBuf, events: Arc<RecordSequenceEvents>) -> Arc<Self> {
        Arc::new(Self { drop_dir, events })
    }

    async fn process_file(&self, path: &Path) -> anyhow::Result<u32> {
        let raw = tokio::fs::read_to_string(path).await?;
        let received_at = Utc::now();
        let dropped = if path.extension().and_then(|ext| ext.to_str()) == Some("ndjson") {
            parse_ndjson(&raw)?
        } else {
            parse_drop(&raw)?
        };
        let events: Vec<InboundEvent> = dropped
            .into_iter()
            .map(|event| event.into_event(received_at))
            .collect();
        let count = events.len() as u32;
        self.events.execute(events).await?;
        Ok(count)
    }

    async fn move_to(&self, path: &Path, bucket: &str) -> anyhow::Result<PathBuf> {
        let dir = self.drop_dir.join(bucket);
        tokio::fs::create_dir_all(&dir).await?;
        let name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "event.json".into());
        let target = dir.join(name);
        tokio::fs::rename(path, &target).await?;
        Ok(target)
    }
}

#[async_trait]
impl FallbackIngest for FileDropScanner {
    async fn ingest(&self) -> anyhow::Result<u32> {
        let mut entries = match tokio::fs::read_dir(&self.drop_dir).await {
            Ok(entries) => entries,
            // A missing drop directory just means nothing was dropped yet.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut total = 0u32;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let extension = path.extension().and_then(|ext| ext.to_str());
            if !path.is_file() || !matches!(extension, Some("json") | Some("ndjson")) {
                continue;
            }

            match self.process_file(&path).await {
                Ok(count) => {
                    total += count;
                    self.move_to(&path, "processed").await?;
                    info!(file = %path.display(), count, "drop file ingested");
                }
                Err(err) => {
                    warn!(file = %path.display(), %err, "drop file rejected");
                    let target = self.move_to(&path, "failed").await?;
                    let note = target.with_extension("error.txt");
                    tokio::fs::write(&note, err.to_string()).await?;
                }
            }
        }
        Ok(total)
    }
}

/// A drop file holds one event object, a bare array, or `{"events": [...]}`.
fn parse_drop(raw: &str) -> anyhow::Result<Vec<DroppedEvent>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("events") {
            Some(serde_json::Value::Array(items)) => items,
            Some(other) => anyhow::bail!("events must be an array, got {other}"),
            None => vec![serde_json::Value::Object(map)],
        },
        other => anyhow::bail!("expected an event object or array, got {other}"),
    };
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(Into::into))
        .collect()
}

/// One JSON object per non-blank line.
fn parse_ndjson(raw: &str) -> anyhow::Result<Vec<DroppedEvent>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line)
                .map_err(|err| anyhow::anyhow!("line {}: {err}", number + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::application::usecases::record_events::RecordSequenceEvents;
    use crate::application::worker::FallbackIngest;
    use crate::domain::models::{
        DeliveryLogKind, Enrollment, EnrollmentState, NewDeliveryLogEntry,
    };
    use crate::domain::repositories::{DeliveryLogRepository, EnrollmentRepository};
    use crate::infrastructure::repositories::in_memory::{
        InMemoryDeliveryLogRepository, InMemoryEnrollmentRepository,
    };

    fn pending_row(contact_id: Uuid, sequence_id: Uuid) -> Enrollment {
        let now = Utc::now();
        Enrollment {
            id: Uuid::new_v4(),
            contact_id,
            sequence_id,
            team_id: Uuid::new_v4(),
            state: EnrollmentState::Pending,
            current_step: Some(2),
            scheduled_at: Some(now + chrono::Duration::hours(4)),
            sent_at: Some(now - chrono::Duration::hours(20)),
            replied_at: None,
            bounced_at: None,
            skipped_at: None,
            attempts: 1,
            last_throttled_at: None,
            manually_triggered_at: None,
            schedule_snapshot: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn scanner(dir: &Path) -> Arc<FileDropScanner> {
        let logs = Arc::new(InMemoryDeliveryLogRepository::new());
        let enrollments = Arc::new(InMemoryEnrollmentRepository::new(logs.clone()));
        let events = Arc::new(RecordSequenceEvents::new(enrollments, logs));
        FileDropScanner::new(dir.to_path_buf(), events)
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = scanner(&tmp.path().join("nope"));
        assert_eq!(scanner.ingest().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn valid_file_is_ingested_and_archived() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = scanner(tmp.path());

        let body = serde_json::json!({
            "events": [
                {"type": "reply", "messageId": "<a@b>", "occurredAt": Utc::now()},
                {"type": "bounce", "messageId": "<c@d>"}
            ]
        });
        let file = tmp.path().join("batch.json");
        std::fs::write(&file, body.to_string()).unwrap();

        assert_eq!(scanner.ingest().await.unwrap(), 2);
        assert!(!file.exists());
        assert!(tmp.path().join("processed").join("batch.json").exists());
    }

    #[tokio::test]
    async fn ndjson_lines_are_individual_events() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = scanner(tmp.path());

        let file = tmp.path().join("feed.ndjson");
        std::fs::write(
            &file,
            "{\"type\":\"reply\",\"messageId\":\"a@b\"}\n\n{\"type\":\"bounce\",\"messageId\":\"c@d\"}\n",
        )
        .unwrap();

        assert_eq!(scanner.ingest().await.unwrap(), 2);
        assert!(tmp.path().join("processed").join("feed.ndjson").exists());
    }

    #[tokio::test]
    async fn bad_timestamp_does_not_reject_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = scanner(tmp.path());

        let file = tmp.path().join("stamped.json");
        std::fs::write(
            &file,
            serde_json::json!({"type": "reply", "messageId": "a@b", "occurredAt": "yesterday-ish"})
                .to_string(),
        )
        .unwrap();

        assert_eq!(scanner.ingest().await.unwrap(), 1);
        assert!(tmp.path().join("processed").join("stamped.json").exists());
    }

    #[tokio::test]
    async fn malformed_file_moves_to_failed_with_note() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = scanner(tmp.path());

        let file = tmp.path().join("broken.json");
        std::fs::write(&file, "{not json").unwrap();

        assert_eq!(scanner.ingest().await.unwrap(), 0);
        assert!(tmp.path().join("failed").join("broken.json").exists());
        assert!(tmp.path().join("failed").join("broken.error.txt").exists());
    }

    #[tokio::test]
    async fn single_object_reconciles_against_sent_log() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = Arc::new(InMemoryDeliveryLogRepository::new());
        let enrollments = Arc::new(InMemoryEnrollmentRepository::new(logs.clone()));

        let contact_id = Uuid::new_v4();
        let sequence_id = Uuid::new_v4();
        let row = pending_row(contact_id, sequence_id);
        let row_id = row.id;
        enrollments.put(row).await;
        logs.append(NewDeliveryLogEntry {
            contact_id,
            sequence_id,
            step_order: Some(1),
            kind: DeliveryLogKind::Sent,
            status: "sent".into(),
            message_id: Some("x@y".into()),
            reason: None,
            payload: None,
        })
        .await
        .unwrap();

        let events = Arc::new(RecordSequenceEvents::new(enrollments.clone(), logs));
        let scanner = FileDropScanner::new(tmp.path().to_path_buf(), events);

        let file = tmp.path().join("one.json");
        std::fs::write(
            &file,
            serde_json::json!({"type": "reply", "messageId": "<X@Y>"}).to_string(),
        )
        .unwrap();

        assert_eq!(scanner.ingest().await.unwrap(), 1);
        let row = enrollments.get(row_id).await.unwrap().unwrap();
        assert_eq!(row.state, EnrollmentState::Replied);
    }
}
