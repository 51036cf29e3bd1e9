use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::events::{InboundEvent, InboundEventKind};

/// The events endpoint accepts either one event object or a batch under an
/// `events` key. poem-openapi cannot express that union, so the body comes
/// in as raw JSON and is validated here with per-field messages.
pub fn parse_events_body(body: &Value, received_at: DateTime<Utc>) -> Result<Vec<InboundEvent>, String> {
    let items: Vec<(&Value, String)> = match body {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (item, format!("events[{i}]")))
            .collect(),
        Value::Object(map) => match map.get("events") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (item, format!("events[{i}]")))
                .collect(),
            Some(other) => {
                return Err(format!("events: expected an array, got {}", type_name(other)));
            }
            None => vec![(body, "event".to_string())],
        },
        other => {
            return Err(format!(
                "body: expected an event object or array, got {}",
                type_name(other)
            ));
        }
    };

    if items.is_empty() {
        return Err("events: array cannot be empty".to_string());
    }
    if items.len() > 500 {
        return Err("events: array cannot exceed 500 items".to_string());
    }

    items
        .into_iter()
        .map(|(item, at)| parse_event(item, &at, received_at))
        .collect()
}

fn parse_event(item: &Value, at: &str, received_at: DateTime<Utc>) -> Result<InboundEvent, String> {
    let Value::Object(map) = item else {
        return Err(format!("{at}: expected an object, got {}", type_name(item)));
    };

    let kind = match require_str(map, at, "type")? {
        "reply" => InboundEventKind::Reply,
        "bounce" => InboundEventKind::Bounce,
        other => return Err(format!("{at}.type: expected reply or bounce, got {other:?}")),
    };

    let message_id = require_str(map, at, "messageId")?.to_string();

    let contact_id = optional_uuid(map, at, "contactId")?;
    let sequence_id = optional_uuid(map, at, "sequenceId")?;

    // Absent or unparseable timestamps fall back to receipt time.
    let occurred_at = map
        .get("occurredAt")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
        .unwrap_or(received_at);

    Ok(InboundEvent {
        kind,
        message_id,
        contact_id,
        sequence_id,
        occurred_at,
        payload: map.get("payload").filter(|p| !p.is_null()).cloned(),
    })
}

fn require_str<'a>(
    map: &'a serde_json::Map<String, Value>,
    at: &str,
    key: &str,
) -> Result<&'a str, String> {
    match map.get(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value),
        Some(Value::String(_)) => Err(format!("{at}.{key}: cannot be empty")),
        Some(other) => Err(format!("{at}.{key}: expected a string, got {}", type_name(other))),
        None => Err(format!("{at}.{key}: missing required field")),
    }
}

fn optional_uuid(
    map: &serde_json::Map<String, Value>,
    at: &str,
    key: &str,
) -> Result<Option<Uuid>, String> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => raw
            .parse::<Uuid>()
            .map(Some)
            .map_err(|_| format!("{at}.{key}: not a valid uuid: {raw:?}")),
        Some(other) => Err(format!("{at}.{key}: expected a string, got {}", type_name(other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_single_object_and_batch() {
        let now = Utc::now();
        let single = json!({"type": "reply", "messageId": "<a@b>"});
        let events = parse_events_body(&single, now).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].occurred_at, now);

        let batch = json!({"events": [
            {"type": "reply", "messageId": "a@b"},
            {"type": "bounce", "messageId": "c@d", "payload": {"reason": "550"}}
        ]});
        let events = parse_events_body(&batch, now).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, InboundEventKind::Bounce);
    }

    #[test]
    fn errors_name_the_offending_field() {
        let now = Utc::now();
        let body = json!({"events": [
            {"type": "reply", "messageId": "a@b"},
            {"type": "opened", "messageId": "c@d"}
        ]});
        let err = parse_events_body(&body, now).unwrap_err();
        assert!(err.starts_with("events[1].type"), "{err}");

        let body = json!({"type": "reply"});
        let err = parse_events_body(&body, now).unwrap_err();
        assert!(err.contains("messageId"), "{err}");

        let body = json!({"type": "reply", "messageId": "a@b", "contactId": "nope"});
        let err = parse_events_body(&body, now).unwrap_err();
        assert!(err.contains("contactId"), "{err}");
    }

    #[test]
    fn invalid_occurred_at_defaults_to_receipt_time() {
        use chrono::TimeZone;

        let now = Utc::now();
        let body = json!({"events": [
            {"type": "reply", "messageId": "a@b", "occurredAt": "not-a-date"},
            {"type": "bounce", "messageId": "c@d", "occurredAt": 42}
        ]});
        let events = parse_events_body(&body, now).unwrap();
        assert_eq!(events[0].occurred_at, now);
        assert_eq!(events[1].occurred_at, now);

        let body = json!({
            "type": "reply",
            "messageId": "a@b",
            "occurredAt": "2025-06-02T10:30:00Z"
        });
        let events = parse_events_body(&body, now).unwrap();
        assert_eq!(
            events[0].occurred_at,
            Utc.with_ymd_and_hms(2025, 6, 2, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn rejects_empty_batch_and_non_objects() {
        let now = Utc::now();
        assert!(parse_events_body(&json!({"events": []}), now).is_err());
        assert!(parse_events_body(&json!("reply"), now).is_err());
        assert!(parse_events_body(&json!([42]), now).is_err());
    }
}
