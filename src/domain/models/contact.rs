use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Contact {
    pub id: Uuid,
    pub team_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    /// Free-form fields referenced by templates as {{custom.<key>}}.
    pub custom_fields: HashMap<String, String>,
    /// IANA zone id, as imported; may be invalid or absent.
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
