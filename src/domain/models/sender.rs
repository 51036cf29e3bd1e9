use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderStatus {
    Active,
    Disabled,
}

impl SenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderStatus::Active => "active",
            SenderStatus::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SenderStatus::Active),
            "disabled" => Some(SenderStatus::Disabled),
            _ => None,
        }
    }
}

/// A sending identity as stored: the SMTP password is kept encrypted and is
/// only decrypted into a [`SenderSnapshot`] for the duration of one dispatch.
#[derive(Debug, Clone)]
pub struct SenderProfile {
    pub id: Uuid,
    pub team_id: Uuid,
    pub from_name: String,
    pub from_address: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    /// nonce:ciphertext, both base64.
    pub smtp_password_encrypted: String,
    pub status: SenderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decrypted sender material passed by value into a dispatch call and
/// dropped immediately after it. Never cached.
#[derive(Debug, Clone)]
pub struct SenderSnapshot {
    pub sender_id: Uuid,
    pub from_name: String,
    pub from_address: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub status: SenderStatus,
}

impl SenderSnapshot {
    /// Breaker key scoping circuit state to one destination host, so one
    /// failing provider does not open the circuit for unrelated senders.
    pub fn breaker_key(&self) -> String {
        format!("smtp:{}", self.smtp_host)
    }
}
