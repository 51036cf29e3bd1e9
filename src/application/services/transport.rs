use async_trait::async_trait;
use thiserror::Error;

use crate::application::services::resilience::Recoverable;
use crate::domain::models::SenderSnapshot;

#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
    pub response: String,
    pub message_id: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("recipient rejected: {0}")]
    RecipientRejected(String),
    #[error("transport failure: {0}")]
    Other(String),
}

impl Recoverable for TransportError {
    /// Auth and recipient rejections are definitive provider answers; only
    /// generic transport failures are worth retrying.
    fn is_transient(&self) -> bool {
        matches!(self, TransportError::Other(_))
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        sender: &SenderSnapshot,
        mail: &OutboundMail,
    ) -> Result<DispatchReceipt, TransportError>;
}
