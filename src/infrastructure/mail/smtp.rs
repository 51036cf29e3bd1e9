use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::debug;
use uuid::Uuid;

use crate::application::services::transport::{
    DispatchReceipt, MailTransport, OutboundMail, TransportError,
};
use crate::domain::models::SenderSnapshot;

/// Sends through the sender's own SMTP relay. A fresh transport is built per
/// dispatch because every sender carries its own host and credentials; the
/// credentials live only on the stack of the blocking send.
pub struct SmtpMailTransport {
    timeout: Duration,
}

impl SmtpMailTransport {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self { timeout })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(
        &self,
        sender: &SenderSnapshot,
        mail: &OutboundMail,
    ) -> Result<DispatchReceipt, TransportError> {
        let sender = sender.clone();
        let mail = mail.clone();
        let timeout = self.timeout;

        // lettre's rustls SmtpTransport is synchronous; keep it off the
        // async worker threads.
        let receipt = tokio::task::spawn_blocking(move || send_blocking(&sender, &mail, timeout))
            .await
            .map_err(|err| TransportError::Other(format!("send task aborted: {err}")))??;

        debug!(message_id = %receipt.message_id, "smtp dispatch accepted");
        Ok(receipt)
    }
}

fn send_blocking(
    sender: &SenderSnapshot,
    mail: &OutboundMail,
    timeout: Duration,
) -> Result<DispatchReceipt, TransportError> {
    let from: Mailbox = format!("{} <{}>", sender.from_name, sender.from_address)
        .parse()
        .map_err(|err| TransportError::Other(format!("invalid from address: {err}")))?;
    let to: Mailbox = mail
        .to
        .parse()
        .map_err(|err| TransportError::RecipientRejected(format!("invalid address: {err}")))?;

    let message_id = format!("<{}@{}>", Uuid::new_v4(), sender.smtp_host);
    let email = Message::builder()
        .from(from)
        .to(to)
        .subject(&mail.subject)
        .message_id(Some(message_id.clone()))
        .multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(mail.text.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(mail.html.clone()),
                ),
        )
        .map_err(|err| TransportError::Other(format!("failed to build message: {err}")))?;

    let creds = Credentials::new(sender.smtp_username.clone(), sender.smtp_password.clone());
    let mailer = SmtpTransport::relay(&sender.smtp_host)
        .map_err(|err| TransportError::Other(format!("failed to create transport: {err}")))?
        .port(sender.smtp_port)
        .credentials(creds)
        .timeout(Some(timeout))
        .build();

    let response = mailer.send(&email).map_err(classify_smtp_error)?;

    Ok(DispatchReceipt {
        accepted: vec![mail.to.clone()],
        rejected: Vec::new(),
        response: response
            .message()
            .collect::<Vec<&str>>()
            .join(" "),
        message_id,
    })
}

/// 5xx answers are definitive; everything else (timeouts, 4xx, connection
/// resets) stays retryable.
fn classify_smtp_error(err: lettre::transport::smtp::Error) -> TransportError {
    let text = err.to_string();
    if err.is_permanent() {
        let lower = text.to_ascii_lowercase();
        if lower.contains("auth") || lower.contains("credential") {
            return TransportError::Auth(text);
        }
        return TransportError::RecipientRejected(text);
    }
    TransportError::Other(text)
}
