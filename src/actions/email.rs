use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::payload::EmailPayload;
use super::{ActionError, DeliveryBackend, DeliveryReceipt};
use crate::config::SmtpConfig;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig, timeout: Duration) -> Result<Self, String> {
        let from = config
            .from
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_SMTP_FROM: {e}"))?;

        Ok(Self {
            transport: build_smtp_transport(config, timeout)?,
            from,
        })
    }

    /// Plain html when there is no text body, otherwise a
    /// multipart/alternative with both.
    pub fn build_message(&self, payload: &EmailPayload) -> Result<Message, ActionError> {
        let from = match &payload.from_email {
            Some(address) => address
                .parse()
                .map_err(|e| ActionError::Permanent(format!("Invalid from address: {e}")))?,
            None => self.from.clone(),
        };

        let mut builder = Message::builder().from(from).subject(&payload.subject);
        for recipient in &payload.recipients {
            builder = builder.to(recipient
                .parse()
                .map_err(|e| ActionError::Permanent(format!("Invalid recipient {recipient}: {e}")))?);
        }
        for reply_to in &payload.reply_to {
            builder = builder.reply_to(reply_to
                .parse()
                .map_err(|e| ActionError::Permanent(format!("Invalid reply-to {reply_to}: {e}")))?);
        }

        let message = match &payload.text_body {
            Some(text) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                payload.html_body.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(payload.html_body.clone()),
        };

        message.map_err(|e| ActionError::Permanent(format!("Failed to build email: {e}")))
    }
}

#[async_trait]
impl DeliveryBackend<EmailPayload> for SmtpMailer {
    async fn send(&self, payload: &EmailPayload) -> Result<DeliveryReceipt, ActionError> {
        let message = self.build_message(payload)?;

        let response = self.transport.send(message).await.map_err(|e| {
            if e.is_permanent() {
                ActionError::Permanent(format!("SMTP server refused email: {e}"))
            } else {
                ActionError::Transient(format!("Failed to send email: {e}"))
            }
        })?;

        Ok(DeliveryReceipt::new(response.code().to_string()))
    }
}

pub fn build_smtp_transport(
    config: &SmtpConfig,
    timeout: Duration,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, String> {
    let creds = Credentials::new(config.user.clone(), config.pass.clone());

    let transport = match config.tls_mode.as_str() {
        "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| format!("SMTP relay error: {e}"))?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(timeout))
            .build(),
        "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .credentials(creds)
            .timeout(Some(timeout))
            .build(),
        _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| format!("SMTP starttls error: {e}"))?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(timeout))
            .build(),
    };

    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer() -> SmtpMailer {
        let config = SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            user: "user".into(),
            pass: "pass".into(),
            from: "noreply@example.com".into(),
            tls_mode: "none".into(),
        };
        SmtpMailer::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn payload() -> EmailPayload {
        EmailPayload {
            subject: "this thing".into(),
            reply_to: vec!["reply@example.com".into()],
            recipients: vec!["to@example.com".into(), "other@example.com".into()],
            text_body: Some("Hello".into()),
            html_body: "<p>Hello</p>".into(),
            from_email: None,
        }
    }

    #[test]
    fn builds_alternative_message_with_reply_to() {
        let message = mailer().build_message(&payload()).unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();

        assert!(raw.contains("From: noreply@example.com"));
        assert!(raw.contains("Reply-To: reply@example.com"));
        assert!(raw.contains("to@example.com"));
        assert!(raw.contains("other@example.com"));
        assert!(raw.contains("Subject: this thing"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn html_only_when_text_body_missing() {
        let mut payload = payload();
        payload.text_body = None;

        let raw = String::from_utf8_lossy(&mailer().build_message(&payload).unwrap().formatted()).to_string();
        assert!(raw.contains("text/html"));
        assert!(!raw.contains("multipart/alternative"));
    }

    #[test]
    fn from_email_overrides_configured_sender() {
        let mut payload = payload();
        payload.from_email = Some("forms@example.org".into());

        let raw = String::from_utf8_lossy(&mailer().build_message(&payload).unwrap().formatted()).to_string();
        assert!(raw.contains("From: forms@example.org"));
    }

    #[test]
    fn message_without_recipients_is_rejected_permanently() {
        let mut payload = payload();
        payload.recipients.clear();

        let err = mailer().build_message(&payload).unwrap_err();
        assert!(!err.is_retryable());
    }
}
