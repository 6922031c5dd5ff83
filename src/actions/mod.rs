pub mod email;
pub mod helpdesk;
pub mod notify;
pub mod payload;
pub mod webhook;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use payload::{EmailPayload, NotifyEmailPayload, NotifyLetterPayload, TicketPayload, WebhookPayload};

/// Every downstream action a submission can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Email,
    HelpdeskTicket,
    NotifyEmail,
    NotifyLetter,
    WebhookSubmit,
    SaveOnly,
    NotifyBulkEmail,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Email,
        ActionKind::HelpdeskTicket,
        ActionKind::NotifyEmail,
        ActionKind::NotifyLetter,
        ActionKind::WebhookSubmit,
        ActionKind::SaveOnly,
        ActionKind::NotifyBulkEmail,
    ];

    /// Every `action_name` that selects this kind, current name first. The
    /// rest are legacy names older clients still send.
    pub fn names(&self) -> &'static [&'static str] {
        match self {
            ActionKind::Email => &["email"],
            ActionKind::HelpdeskTicket => &["helpdesk-ticket", "zendesk"],
            ActionKind::NotifyEmail => &["notify-email", "gov-notify", "gov-notify-email"],
            ActionKind::NotifyLetter => &["notify-letter", "gov-notify-letter"],
            ActionKind::WebhookSubmit => &["webhook-submit", "pardot"],
            ActionKind::SaveOnly => &["save-only", "save-only-in-db"],
            ActionKind::NotifyBulkEmail => &["notify-bulk-email", "gov-notify-bulk-email"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.names()[0]
    }

    pub fn parse(name: &str) -> Result<Self, ActionError> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.names().contains(&name))
            .ok_or_else(|| ActionError::Unsupported(format!("Unknown action: {name}")))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn summarize(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of a dispatch or delivery, classified by whether it is worth
/// trying again.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("invalid submission: {}", summarize(.0))]
    Validation(Vec<FieldError>),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("rejected: {0}")]
    Permanent(String),
    #[error("unavailable: {0}")]
    Transient(String),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Transient(_))
    }

    pub(crate) fn from_request(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ActionError::Permanent(format!("Invalid request: {err}"))
        } else {
            ActionError::Transient(format!("Request failed: {err}"))
        }
    }

    /// 429 and 5xx are worth retrying, everything else the provider said no to.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body: String = body.chars().take(512).collect();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ActionError::Transient(format!("Provider returned {status}: {body}"))
        } else {
            ActionError::Permanent(format!("Provider returned {status}: {body}"))
        }
    }
}

/// A validated, action-specific payload. This is what travels through the
/// task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum ActionPayload {
    Email(EmailPayload),
    HelpdeskTicket(TicketPayload),
    NotifyEmail(NotifyEmailPayload),
    NotifyLetter(NotifyLetterPayload),
    WebhookSubmit(WebhookPayload),
    SaveOnly,
    NotifyBulkEmail(NotifyEmailPayload),
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::Email(_) => ActionKind::Email,
            ActionPayload::HelpdeskTicket(_) => ActionKind::HelpdeskTicket,
            ActionPayload::NotifyEmail(_) => ActionKind::NotifyEmail,
            ActionPayload::NotifyLetter(_) => ActionKind::NotifyLetter,
            ActionPayload::WebhookSubmit(_) => ActionKind::WebhookSubmit,
            ActionPayload::SaveOnly => ActionKind::SaveOnly,
            ActionPayload::NotifyBulkEmail(_) => ActionKind::NotifyBulkEmail,
        }
    }
}

/// Proof of a successful delivery, e.g. the provider's message or ticket id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub reference: Option<String>,
}

impl DeliveryReceipt {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
        }
    }
}

/// One external delivery capability.
#[async_trait]
pub trait DeliveryBackend<P>: Send + Sync
where
    P: Send + Sync,
{
    async fn send(&self, payload: &P) -> Result<DeliveryReceipt, ActionError>;
}

/// Stand-in for a backend whose credentials were not configured.
pub struct Unconfigured {
    what: &'static str,
}

impl Unconfigured {
    pub fn new(what: &'static str) -> Self {
        Self { what }
    }
}

#[async_trait]
impl<P> DeliveryBackend<P> for Unconfigured
where
    P: Send + Sync,
{
    async fn send(&self, _payload: &P) -> Result<DeliveryReceipt, ActionError> {
        Err(ActionError::Unsupported(format!(
            "{} is not configured",
            self.what
        )))
    }
}

/// Maps each action kind to its delivery backend. Payload building is the
/// other half of the table, see [`payload::project`].
#[derive(Clone)]
pub struct ActionTable {
    email: Arc<dyn DeliveryBackend<EmailPayload>>,
    helpdesk: Arc<dyn DeliveryBackend<TicketPayload>>,
    notify_email: Arc<dyn DeliveryBackend<NotifyEmailPayload>>,
    notify_letter: Arc<dyn DeliveryBackend<NotifyLetterPayload>>,
    webhook: Arc<dyn DeliveryBackend<WebhookPayload>>,
}

impl ActionTable {
    pub fn new(
        email: Arc<dyn DeliveryBackend<EmailPayload>>,
        helpdesk: Arc<dyn DeliveryBackend<TicketPayload>>,
        notify_email: Arc<dyn DeliveryBackend<NotifyEmailPayload>>,
        notify_letter: Arc<dyn DeliveryBackend<NotifyLetterPayload>>,
        webhook: Arc<dyn DeliveryBackend<WebhookPayload>>,
    ) -> Self {
        Self {
            email,
            helpdesk,
            notify_email,
            notify_letter,
            webhook,
        }
    }

    /// Build the production backends from configuration.
    pub fn from_config(config: &Config) -> Result<Self, String> {
        let timeout = config.delivery_timeout;

        let email: Arc<dyn DeliveryBackend<EmailPayload>> = match &config.smtp {
            Some(smtp) => {
                tracing::info!("SMTP delivery configured ({})", smtp.host);
                Arc::new(email::SmtpMailer::new(smtp, timeout)?)
            }
            None => {
                tracing::warn!("SMTP not configured, email actions will fail");
                Arc::new(Unconfigured::new("SMTP"))
            }
        };

        let helpdesk: Arc<dyn DeliveryBackend<TicketPayload>> =
            if config.helpdesk.credentials.is_empty() {
                tracing::warn!("No helpdesk credentials configured, ticket actions will fail");
                Arc::new(Unconfigured::new("Helpdesk"))
            } else {
                Arc::new(helpdesk::HelpdeskClient::new(config.helpdesk.clone(), timeout)?)
            };

        let (notify_email, notify_letter): (
            Arc<dyn DeliveryBackend<NotifyEmailPayload>>,
            Arc<dyn DeliveryBackend<NotifyLetterPayload>>,
        ) = match &config.notify {
            Some(notify) => (
                Arc::new(notify::NotifyClient::new(&notify.base_url, &notify.api_key, timeout)?),
                Arc::new(notify::NotifyClient::new(
                    &notify.base_url,
                    &notify.letter_api_key,
                    timeout,
                )?),
            ),
            None => {
                tracing::warn!("Notification service not configured, notify actions will fail");
                (
                    Arc::new(Unconfigured::new("Notification service")),
                    Arc::new(Unconfigured::new("Notification service")),
                )
            }
        };

        let webhook = Arc::new(webhook::WebhookPoster::new(timeout)?);

        Ok(Self::new(email, helpdesk, notify_email, notify_letter, webhook))
    }

    pub async fn deliver(&self, payload: &ActionPayload) -> Result<DeliveryReceipt, ActionError> {
        match payload {
            ActionPayload::Email(p) => self.email.send(p).await,
            ActionPayload::HelpdeskTicket(p) => self.helpdesk.send(p).await,
            ActionPayload::NotifyEmail(p) => self.notify_email.send(p).await,
            ActionPayload::NotifyLetter(p) => self.notify_letter.send(p).await,
            ActionPayload::WebhookSubmit(p) => self.webhook.send(p).await,
            ActionPayload::SaveOnly => Ok(DeliveryReceipt::default()),
            ActionPayload::NotifyBulkEmail(p) => self.notify_email.send(p).await,
        }
    }
}
