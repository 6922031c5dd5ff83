use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ActionError, ActionKind, ActionPayload, FieldError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub subject: String,
    pub reply_to: Vec<String>,
    pub recipients: Vec<String>,
    pub text_body: Option<String>,
    pub html_body: String,
    /// Overrides the configured sender address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketPayload {
    pub subject: String,
    pub full_name: String,
    pub email_address: String,
    pub payload: Map<String, Value>,
    pub service_name: String,
    /// Credential set to use; the configured default when absent.
    #[serde(default)]
    pub subdomain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyEmailPayload {
    pub template_id: String,
    pub email_address: String,
    pub personalisation: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_reply_to_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyLetterPayload {
    pub template_id: String,
    pub personalisation: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub url: String,
    pub payload: Map<String, Value>,
}

/// Validate a submission's `data` and `meta` and project them into the
/// payload for `kind`. Pure: the same input always yields the same payload.
pub fn project(kind: ActionKind, data: &Value, meta: &Value) -> Result<ActionPayload, ActionError> {
    let mut fields = FieldReader::new(data, meta);

    match kind {
        ActionKind::Email => {
            let payload = EmailPayload {
                subject: fields.string(Source::Meta, "subject"),
                reply_to: fields.email_list(Source::Meta, "reply_to"),
                recipients: fields.email_list(Source::Meta, "recipients"),
                text_body: fields.optional_string(Source::Data, "text_body"),
                html_body: fields.string(Source::Data, "html_body"),
                from_email: fields.optional_email(Source::Meta, "from_email"),
            };
            fields.finish(ActionPayload::Email(payload))
        }
        ActionKind::HelpdeskTicket => {
            let mut payload = fields.object(Source::Data);
            if let Some(url) = fields.optional_string(Source::Meta, "ingress_url") {
                payload.insert("ingress_url".into(), Value::String(url));
            }
            if let Some(sort) = fields.optional_bool(Source::Meta, "sort_fields_alphabetically") {
                payload.insert("_sort_fields_alphabetically".into(), Value::Bool(sort));
            }
            let ticket = TicketPayload {
                subject: fields.string(Source::Meta, "subject"),
                full_name: fields.string(Source::Meta, "full_name"),
                email_address: fields.email(Source::Meta, "email_address"),
                payload,
                service_name: fields.string(Source::Meta, "service_name"),
                subdomain: fields.optional_string(Source::Meta, "subdomain"),
            };
            fields.finish(ActionPayload::HelpdeskTicket(ticket))
        }
        ActionKind::NotifyEmail => {
            let payload = notify_email(&mut fields);
            fields.finish(ActionPayload::NotifyEmail(payload))
        }
        ActionKind::NotifyBulkEmail => {
            let payload = notify_email(&mut fields);
            fields.finish(ActionPayload::NotifyBulkEmail(payload))
        }
        ActionKind::NotifyLetter => {
            let payload = NotifyLetterPayload {
                template_id: fields.string(Source::Meta, "template_id"),
                personalisation: fields.object(Source::Data),
            };
            fields.finish(ActionPayload::NotifyLetter(payload))
        }
        ActionKind::WebhookSubmit => {
            // Older clients still send `pardot_url`.
            let key = if fields.has(Source::Meta, "webhook_url") || !fields.has(Source::Meta, "pardot_url") {
                "webhook_url"
            } else {
                "pardot_url"
            };
            let payload = WebhookPayload {
                url: fields.url(Source::Meta, key),
                payload: fields.object(Source::Data),
            };
            fields.finish(ActionPayload::WebhookSubmit(payload))
        }
        ActionKind::SaveOnly => fields.finish(ActionPayload::SaveOnly),
    }
}

fn notify_email(fields: &mut FieldReader<'_>) -> NotifyEmailPayload {
    NotifyEmailPayload {
        template_id: fields.string(Source::Meta, "template_id"),
        email_address: fields.email(Source::Meta, "email_address"),
        personalisation: fields.object(Source::Data),
        email_reply_to_id: fields.optional_string(Source::Meta, "email_reply_to_id"),
    }
}

pub fn is_valid_email(value: &str) -> bool {
    value.parse::<lettre::Address>().is_ok()
}

fn is_valid_url(value: &str) -> bool {
    reqwest::Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

#[derive(Clone, Copy)]
enum Source {
    Data,
    Meta,
}

impl Source {
    fn name(self) -> &'static str {
        match self {
            Source::Data => "data",
            Source::Meta => "meta",
        }
    }
}

/// Reads typed fields out of `data`/`meta`, collecting every problem
/// instead of stopping at the first.
struct FieldReader<'a> {
    data: &'a Value,
    meta: &'a Value,
    errors: Vec<FieldError>,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a Value, meta: &'a Value) -> Self {
        Self {
            data,
            meta,
            errors: Vec::new(),
        }
    }

    fn get(&self, source: Source, key: &str) -> Option<&'a Value> {
        let doc = match source {
            Source::Data => self.data,
            Source::Meta => self.meta,
        };
        doc.get(key).filter(|v| !v.is_null())
    }

    fn has(&self, source: Source, key: &str) -> bool {
        self.get(source, key).is_some()
    }

    fn fail(&mut self, source: Source, key: &str, message: &str) {
        self.errors
            .push(FieldError::new(format!("{}.{key}", source.name()), message));
    }

    fn optional_string(&mut self, source: Source, key: &str) -> Option<String> {
        match self.get(source, key)? {
            Value::String(s) => Some(s.clone()),
            _ => {
                self.fail(source, key, "Not a valid string.");
                None
            }
        }
    }

    fn string(&mut self, source: Source, key: &str) -> String {
        if !self.has(source, key) {
            self.fail(source, key, "This field is required.");
            return String::new();
        }
        match self.optional_string(source, key) {
            Some(s) if s.trim().is_empty() => {
                self.fail(source, key, "This field may not be blank.");
                s
            }
            Some(s) => s,
            None => String::new(),
        }
    }

    fn optional_bool(&mut self, source: Source, key: &str) -> Option<bool> {
        match self.get(source, key)? {
            Value::Bool(b) => Some(*b),
            _ => {
                self.fail(source, key, "Must be a valid boolean.");
                None
            }
        }
    }

    fn email(&mut self, source: Source, key: &str) -> String {
        let value = self.string(source, key);
        if !value.is_empty() && !is_valid_email(&value) {
            self.fail(source, key, "Enter a valid email address.");
        }
        value
    }

    fn optional_email(&mut self, source: Source, key: &str) -> Option<String> {
        let value = self.optional_string(source, key)?;
        if !is_valid_email(&value) {
            self.fail(source, key, "Enter a valid email address.");
        }
        Some(value)
    }

    fn email_list(&mut self, source: Source, key: &str) -> Vec<String> {
        let Some(value) = self.get(source, key) else {
            self.fail(source, key, "This field is required.");
            return Vec::new();
        };
        let Some(items) = value.as_array() else {
            self.fail(source, key, "Expected a list of items.");
            return Vec::new();
        };

        let mut addresses = Vec::with_capacity(items.len());
        for item in items {
            match item.as_str() {
                Some(address) if is_valid_email(address) => addresses.push(address.to_string()),
                _ => {
                    self.fail(source, key, "Enter a valid email address.");
                    break;
                }
            }
        }
        addresses
    }

    fn url(&mut self, source: Source, key: &str) -> String {
        let value = self.string(source, key);
        if !value.is_empty() && !is_valid_url(&value) {
            self.fail(source, key, "Enter a valid URL.");
        }
        value
    }

    /// The whole document as a dict.
    fn object(&mut self, source: Source) -> Map<String, Value> {
        let doc = match source {
            Source::Data => self.data,
            Source::Meta => self.meta,
        };
        match doc.as_object() {
            Some(map) => map.clone(),
            None => {
                self.errors
                    .push(FieldError::new(source.name(), "Expected a dictionary of items."));
                Map::new()
            }
        }
    }

    fn finish(self, payload: ActionPayload) -> Result<ActionPayload, ActionError> {
        if self.errors.is_empty() {
            Ok(payload)
        } else {
            Err(ActionError::Validation(self.errors))
        }
    }
}
