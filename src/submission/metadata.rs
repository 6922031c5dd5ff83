use serde_json::Value;

use crate::actions::ActionKind;

/// Email address of the party a submission comes from, used for sender
/// reputation. An explicit `meta.sender.email_address` always wins; after
/// that it depends on the action.
pub fn sender_email(kind: Option<ActionKind>, meta: &Value) -> Option<String> {
    let explicit = meta
        .get("sender")
        .and_then(|s| s.get("email_address"))
        .and_then(Value::as_str);

    let derived = || match kind? {
        ActionKind::Email => meta
            .get("reply_to")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
            .and_then(Value::as_str),
        ActionKind::HelpdeskTicket | ActionKind::NotifyEmail | ActionKind::NotifyBulkEmail => {
            meta.get("email_address").and_then(Value::as_str)
        }
        ActionKind::NotifyLetter | ActionKind::WebhookSubmit | ActionKind::SaveOnly => None,
    };

    explicit
        .or_else(derived)
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty())
}

pub fn form_url(meta: &Value) -> Option<&str> {
    meta.get("form_url").and_then(Value::as_str)
}
