use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::actions::{ActionKind, FieldError, payload};
use crate::db;
use crate::db::submissions::NewSubmission;
use crate::error::AppError;
use crate::models::Submission;
use crate::state::SharedState;

use super::dispatch;
use super::metadata;

/// A checked bulk notify-email request.
#[derive(Debug, Clone)]
pub struct BulkEnvelope {
    pub template_id: String,
    pub email_reply_to_id: Option<String>,
    pub entries: Vec<Map<String, Value>>,
}

impl BulkEnvelope {
    /// Validate the whole envelope at once. One bad entry rejects them all.
    pub fn parse(body: &Value) -> Result<Self, Vec<FieldError>> {
        let mut errors = Vec::new();

        let template_id = match body.get("template_id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(Value::String(_)) => {
                errors.push(FieldError::new("template_id", "This field may not be blank."));
                String::new()
            }
            Some(_) => {
                errors.push(FieldError::new("template_id", "Not a valid string."));
                String::new()
            }
            None => {
                errors.push(FieldError::new("template_id", "This field is required."));
                String::new()
            }
        };

        let email_reply_to_id = match body.get("email_reply_to_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(_) => {
                errors.push(FieldError::new("email_reply_to_id", "Not a valid string."));
                None
            }
        };

        let mut entries = Vec::new();
        match body.get("bulk_email_entries") {
            None => errors.push(FieldError::new("bulk_email_entries", "This field is required.")),
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let field = format!("bulk_email_entries[{i}].email_address");
                    let Some(entry) = item.as_object() else {
                        errors.push(FieldError::new(
                            format!("bulk_email_entries[{i}]"),
                            "Expected a dictionary of items.",
                        ));
                        continue;
                    };
                    match entry.get("email_address").and_then(Value::as_str) {
                        Some(email) if payload::is_valid_email(email) => entries.push(entry.clone()),
                        Some(_) => errors.push(FieldError::new(field, "Enter a valid email address.")),
                        None => errors.push(FieldError::new(field, "This field is required.")),
                    }
                }
            }
            Some(_) => errors.push(FieldError::new("bulk_email_entries", "Expected a list of items.")),
        }

        if errors.is_empty() {
            Ok(Self {
                template_id,
                email_reply_to_id,
                entries,
            })
        } else {
            Err(errors)
        }
    }

    /// Routing metadata for one entry.
    pub fn entry_meta(&self, entry: &Map<String, Value>) -> Value {
        let mut meta = json!({
            "action_name": ActionKind::NotifyBulkEmail.as_str(),
            "template_id": self.template_id,
            "email_address": entry.get("email_address").cloned().unwrap_or(Value::Null),
        });
        if let Some(reply_to) = &self.email_reply_to_id {
            meta["email_reply_to_id"] = json!(reply_to);
        }
        meta
    }
}

/// Create one submission per entry in a single transaction, then dispatch
/// each of them independently.
pub async fn run(
    state: &SharedState,
    client_id: Option<Uuid>,
    envelope: &BulkEnvelope,
) -> Result<Vec<Submission>, AppError> {
    let mut tx = state.pool.begin().await?;
    let mut created = Vec::with_capacity(envelope.entries.len());

    for entry in &envelope.entries {
        let data = Value::Object(entry.clone());
        let meta = envelope.entry_meta(entry);

        let sender = match metadata::sender_email(Some(ActionKind::NotifyBulkEmail), &meta) {
            Some(email) => Some(db::senders::get_or_create(&mut *tx, &email).await?),
            None => None,
        };
        let submission = db::submissions::create(
            &mut *tx,
            &NewSubmission {
                data: &data,
                meta: &meta,
                form_url: None,
                client_id,
                sender_id: sender.map(|s| s.id),
            },
        )
        .await?;
        created.push(submission);
    }

    tx.commit().await?;
    tracing::info!(count = created.len(), template_id = %envelope.template_id, "Bulk submissions created");

    // The sweep picks up anything that fails to queue here.
    for submission in &created {
        if let Err(e) = dispatch::dispatch(state, submission).await {
            tracing::error!(submission_id = %submission.id, error = %e, "Dispatch failed");
        }
    }

    Ok(created)
}
