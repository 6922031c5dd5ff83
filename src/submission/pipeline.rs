use serde_json::Value;
use uuid::Uuid;

use crate::actions::{ActionKind, payload};
use crate::db;
use crate::db::submissions::NewSubmission;
use crate::error::AppError;
use crate::models::{BlacklistReason, Submission};
use crate::state::SharedState;

use super::dispatch::{self, DispatchOutcome};
use super::metadata;

/// Persist one submission, apply the rate limit and hand it to dispatch.
///
/// Payload validation for known actions happens before anything is stored,
/// so a 400 leaves no trace. Unknown actions are stored and fail in dispatch.
pub async fn run(
    state: &SharedState,
    client_id: Option<Uuid>,
    data: Value,
    meta: Value,
) -> Result<Submission, AppError> {
    let kind = meta
        .get("action_name")
        .and_then(Value::as_str)
        .and_then(|name| ActionKind::parse(name).ok());

    if let Some(kind) = kind {
        payload::project(kind, &data, &meta)?;
    }

    let sender_email = metadata::sender_email(kind, &meta);

    let mut tx = state.pool.begin().await?;
    let sender = match &sender_email {
        Some(email) => Some(db::senders::get_or_create(&mut *tx, email).await?),
        None => None,
    };
    let submission = db::submissions::create(
        &mut *tx,
        &NewSubmission {
            data: &data,
            meta: &meta,
            form_url: metadata::form_url(&meta),
            client_id,
            sender_id: sender.as_ref().map(|s| s.id),
        },
    )
    .await?;
    tx.commit().await?;

    if state
        .submission_limiter
        .is_limited(&state.pool, submission.ip_address())
        .await?
    {
        if let Some(sender) = &sender {
            db::senders::blacklist(&state.pool, sender.id, BlacklistReason::RateLimit).await?;
        }
        tracing::warn!(
            submission_id = %submission.id,
            ip = ?submission.ip_address(),
            sender = sender_email.as_deref().unwrap_or("-"),
            "Submission rate limit exceeded, sender blacklisted"
        );
        return Err(AppError::RateLimited(
            "Too many submissions from this address".to_string(),
        ));
    }

    match dispatch::dispatch(state, &submission).await {
        Ok(DispatchOutcome::Enqueued(_) | DispatchOutcome::Saved) => {}
        Ok(outcome) => {
            tracing::debug!(submission_id = %submission.id, ?outcome, "Submission not queued");
        }
        Err(e) => {
            tracing::error!(submission_id = %submission.id, error = %e, "Dispatch failed");
        }
    }

    Ok(submission)
}
