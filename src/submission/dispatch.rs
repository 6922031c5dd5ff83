use uuid::Uuid;

use crate::actions::{ActionError, ActionKind, ActionPayload, payload};
use crate::db;
use crate::models::Submission;
use crate::state::SharedState;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A delivery task was queued.
    Enqueued(Uuid),
    /// Nothing to deliver; the submission was marked sent right away.
    Saved,
    /// The sender is disabled. Nothing is queued and the submission stays unsent.
    Suppressed,
    AlreadySent,
    /// A queued task for this submission is still pending.
    InFlight,
    /// The submission cannot be delivered. Already logged.
    Failed(ActionError),
}

/// Build the payload for a stored submission. Pure, so running it again
/// on an unsent submission gives the same payload.
pub fn prepare(submission: &Submission) -> Result<ActionPayload, ActionError> {
    let name = submission
        .action_name()
        .ok_or_else(|| ActionError::Unsupported("Submission has no action_name".into()))?;
    let kind = ActionKind::parse(name)?;
    payload::project(kind, &submission.data, &submission.meta)
}

/// False when the submission has a sender and that sender is disabled.
pub async fn sender_allows(state: &SharedState, submission: &Submission) -> Result<bool, sqlx::Error> {
    let Some(sender_id) = submission.sender_id else {
        return Ok(true);
    };
    let sender = db::senders::find_by_id(&state.pool, sender_id).await?;
    Ok(sender.is_none_or(|s| s.is_enabled()))
}

/// Route a persisted submission to its action. Failures after persistence
/// are captured in the log and never surface to the submitter.
pub async fn dispatch(state: &SharedState, submission: &Submission) -> Result<DispatchOutcome, sqlx::Error> {
    if submission.is_sent {
        return Ok(DispatchOutcome::AlreadySent);
    }

    if !sender_allows(state, submission).await? {
        tracing::info!(submission_id = %submission.id, "Sender disabled, dispatch suppressed");
        return Ok(DispatchOutcome::Suppressed);
    }

    let payload = match prepare(submission) {
        Ok(payload) => payload,
        Err(e) => return Ok(fail(submission, e)),
    };

    if payload == ActionPayload::SaveOnly {
        db::submissions::mark_sent(&state.pool, submission.id).await?;
        return Ok(DispatchOutcome::Saved);
    }

    let stored = match serde_json::to_value(&payload) {
        Ok(stored) => stored,
        Err(e) => {
            return Ok(fail(
                submission,
                ActionError::Permanent(format!("Payload not storable: {e}")),
            ));
        }
    };

    let task = db::delivery_tasks::enqueue(
        &state.pool,
        submission.id,
        payload.kind().as_str(),
        &stored,
        state.config.task_max_attempts,
    )
    .await?;

    tracing::debug!(
        submission_id = %submission.id,
        task_id = %task.id,
        action = payload.kind().as_str(),
        "Delivery task queued"
    );
    Ok(DispatchOutcome::Enqueued(task.id))
}

/// Re-run dispatch for an unsent submission, unless the queue is still
/// working on it.
pub async fn redispatch(state: &SharedState, submission: &Submission) -> Result<DispatchOutcome, sqlx::Error> {
    if submission.is_sent {
        return Ok(DispatchOutcome::AlreadySent);
    }
    if db::delivery_tasks::has_live_task(&state.pool, submission.id).await? {
        return Ok(DispatchOutcome::InFlight);
    }
    dispatch(state, submission).await
}

fn fail(submission: &Submission, error: ActionError) -> DispatchOutcome {
    tracing::error!(
        submission_id = %submission.id,
        action = submission.action_name().unwrap_or_default(),
        error = %error,
        "Dispatch failed"
    );
    DispatchOutcome::Failed(error)
}
