use std::time::Duration;

use tokio::sync::watch;

use crate::actions::{ActionError, ActionPayload, DeliveryReceipt};
use crate::db;
use crate::models::DeliveryTask;
use crate::state::SharedState;

/// Extra time a claimed task stays locked beyond the delivery deadline.
const LOCK_GRACE: Duration = Duration::from_secs(60);

/// Start a worker pool on a dedicated Tokio runtime with its own thread pool.
/// This runs on a separate OS thread and blocks until shutdown is signaled.
pub fn run_pool(
    state: SharedState,
    shutdown: watch::Receiver<bool>,
    worker_count: usize,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("worker-pool".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(worker_count)
                .thread_name("delivery-worker")
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!("Failed to build worker runtime: {e}");
                    return;
                }
            };

            runtime.block_on(async {
                let mut handles = Vec::with_capacity(worker_count);

                for id in 0..worker_count {
                    handles.push(tokio::spawn(run(id, state.clone(), shutdown.clone())));
                }

                tracing::info!("Delivery worker pool started ({worker_count} workers)");

                for handle in handles {
                    let _ = handle.await;
                }

                tracing::info!("Delivery worker pool stopped");
            });
        })
}

/// A single worker loop that polls the queue and processes tasks.
async fn run(id: usize, state: SharedState, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!("Worker {id} started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match process_next(&state).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Worker {id} error: {e}");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::debug!("Worker {id} stopped");
}

/// Seconds to wait before retrying after the given number of attempts.
pub fn backoff_secs(attempts: i32) -> i64 {
    2_i64.pow(attempts.clamp(0, 20) as u32)
}

/// Upper bound for one delivery. Ticket creation makes two provider calls.
pub fn delivery_deadline(state: &SharedState) -> Duration {
    state.config.delivery_timeout * 2
}

pub async fn deliver(state: &SharedState, payload: &ActionPayload) -> Result<DeliveryReceipt, ActionError> {
    let deadline = delivery_deadline(state);
    match tokio::time::timeout(deadline, state.actions.deliver(payload)).await {
        Ok(result) => result,
        Err(_) => Err(ActionError::Transient(format!(
            "Delivery timed out after {}s",
            deadline.as_secs()
        ))),
    }
}

/// Claim and process the next ready task. Returns true if a task was processed.
pub async fn process_next(state: &SharedState) -> Result<bool, sqlx::Error> {
    for task in db::delivery_tasks::reap_abandoned(&state.pool).await? {
        tracing::error!(
            task_id = %task.id,
            submission_id = %task.submission_id,
            action = %task.action_name,
            attempt = task.attempts,
            "Delivery abandoned, worker lost during final attempt"
        );
    }

    let lock_secs = (delivery_deadline(state) + LOCK_GRACE).as_secs_f64();
    let Some(task) = db::delivery_tasks::claim_next(&state.pool, lock_secs).await? else {
        return Ok(false);
    };

    tracing::debug!(
        task_id = %task.id,
        submission_id = %task.submission_id,
        action = %task.action_name,
        attempt = task.attempts,
        "Processing delivery task"
    );

    let payload: ActionPayload = match serde_json::from_value(task.payload.clone()) {
        Ok(payload) => payload,
        Err(e) => {
            give_up(state, &task, &ActionError::Permanent(format!("Unreadable task payload: {e}"))).await?;
            return Ok(true);
        }
    };

    match db::submissions::find_by_id(&state.pool, task.submission_id).await? {
        None => {
            give_up(state, &task, &ActionError::Permanent("Submission no longer exists".into())).await?;
            return Ok(true);
        }
        Some(submission) if submission.is_sent => {
            tracing::debug!(task_id = %task.id, "Submission already sent, skipping delivery");
            db::delivery_tasks::mark_completed(&state.pool, task.id).await?;
            return Ok(true);
        }
        Some(_) => {}
    }

    match deliver(state, &payload).await {
        Ok(receipt) => {
            let mut tx = state.pool.begin().await?;
            db::delivery_tasks::mark_completed(&mut *tx, task.id).await?;
            db::submissions::mark_sent(&mut *tx, task.submission_id).await?;
            tx.commit().await?;

            tracing::info!(
                task_id = %task.id,
                submission_id = %task.submission_id,
                action = %task.action_name,
                reference = receipt.reference.as_deref().unwrap_or("-"),
                "Submission delivered"
            );
        }
        Err(e) if e.is_retryable() && task.attempts < task.max_attempts => {
            let backoff = backoff_secs(task.attempts);
            tracing::warn!(
                task_id = %task.id,
                submission_id = %task.submission_id,
                action = %task.action_name,
                attempt = task.attempts,
                error = %e,
                "Delivery failed, retrying in {backoff}s"
            );
            db::delivery_tasks::mark_retrying(&state.pool, task.id, &e.to_string(), backoff).await?;
        }
        Err(e) => give_up(state, &task, &e).await?,
    }

    Ok(true)
}

async fn give_up(state: &SharedState, task: &DeliveryTask, error: &ActionError) -> Result<(), sqlx::Error> {
    let reason = if error.is_retryable() {
        "Delivery retries exhausted"
    } else {
        "Delivery failed permanently"
    };
    tracing::error!(
        task_id = %task.id,
        submission_id = %task.submission_id,
        action = %task.action_name,
        attempt = task.attempts,
        error = %error,
        "{reason}"
    );
    db::delivery_tasks::mark_dead(&state.pool, task.id, &error.to_string()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(3), 8);
        assert_eq!(backoff_secs(4), 16);
    }

    #[test]
    fn backoff_is_bounded() {
        assert_eq!(backoff_secs(-1), 1);
        assert_eq!(backoff_secs(1000), 2_i64.pow(20));
    }
}
