use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::DeliveryTask;

pub async fn enqueue(
    pool: &PgPool,
    submission_id: Uuid,
    action_name: &str,
    payload: &serde_json::Value,
    max_attempts: i32,
) -> Result<DeliveryTask, sqlx::Error> {
    sqlx::query_as::<_, DeliveryTask>(
        "INSERT INTO delivery_tasks (submission_id, action_name, payload, max_attempts)
         VALUES ($1, $2, $3::json, $4) RETURNING *",
    )
    .bind(submission_id)
    .bind(action_name)
    .bind(payload.to_string())
    .bind(max_attempts)
    .fetch_one(pool)
    .await
}

/// Atomically claim the next ready task using SELECT FOR UPDATE SKIP LOCKED.
/// A task whose worker died mid-delivery becomes claimable again once its
/// lock expires.
pub async fn claim_next(pool: &PgPool, lock_secs: f64) -> Result<Option<DeliveryTask>, sqlx::Error> {
    sqlx::query_as::<_, DeliveryTask>(
        "UPDATE delivery_tasks
         SET status = 'processing',
             attempts = attempts + 1,
             locked_until = now() + make_interval(secs => $1::double precision)
         WHERE id = (
             SELECT id FROM delivery_tasks
             WHERE (status IN ('pending', 'retrying') AND next_retry_at <= now())
                OR (status = 'processing' AND locked_until < now() AND attempts < max_attempts)
             ORDER BY next_retry_at ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED
         )
         RETURNING *",
    )
    .bind(lock_secs)
    .fetch_optional(pool)
    .await
}

/// Kill tasks whose worker was lost during the final attempt. The claim
/// query never picks them up again, so without this they stay
/// `processing` forever.
pub async fn reap_abandoned(pool: &PgPool) -> Result<Vec<DeliveryTask>, sqlx::Error> {
    sqlx::query_as::<_, DeliveryTask>(
        "UPDATE delivery_tasks
         SET status = 'dead',
             last_error = 'Lock expired during final attempt',
             locked_until = NULL,
             completed_at = now()
         WHERE status = 'processing'
           AND locked_until < now()
           AND attempts >= max_attempts
         RETURNING *",
    )
    .fetch_all(pool)
    .await
}

/// A task is live while a worker may still deliver it. An expired lock on
/// the final attempt is not live.
pub async fn has_live_task(pool: &PgPool, submission_id: Uuid) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT 1 FROM delivery_tasks
            WHERE submission_id = $1
              AND (status IN ('pending', 'retrying')
                   OR (status = 'processing'
                       AND (locked_until >= now() OR attempts < max_attempts)))
         )",
    )
    .bind(submission_id)
    .fetch_one(pool)
    .await
}

pub async fn mark_completed<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "UPDATE delivery_tasks
         SET status = 'completed', locked_until = NULL, completed_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Schedule another attempt `backoff_secs` from now.
pub async fn mark_retrying(
    pool: &PgPool,
    id: Uuid,
    error: &str,
    backoff_secs: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE delivery_tasks
         SET status = 'retrying',
             last_error = $2,
             locked_until = NULL,
             next_retry_at = now() + make_interval(secs => $3::double precision)
         WHERE id = $1",
    )
    .bind(id)
    .bind(error)
    .bind(backoff_secs as f64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Permanently fail a task. It is never claimed again.
pub async fn mark_dead(pool: &PgPool, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE delivery_tasks
         SET status = 'dead', last_error = $2, locked_until = NULL, completed_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}
