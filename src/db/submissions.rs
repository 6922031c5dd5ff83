use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::Submission;

pub struct NewSubmission<'a> {
    pub data: &'a serde_json::Value,
    pub meta: &'a serde_json::Value,
    pub form_url: Option<&'a str>,
    pub client_id: Option<Uuid>,
    pub sender_id: Option<Uuid>,
}

/// Data and meta are bound as text so Postgres keeps their key order.
pub async fn create<'e, E>(executor: E, new: &NewSubmission<'_>) -> Result<Submission, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Submission>(
        "INSERT INTO submissions (data, meta, form_url, client_id, sender_id)
         VALUES ($1::json, $2::json, $3, $4, $5) RETURNING *",
    )
    .bind(new.data.to_string())
    .bind(new.meta.to_string())
    .bind(new.form_url)
    .bind(new.client_id)
    .bind(new.sender_id)
    .fetch_one(executor)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Flip `is_sent` to true. Returns false when the row was already sent (or
/// no longer exists), so the transition happens at most once.
pub async fn mark_sent<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("UPDATE submissions SET is_sent = true WHERE id = $1 AND is_sent = false")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Unsent submissions with one of `action_names` created at or after
/// `since` that the task queue is no longer working on.
pub async fn list_unsent_abandoned(
    pool: &PgPool,
    action_names: &[&str],
    since: DateTime<Utc>,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "SELECT s.* FROM submissions s
         WHERE s.is_sent = false
           AND s.meta->>'action_name' = ANY($1)
           AND s.created_at >= $2
           AND NOT EXISTS (
               SELECT 1 FROM delivery_tasks t
               WHERE t.submission_id = s.id
                 AND (t.status IN ('pending', 'retrying')
                      OR (t.status = 'processing'
                          AND (t.locked_until >= now() OR t.attempts < t.max_attempts)))
           )
         ORDER BY s.created_at ASC",
    )
    .bind(action_names)
    .bind(since)
    .fetch_all(pool)
    .await
}

pub async fn delete_by_sender_email(pool: &PgPool, email_address: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM submissions WHERE sender_id IN (
            SELECT id FROM senders WHERE email_address = lower($1)
        )",
    )
    .bind(email_address)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
