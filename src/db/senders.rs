use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{BlacklistReason, Sender};

/// Look up a sender by email address, creating a neutral one if needed.
/// Addresses are stored lower-cased.
pub async fn get_or_create<'e, E>(executor: E, email_address: &str) -> Result<Sender, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Sender>(
        "INSERT INTO senders (email_address) VALUES (lower($1))
         ON CONFLICT (email_address) DO UPDATE SET email_address = EXCLUDED.email_address
         RETURNING *",
    )
    .bind(email_address)
    .fetch_one(executor)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Sender>, sqlx::Error> {
    sqlx::query_as::<_, Sender>("SELECT * FROM senders WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_email(pool: &PgPool, email_address: &str) -> Result<Option<Sender>, sqlx::Error> {
    sqlx::query_as::<_, Sender>("SELECT * FROM senders WHERE email_address = lower($1)")
        .bind(email_address)
        .fetch_optional(pool)
        .await
}

pub async fn blacklist(pool: &PgPool, id: Uuid, reason: BlacklistReason) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE senders SET is_blacklisted = true, blacklisted_reason = $2, updated_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .bind(reason.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn unblacklist(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE senders SET is_blacklisted = false, blacklisted_reason = NULL, updated_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn whitelist(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE senders SET is_whitelisted = true, updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
