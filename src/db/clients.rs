use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Client;

pub async fn create(pool: &PgPool, name: &str, access_key_enc: &[u8]) -> Result<Client, sqlx::Error> {
    sqlx::query_as::<_, Client>(
        "INSERT INTO clients (name, access_key_enc) VALUES ($1, $2) RETURNING *",
    )
    .bind(name)
    .bind(access_key_enc)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Client>, sqlx::Error> {
    sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn set_active(pool: &PgPool, id: Uuid, is_active: bool) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE clients SET is_active = $2 WHERE id = $1")
        .bind(id)
        .bind(is_active)
        .execute(pool)
        .await?;
    Ok(())
}
