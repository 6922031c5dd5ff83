use sqlx::PgPool;
use uuid::Uuid;

/// Try to take the named lease for `lease_secs`. Returns the lease token
/// when acquired, `None` while another holder's lease is still live.
pub async fn try_acquire(
    pool: &PgPool,
    name: &str,
    holder: &str,
    lease_secs: f64,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO job_leases (name, holder, token, expires_at)
         VALUES ($1, $2, gen_random_uuid(), now() + make_interval(secs => $3::float8))
         ON CONFLICT (name) DO UPDATE
         SET holder = EXCLUDED.holder,
             token = EXCLUDED.token,
             expires_at = EXCLUDED.expires_at
         WHERE job_leases.expires_at < now()
         RETURNING token",
    )
    .bind(name)
    .bind(holder)
    .bind(lease_secs)
    .fetch_optional(pool)
    .await
}

/// Release a lease, but only if `token` still owns it.
pub async fn release(pool: &PgPool, name: &str, token: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM job_leases WHERE name = $1 AND token = $2")
        .bind(name)
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Push the expiry of a lease we still own. Returns false once another
/// holder has taken it over.
pub async fn renew(pool: &PgPool, name: &str, token: Uuid, lease_secs: f64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE job_leases
         SET expires_at = now() + make_interval(secs => $3::float8)
         WHERE name = $1 AND token = $2",
    )
    .bind(name)
    .bind(token)
    .bind(lease_secs)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
