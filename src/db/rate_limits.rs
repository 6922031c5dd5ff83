use sqlx::PgPool;

/// Record one hit for `key` and return how many hits, this one included,
/// fall inside the last `window_secs`.
pub async fn record_attempt(pool: &PgPool, key: &str, window_secs: f64) -> Result<i32, sqlx::Error> {
    // The inserted row is not visible to the count in the same statement.
    sqlx::query_scalar::<_, i32>(
        "WITH hit AS (
             INSERT INTO rate_limit_hits (key) VALUES ($1)
         )
         SELECT (
             SELECT count(*) FROM rate_limit_hits
             WHERE key = $1
               AND hit_at > now() - make_interval(secs => $2::float8)
         )::int4 + 1",
    )
    .bind(key)
    .bind(window_secs)
    .fetch_one(pool)
    .await
}

/// Drop hits that fell out of the window more than `older_than_secs` ago.
pub async fn cleanup(pool: &PgPool, older_than_secs: f64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM rate_limit_hits
         WHERE hit_at < now() - make_interval(secs => $1::float8)",
    )
    .bind(older_than_secs)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
