use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::QueueSetting;

pub async fn list(pool: &PgPool) -> Result<Vec<QueueSetting>, sqlx::Error> {
    sqlx::query_as::<_, QueueSetting>("SELECT * FROM queue_settings ORDER BY key")
        .fetch_all(pool)
        .await
}

pub async fn find(pool: &PgPool, key: &str) -> Result<Option<QueueSetting>, sqlx::Error> {
    sqlx::query_as::<_, QueueSetting>("SELECT * FROM queue_settings WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
}

/// Update a writable setting. Read-only and unknown keys return `None`.
pub async fn update(
    pool: &PgPool,
    key: &str,
    value: &str,
    now: DateTime<Utc>,
) -> Result<Option<QueueSetting>, sqlx::Error> {
    sqlx::query_as::<_, QueueSetting>(
        "UPDATE queue_settings SET value = $2, updated_at = $3
         WHERE key = $1 AND NOT is_readonly
         RETURNING *",
    )
    .bind(key)
    .bind(value)
    .bind(now)
    .fetch_optional(pool)
    .await
}
