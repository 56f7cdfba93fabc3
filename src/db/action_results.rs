use sqlx::PgPool;

use crate::models::{ActionResult, NewActionResult};

pub async fn create(pool: &PgPool, result: &NewActionResult) -> Result<ActionResult, sqlx::Error> {
    sqlx::query_as::<_, ActionResult>(
        "INSERT INTO action_results (
             action_id, attempt_number, status, success, result_data, error_message,
             error_code, worker_id, started_at, completed_at, duration_ms
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         RETURNING *",
    )
    .bind(result.action_id)
    .bind(result.attempt_number)
    .bind(result.status.as_str())
    .bind(result.success)
    .bind(&result.result_data)
    .bind(&result.error_message)
    .bind(&result.error_code)
    .bind(&result.worker_id)
    .bind(result.started_at)
    .bind(result.completed_at)
    .bind(result.duration_ms)
    .fetch_one(pool)
    .await
}

pub async fn list_for_action(pool: &PgPool, action_id: i64) -> Result<Vec<ActionResult>, sqlx::Error> {
    sqlx::query_as::<_, ActionResult>(
        "SELECT * FROM action_results WHERE action_id = $1 ORDER BY attempt_number, id",
    )
    .bind(action_id)
    .fetch_all(pool)
    .await
}
