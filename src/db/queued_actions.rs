use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};

use crate::models::{
    ActionPatch, ActionStatus, ClearRequest, Completion, NewAction, OrderBy, OrderDirection,
    QueueFilter, QueuedAction, RetrySchedule,
};

const SELECT_ACTION: &str = "SELECT qa.*, at.handler_name, ap.weight AS priority_weight
     FROM queued_actions qa
     JOIN action_types at ON at.name = qa.action_type
     JOIN action_priorities ap ON ap.name = qa.priority";

/// Readiness predicate over alias `qa`; `$1` must be bound to the current time.
const READY: &str = "qa.status IN ('pending', 'retrying')
       AND (qa.scheduled_at IS NULL OR qa.scheduled_at <= $1)
       AND (qa.execute_after IS NULL OR qa.execute_after <= $1)
       AND (qa.next_retry_at IS NULL OR qa.next_retry_at <= $1)
       AND (qa.deadline IS NULL OR qa.deadline > $1)
       AND NOT EXISTS (
           SELECT 1 FROM action_dependencies ad
           JOIN queued_actions pre ON pre.id = ad.depends_on_action_id
           WHERE ad.action_id = qa.id
             AND NOT ((ad.dependency_type = 'completion' AND pre.status = 'completed')
                   OR (ad.dependency_type = 'failure'
                       AND pre.status IN ('failed', 'timeout', 'cancelled')))
       )";

fn status_names(statuses: &[ActionStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

pub async fn insert<'e>(executor: impl PgExecutor<'e>, action: &NewAction) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO queued_actions (
             name, description, action_type, priority, payload, target_entity_id,
             correlation_id, parent_action_id, created_by, timeout_seconds, max_retries,
             backoff_factor, scheduled_at, execute_after, deadline
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
         RETURNING id",
    )
    .bind(&action.name)
    .bind(&action.description)
    .bind(&action.action_type)
    .bind(&action.priority)
    .bind(&action.payload)
    .bind(&action.target_entity_id)
    .bind(&action.correlation_id)
    .bind(action.parent_action_id)
    .bind(&action.created_by)
    .bind(action.timeout_seconds)
    .bind(action.max_retries)
    .bind(action.backoff_factor)
    .bind(action.scheduled_at)
    .bind(action.execute_after)
    .bind(action.deadline)
    .fetch_one(executor)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<QueuedAction>, sqlx::Error> {
    sqlx::query_as::<_, QueuedAction>(&format!("{SELECT_ACTION} WHERE qa.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list(pool: &PgPool, filter: &QueueFilter) -> Result<Vec<QueuedAction>, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new(SELECT_ACTION);
    query.push(" WHERE TRUE");

    if !filter.status.is_empty() {
        query.push(" AND qa.status = ANY(").push_bind(status_names(&filter.status)).push(")");
    }
    if !filter.priority.is_empty() {
        query.push(" AND qa.priority = ANY(").push_bind(filter.priority.clone()).push(")");
    }
    if !filter.action_type.is_empty() {
        query.push(" AND qa.action_type = ANY(").push_bind(filter.action_type.clone()).push(")");
    }
    if let Some(correlation_id) = &filter.correlation_id {
        query.push(" AND qa.correlation_id = ").push_bind(correlation_id.clone());
    }
    if let Some(target) = &filter.target_entity_id {
        query.push(" AND qa.target_entity_id = ").push_bind(target.clone());
    }
    if let Some(after) = filter.created_after {
        query.push(" AND qa.created_at >= ").push_bind(after);
    }
    if let Some(before) = filter.created_before {
        query.push(" AND qa.created_at <= ").push_bind(before);
    }

    let column = match filter.order_by {
        OrderBy::CreatedAt => "qa.created_at",
        OrderBy::Priority => "ap.weight",
        OrderBy::ScheduledAt => "qa.scheduled_at",
    };
    let direction = match filter.order_direction {
        OrderDirection::Asc => "ASC",
        OrderDirection::Desc => "DESC",
    };
    query.push(format!(" ORDER BY {column} {direction}, qa.id {direction}"));
    query.push(" LIMIT ").push_bind(filter.limit);
    query.push(" OFFSET ").push_bind(filter.offset);

    query.build_query_as::<QueuedAction>().fetch_all(pool).await
}

/// Apply an operator patch unless the action is terminal. Returns the id when updated.
pub async fn patch(
    pool: &PgPool,
    id: i64,
    patch: &ActionPatch,
    now: DateTime<Utc>,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE queued_actions SET
             name = COALESCE($2, name),
             description = COALESCE($3, description),
             priority = COALESCE($4, priority),
             scheduled_at = COALESCE($5, scheduled_at),
             execute_after = COALESCE($6, execute_after),
             deadline = COALESCE($7, deadline),
             status = COALESCE($8, status),
             next_retry_at = CASE WHEN $8 = 'pending' THEN NULL ELSE next_retry_at END,
             claimed_by = CASE WHEN $8 = 'pending' THEN NULL ELSE claimed_by END,
             completed_at = CASE WHEN $8 IN ('completed', 'failed', 'cancelled', 'timeout')
                                 THEN $9 ELSE completed_at END,
             updated_at = $9
         WHERE id = $1
           AND status NOT IN ('completed', 'failed', 'cancelled', 'timeout')
         RETURNING id",
    )
    .bind(id)
    .bind(&patch.name)
    .bind(&patch.description)
    .bind(&patch.priority)
    .bind(patch.scheduled_at)
    .bind(patch.execute_after)
    .bind(patch.deadline)
    .bind(patch.status.map(|s| s.as_str()))
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub async fn delete(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM queued_actions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Atomically claim the next ready action using SELECT FOR UPDATE SKIP LOCKED.
pub async fn claim_next(
    pool: &PgPool,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(&format!(
        "UPDATE queued_actions
         SET status = 'processing', claimed_by = $2, started_at = $1,
             last_attempt_at = $1, updated_at = $1
         WHERE id = (
             SELECT qa.id FROM queued_actions qa
             JOIN action_priorities ap ON ap.name = qa.priority
             WHERE {READY}
             ORDER BY ap.weight DESC, qa.created_at ASC, qa.id ASC
             LIMIT 1
             FOR UPDATE OF qa SKIP LOCKED
         )
         RETURNING id"
    ))
    .bind(now)
    .bind(worker_id)
    .fetch_optional(pool)
    .await
}

/// Claim one specific action if it is ready.
pub async fn claim(
    pool: &PgPool,
    id: i64,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(&format!(
        "UPDATE queued_actions qa
         SET status = 'processing', claimed_by = $2, started_at = $1,
             last_attempt_at = $1, updated_at = $1
         WHERE qa.id = $3 AND {READY}
         RETURNING qa.id"
    ))
    .bind(now)
    .bind(worker_id)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn ready(
    pool: &PgPool,
    priority: Option<&str>,
    action_type: Option<&str>,
    limit: i64,
    now: DateTime<Utc>,
) -> Result<Vec<QueuedAction>, sqlx::Error> {
    sqlx::query_as::<_, QueuedAction>(&format!(
        "{SELECT_ACTION}
         WHERE {READY}
           AND ($2::text IS NULL OR qa.priority = $2)
           AND ($3::text IS NULL OR qa.action_type = $3)
         ORDER BY ap.weight DESC, qa.created_at ASC, qa.id ASC
         LIMIT $4"
    ))
    .bind(now)
    .bind(priority)
    .bind(action_type)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn complete(
    pool: &PgPool,
    id: i64,
    worker_id: &str,
    completion: &Completion,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_actions
         SET status = $3, result_data = $4, error_message = $5, error_details = $6,
             execution_duration_ms = $7, completed_at = $8, updated_at = $8
         WHERE id = $1 AND status = 'processing' AND claimed_by = $2",
    )
    .bind(id)
    .bind(worker_id)
    .bind(completion.status.as_str())
    .bind(&completion.result_data)
    .bind(&completion.error_message)
    .bind(&completion.error_details)
    .bind(completion.duration_ms)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn schedule_retry(
    pool: &PgPool,
    id: i64,
    worker_id: &str,
    retry: &RetrySchedule,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_actions
         SET status = 'retrying', retry_count = retry_count + 1, next_retry_at = $3,
             error_message = $4, error_details = $5, execution_duration_ms = $6,
             updated_at = $7
         WHERE id = $1 AND status = 'processing' AND claimed_by = $2",
    )
    .bind(id)
    .bind(worker_id)
    .bind(retry.next_retry_at)
    .bind(&retry.error_message)
    .bind(&retry.error_details)
    .bind(retry.duration_ms)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn transition(
    pool: &PgPool,
    id: i64,
    from: &[ActionStatus],
    to: ActionStatus,
    error_message: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_actions
         SET status = $2,
             error_message = COALESCE($3, error_message),
             next_retry_at = CASE WHEN $2 = 'pending' THEN NULL ELSE next_retry_at END,
             claimed_by = CASE WHEN $2 = 'pending' THEN NULL ELSE claimed_by END,
             completed_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled', 'timeout')
                                 THEN $4 ELSE completed_at END,
             updated_at = $4
         WHERE id = $1 AND status = ANY($5)",
    )
    .bind(id)
    .bind(to.as_str())
    .bind(error_message)
    .bind(now)
    .bind(status_names(from))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Hand a claim back to the queue without counting an attempt.
pub async fn release(
    pool: &PgPool,
    id: i64,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_actions
         SET status = CASE WHEN next_retry_at IS NULL THEN 'pending' ELSE 'retrying' END,
             claimed_by = NULL, updated_at = $3
         WHERE id = $1 AND status = 'processing' AND claimed_by = $2",
    )
    .bind(id)
    .bind(worker_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn claimed(pool: &PgPool) -> Result<Vec<QueuedAction>, sqlx::Error> {
    sqlx::query_as::<_, QueuedAction>(&format!(
        "{SELECT_ACTION} WHERE qa.status = 'processing' ORDER BY qa.last_attempt_at ASC"
    ))
    .fetch_all(pool)
    .await
}

pub async fn overdue(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<QueuedAction>, sqlx::Error> {
    sqlx::query_as::<_, QueuedAction>(&format!(
        "{SELECT_ACTION}
         WHERE qa.status IN ('pending', 'processing', 'retrying')
           AND qa.deadline IS NOT NULL AND qa.deadline < $1
         ORDER BY qa.deadline ASC"
    ))
    .bind(now)
    .fetch_all(pool)
    .await
}

pub async fn delete_terminal_before(
    pool: &PgPool,
    statuses: &[ActionStatus],
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM queued_actions WHERE status = ANY($1) AND updated_at < $2",
    )
    .bind(status_names(statuses))
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn clear(pool: &PgPool, criteria: &ClearRequest) -> Result<u64, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM queued_actions WHERE TRUE");
    if !criteria.status.is_empty() {
        query.push(" AND status = ANY(").push_bind(status_names(&criteria.status)).push(")");
    }
    if let Some(older_than) = criteria.older_than {
        query.push(" AND created_at < ").push_bind(older_than);
    }
    if let Some(action_type) = &criteria.action_type {
        query.push(" AND action_type = ").push_bind(action_type.clone());
    }
    if let Some(correlation_id) = &criteria.correlation_id {
        query.push(" AND correlation_id = ").push_bind(correlation_id.clone());
    }
    let result = query.build().execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn count_by(pool: &PgPool, column: GroupColumn) -> Result<Vec<(String, i64)>, sqlx::Error> {
    let column = match column {
        GroupColumn::Status => "status",
        GroupColumn::Priority => "priority",
        GroupColumn::ActionType => "action_type",
    };
    sqlx::query_as::<_, (String, i64)>(&format!(
        "SELECT {column}, COUNT(*) FROM queued_actions GROUP BY {column}"
    ))
    .fetch_all(pool)
    .await
}

#[derive(Debug, Clone, Copy)]
pub enum GroupColumn {
    Status,
    Priority,
    ActionType,
}

pub async fn average_duration(pool: &PgPool) -> Result<Option<f64>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<f64>>(
        "SELECT AVG(execution_duration_ms)::DOUBLE PRECISION FROM queued_actions
         WHERE status = 'completed' AND execution_duration_ms IS NOT NULL",
    )
    .fetch_one(pool)
    .await
}

pub async fn oldest_pending(pool: &PgPool) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT MIN(created_at) FROM queued_actions WHERE status = 'pending'",
    )
    .fetch_one(pool)
    .await
}

pub async fn last_processed(pool: &PgPool) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<DateTime<Utc>>>("SELECT MAX(completed_at) FROM queued_actions")
        .fetch_one(pool)
        .await
}
