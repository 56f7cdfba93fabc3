use sqlx::{PgExecutor, PgPool};

use crate::models::{ActionDependency, NewDependency};

pub async fn create<'e>(
    executor: impl PgExecutor<'e>,
    action_id: i64,
    dependency: &NewDependency,
) -> Result<ActionDependency, sqlx::Error> {
    sqlx::query_as::<_, ActionDependency>(
        "INSERT INTO action_dependencies (action_id, depends_on_action_id, dependency_type)
         VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(action_id)
    .bind(dependency.depends_on_action_id)
    .bind(dependency.dependency_type.as_str())
    .fetch_one(executor)
    .await
}

pub async fn list_for_action(
    pool: &PgPool,
    action_id: i64,
) -> Result<Vec<ActionDependency>, sqlx::Error> {
    sqlx::query_as::<_, ActionDependency>(
        "SELECT * FROM action_dependencies WHERE action_id = $1 ORDER BY id",
    )
    .bind(action_id)
    .fetch_all(pool)
    .await
}

pub async fn list_dependents(
    pool: &PgPool,
    action_id: i64,
) -> Result<Vec<ActionDependency>, sqlx::Error> {
    sqlx::query_as::<_, ActionDependency>(
        "SELECT * FROM action_dependencies WHERE depends_on_action_id = $1 ORDER BY id",
    )
    .bind(action_id)
    .fetch_all(pool)
    .await
}

/// Insert an edge unless `action_id` is already reachable from its prerequisite.
///
/// The table lock serialises concurrent inserts so two edges that only form a
/// cycle together cannot both pass the check.
pub async fn create_acyclic(
    pool: &PgPool,
    action_id: i64,
    dependency: &NewDependency,
) -> Result<Option<ActionDependency>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("LOCK TABLE action_dependencies IN SHARE ROW EXCLUSIVE MODE")
        .execute(&mut *tx)
        .await?;

    let cycle = sqlx::query_scalar::<_, bool>(
        "WITH RECURSIVE reachable(id) AS (
             SELECT $1::BIGINT
             UNION
             SELECT ad.depends_on_action_id FROM action_dependencies ad
             JOIN reachable r ON ad.action_id = r.id
         )
         SELECT EXISTS (SELECT 1 FROM reachable WHERE id = $2)",
    )
    .bind(dependency.depends_on_action_id)
    .bind(action_id)
    .fetch_one(&mut *tx)
    .await?;
    if cycle {
        tx.rollback().await?;
        return Ok(None);
    }

    let edge = create(&mut *tx, action_id, dependency).await?;
    tx.commit().await?;
    Ok(Some(edge))
}
