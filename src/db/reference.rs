use sqlx::PgPool;

use crate::models::{ActionPriority, ActionType};

pub async fn list_types(pool: &PgPool) -> Result<Vec<ActionType>, sqlx::Error> {
    sqlx::query_as::<_, ActionType>("SELECT * FROM action_types ORDER BY name")
        .fetch_all(pool)
        .await
}

pub async fn find_type(pool: &PgPool, name: &str) -> Result<Option<ActionType>, sqlx::Error> {
    sqlx::query_as::<_, ActionType>("SELECT * FROM action_types WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
}

pub async fn list_priorities(pool: &PgPool) -> Result<Vec<ActionPriority>, sqlx::Error> {
    sqlx::query_as::<_, ActionPriority>("SELECT * FROM action_priorities ORDER BY weight")
        .fetch_all(pool)
        .await
}

pub async fn find_priority(pool: &PgPool, name: &str) -> Result<Option<ActionPriority>, sqlx::Error> {
    sqlx::query_as::<_, ActionPriority>("SELECT * FROM action_priorities WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
}
