//! DDL for the mapped tables.

use sqlx::PgPool;

use crate::PersistenceResult;

const CREATE_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS team (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS member (
        id BIGSERIAL PRIMARY KEY,
        username VARCHAR(255) NOT NULL,
        age INTEGER NOT NULL,
        team_id BIGINT REFERENCES team(id)
    )
    "#,
];

// Referencing tables first.
const DROP_STATEMENTS: &[&str] = &[
    "DROP TABLE IF EXISTS member CASCADE",
    "DROP TABLE IF EXISTS team CASCADE",
];

/// Create the `team` and `member` tables if they do not exist yet.
pub async fn create_schema(pool: &PgPool) -> PersistenceResult<()> {
    for statement in CREATE_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("schema created");
    Ok(())
}

pub async fn drop_schema(pool: &PgPool) -> PersistenceResult<()> {
    for statement in DROP_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("schema dropped");
    Ok(())
}
