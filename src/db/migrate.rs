use sqlx::PgPool;

use crate::error::EngineError;

/// Execute the schema DDL. Every statement is `IF NOT EXISTS`, so running
/// it against an existing database is a no-op.
pub async fn migrate(pool: &PgPool) -> Result<(), EngineError> {
    sqlx::raw_sql(include_str!("../../sql/schema.sql"))
        .execute(pool)
        .await?;
    tracing::info!("schema applied");
    Ok(())
}
