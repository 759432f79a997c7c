use std::time::Duration;

use sqlx::PgPool;

use crate::error::EngineError;
use crate::lock::LockProvider;

/// [`LockProvider`] on the `turn_locks` table.
///
/// Rows past `expires_at` are not removed by Postgres; readers see a
/// non-positive TTL until someone deletes them.
#[derive(Debug, Clone)]
pub struct PgLockProvider {
    pool: PgPool,
}

impl PgLockProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl LockProvider for PgLockProvider {
    async fn try_set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, EngineError> {
        let millis = i64::try_from(ttl.as_millis())
            .map_err(|_| EngineError::Lock(format!("ttl {ttl:?} out of range")))?;
        let inserted = sqlx::query(
            "INSERT INTO turn_locks (key, value, expires_at)
             VALUES ($1, $2, now() + make_interval(secs => $3::double precision / 1000))
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .bind(millis)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let value = sqlx::query_scalar("SELECT value FROM turn_locks WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>, EngineError> {
        let ttl = sqlx::query_scalar(
            "SELECT CEIL(EXTRACT(EPOCH FROM expires_at - now()))::bigint
             FROM turn_locks WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ttl)
    }

    async fn delete(&self, key: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM turn_locks WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
