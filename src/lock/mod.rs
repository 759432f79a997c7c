//! Cooperative per-session mutex on top of a shared key-value store.
//!
//! The lock is the only thing preventing two processes from advancing the
//! same session at once; nothing in-process is relied on.

mod memory;

use std::future::Future;
use std::time::Duration;

use rand::Rng;

pub use memory::MemoryLockProvider;

use crate::error::EngineError;
use crate::model::SessionId;

/// Shared key-value store used as a lock backend.
///
/// Providers are not required to evict expired keys; `ttl` may report zero
/// or a negative number for a key that is still present.
pub trait LockProvider: Send + Sync {
    /// Atomically store `value` under `key` unless the key exists.
    fn try_set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, EngineError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, EngineError>> + Send;

    /// Whole seconds until `key` expires, rounded up. `None` if absent.
    fn ttl(&self, key: &str) -> impl Future<Output = Result<Option<i64>, EngineError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), EngineError>> + Send;
}

/// Proof that this invocation holds a session's lock.
#[derive(Debug)]
#[must_use = "a held lock must be released"]
pub struct LockToken {
    session: SessionId,
    key: String,
    value: String,
}

impl LockToken {
    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// Session lock adapter over a [`LockProvider`].
#[derive(Debug, Clone)]
pub struct TurnLock<L> {
    provider: L,
    ttl: Duration,
}

impl<L: LockProvider> TurnLock<L> {
    pub fn new(provider: L, ttl: Duration) -> Self {
        Self { provider, ttl }
    }

    pub fn provider(&self) -> &L {
        &self.provider
    }

    pub fn key(session: SessionId) -> String {
        format!("turn_lock:{session}")
    }

    pub async fn remaining_ttl(&self, session: SessionId) -> Result<Option<i64>, EngineError> {
        self.provider.ttl(&Self::key(session)).await
    }

    /// True while another invocation (possibly in another process) holds a
    /// live lock on `session`.
    pub async fn is_held(&self, session: SessionId) -> Result<bool, EngineError> {
        Ok(matches!(self.remaining_ttl(session).await?, Some(ttl) if ttl > 0))
    }

    /// Try to take the session lock. `Ok(None)` means someone else holds it.
    ///
    /// An expired key the provider failed to evict is deleted first.
    pub async fn try_acquire(&self, session: SessionId) -> Result<Option<LockToken>, EngineError> {
        let key = Self::key(session);
        if let Some(ttl) = self.provider.ttl(&key).await?
            && ttl <= 0
        {
            tracing::warn!(session, ttl, "deleting stale turn lock");
            self.provider.delete(&key).await?;
        }

        let value = format!("{:016x}", rand::rng().random::<u64>());
        if !self.provider.try_set_if_absent(&key, &value, self.ttl).await? {
            tracing::debug!(session, "turn lock held elsewhere");
            return Ok(None);
        }
        Ok(Some(LockToken {
            session,
            key,
            value,
        }))
    }

    /// Release a lock taken by [`TurnLock::try_acquire`]. If the key no longer
    /// carries this token (it expired and was taken over) it is left alone.
    pub async fn release(&self, token: LockToken) -> Result<(), EngineError> {
        match self.provider.get(&token.key).await? {
            Some(current) if current == token.value => self.provider.delete(&token.key).await,
            _ => {
                tracing::warn!(
                    session = token.session,
                    "turn lock expired before release; another owner may have taken it"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock() -> TurnLock<MemoryLockProvider> {
        TurnLock::new(MemoryLockProvider::new(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn second_acquire_is_refused() {
        let lock = lock();
        let token = lock.try_acquire(7).await.unwrap().expect("first acquire");
        assert!(lock.try_acquire(7).await.unwrap().is_none());
        assert!(lock.is_held(7).await.unwrap());
        lock.release(token).await.unwrap();
        assert!(!lock.is_held(7).await.unwrap());
        let again = lock.try_acquire(7).await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn sessions_lock_independently() {
        let lock = lock();
        let a = lock.try_acquire(1).await.unwrap();
        let b = lock.try_acquire(2).await.unwrap();
        assert!(a.is_some() && b.is_some());
    }

    #[tokio::test]
    async fn stale_lock_is_healed() {
        let lock = lock();
        lock.provider()
            .insert_stale(&TurnLock::<MemoryLockProvider>::key(3), "dead-owner");
        assert_eq!(lock.remaining_ttl(3).await.unwrap(), Some(0));
        assert!(!lock.is_held(3).await.unwrap());

        let token = lock.try_acquire(3).await.unwrap();
        assert!(token.is_some(), "expired key should be deleted and re-acquired");
        assert!(lock.remaining_ttl(3).await.unwrap().unwrap() > 0);
    }

    #[tokio::test]
    async fn release_leaves_foreign_owner_alone() {
        let lock = lock();
        let key = TurnLock::<MemoryLockProvider>::key(4);
        let token = lock.try_acquire(4).await.unwrap().unwrap();

        // Simulate expiry followed by a takeover from another process.
        lock.provider().delete(&key).await.unwrap();
        assert!(lock.provider().try_set_if_absent(&key, "other", Duration::from_secs(60)).await.unwrap());

        lock.release(token).await.unwrap();
        assert_eq!(lock.provider().get(&key).await.unwrap().as_deref(), Some("other"));
    }
}
