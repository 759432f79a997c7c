use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::LockProvider;
use crate::error::EngineError;

#[derive(Debug)]
struct LockEntry {
    value: String,
    expires_at: Instant,
}

/// In-process [`LockProvider`]. Like the Postgres provider it never evicts
/// expired keys on its own; they linger until deleted.
///
/// Clones share the same key space.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockProvider {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant a key whose TTL has already run out.
    pub fn insert_stale(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.to_string(),
            LockEntry {
                value: value.to_string(),
                expires_at: Instant::now(),
            },
        );
    }
}

fn remaining_secs(expires_at: Instant, now: Instant) -> i64 {
    if expires_at <= now {
        return -((now - expires_at).as_secs() as i64);
    }
    let left = expires_at - now;
    left.as_secs() as i64 + i64::from(left.subsec_nanos() > 0)
}

impl LockProvider for MemoryLockProvider {
    async fn try_set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, EngineError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            LockEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>, EngineError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        Ok(entries.get(key).map(|e| remaining_secs(e.expires_at, now)))
    }

    async fn delete(&self, key: &str) -> Result<(), EngineError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}
