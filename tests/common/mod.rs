#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use turn_engine::*;

pub type MemEngine = TurnEngine<MemoryStore, MemoryLockProvider>;

/// An hour-aligned instant, so one-hour turns start exactly on it.
pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_699_999_200, 0).unwrap()
}

pub fn mins(n: i64) -> TimeDelta {
    TimeDelta::minutes(n)
}

pub fn engine_at(store: MemoryStore, now: DateTime<Utc>) -> MemEngine {
    engine_with(store, CommandRegistry::with_builtins(), EngineConfig::default(), now)
}

pub fn engine_with(
    store: MemoryStore,
    registry: CommandRegistry,
    config: EngineConfig,
    now: DateTime<Utc>,
) -> MemEngine {
    TurnEngine::new(store, MemoryLockProvider::new(), registry, config)
        .unwrap()
        .with_time_source(Arc::new(ManualTime::new(now)))
}

pub fn tight_budget(budget: Duration) -> EngineConfig {
    EngineConfig::new(Duration::from_secs(30), budget)
}

pub async fn log_texts(store: &MemoryStore) -> Vec<String> {
    store
        .logs(Scenario::SESSION_ID)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.text)
        .collect()
}

pub async fn general(store: &MemoryStore, id: i64) -> Option<turn_engine::model::General> {
    store.general(Scenario::SESSION_ID, id).await.unwrap()
}

pub async fn session(store: &MemoryStore) -> turn_engine::model::Session {
    store.session(Scenario::SESSION_ID).await.unwrap().unwrap()
}
