//! Persistence contract for everything the execution loop reads and writes.
//!
//! Every call is a fresh read or an immediately persisted write; the engine
//! keeps nothing between invocations.

mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};

pub use memory::MemoryStore;

use crate::error::EngineError;
use crate::model::{
    City, CityId, EventId, EventRecord, EventTarget, General, GeneralId, LogEntry, Nation,
    NationId, QueueKey, Session, SessionId, TurnQueue, TurnSlot,
};

/// Session-scoped world storage.
pub trait WorldStore: Send + Sync {
    // -- Sessions --

    fn session(
        &self,
        id: SessionId,
    ) -> impl Future<Output = Result<Option<Session>, EngineError>> + Send;

    fn save_session(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Sessions that are not frozen.
    fn active_sessions(&self) -> impl Future<Output = Result<Vec<Session>, EngineError>> + Send;

    // -- Generals --

    fn general(
        &self,
        session: SessionId,
        id: GeneralId,
    ) -> impl Future<Output = Result<Option<General>, EngineError>> + Send;

    /// Generals with `turntime < before`, ordered by `(turntime, id)`.
    fn generals_due_before(
        &self,
        session: SessionId,
        before: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<General>, EngineError>> + Send;

    fn earliest_general_turntime(
        &self,
        session: SessionId,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, EngineError>> + Send;

    fn save_general(
        &self,
        session: SessionId,
        general: &General,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Delete a general together with its action queue.
    fn remove_general(
        &self,
        session: SessionId,
        id: GeneralId,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    // -- Turn queues --

    /// The full ring for `key`; absent slots read as rest.
    fn turns(
        &self,
        session: SessionId,
        key: QueueKey,
    ) -> impl Future<Output = Result<TurnQueue, EngineError>> + Send;

    fn set_turn(
        &self,
        session: SessionId,
        key: QueueKey,
        idx: usize,
        slot: &TurnSlot,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Consume `by` leading slots of the ring (see [`TurnQueue::rotate`]).
    fn rotate_turns(
        &self,
        session: SessionId,
        key: QueueKey,
        by: usize,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    // -- Nations and cities --

    fn nation(
        &self,
        session: SessionId,
        id: NationId,
    ) -> impl Future<Output = Result<Option<Nation>, EngineError>> + Send;

    fn nations(
        &self,
        session: SessionId,
    ) -> impl Future<Output = Result<Vec<Nation>, EngineError>> + Send;

    fn save_nation(
        &self,
        session: SessionId,
        nation: &Nation,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Delete a nation and its officers' queues; its generals become
    /// unaffiliated with no rank.
    fn dissolve_nation(
        &self,
        session: SessionId,
        id: NationId,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn city(
        &self,
        session: SessionId,
        id: CityId,
    ) -> impl Future<Output = Result<Option<City>, EngineError>> + Send;

    fn cities(
        &self,
        session: SessionId,
    ) -> impl Future<Output = Result<Vec<City>, EngineError>> + Send;

    fn save_city(
        &self,
        session: SessionId,
        city: &City,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    // -- Events and logs --

    /// Events for `target`, ordered by priority descending then id.
    fn events_for(
        &self,
        session: SessionId,
        target: EventTarget,
    ) -> impl Future<Output = Result<Vec<EventRecord>, EngineError>> + Send;

    fn save_event(
        &self,
        session: SessionId,
        event: &EventRecord,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn remove_event(
        &self,
        session: SessionId,
        id: EventId,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn append_logs(
        &self,
        session: SessionId,
        entries: &[LogEntry],
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn logs(
        &self,
        session: SessionId,
    ) -> impl Future<Output = Result<Vec<LogEntry>, EngineError>> + Send;

    // -- Month sweeps --

    fn age_generals(
        &self,
        session: SessionId,
        years: i16,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Lower every nation's `strategic_limit` by one, not below zero.
    fn decay_strategic_limits(
        &self,
        session: SessionId,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;
}
