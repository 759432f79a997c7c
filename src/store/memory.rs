use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::WorldStore;
use crate::error::EngineError;
use crate::model::{
    City, CityId, EventId, EventRecord, EventTarget, General, GeneralId, LogEntry, Nation,
    NationId, QueueKey, Session, SessionId, TurnQueue, TurnSlot,
};

#[derive(Debug, Default)]
struct MemoryState {
    sessions: BTreeMap<SessionId, Session>,
    generals: BTreeMap<(SessionId, GeneralId), General>,
    nations: BTreeMap<(SessionId, NationId), Nation>,
    cities: BTreeMap<(SessionId, CityId), City>,
    queues: BTreeMap<(SessionId, QueueKey), TurnQueue>,
    events: BTreeMap<(SessionId, EventId), EventRecord>,
    logs: Vec<(SessionId, LogEntry)>,
    /// Every `turntime` ever written per session, in write order.
    turntime_writes: BTreeMap<SessionId, Vec<DateTime<Utc>>>,
    unavailable: bool,
    reject_logs: bool,
}

/// [`WorldStore`] kept entirely in process memory.
///
/// Clones share state, so a test can hand one clone to the engine and
/// inspect another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn raw(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, EngineError> {
        let state = self.raw();
        if state.unavailable {
            return Err(EngineError::Unavailable("memory store switched off".to_string()));
        }
        Ok(state)
    }

    /// Make every subsequent call fail as if the backing store were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.raw().unavailable = unavailable;
    }

    /// Make `append_logs` fail while every other call keeps working.
    pub fn set_rejecting_logs(&self, reject: bool) {
        self.raw().reject_logs = reject;
    }

    pub fn insert_session(&self, session: Session) {
        self.raw().sessions.insert(session.id, session);
    }

    pub fn insert_general(&self, session: SessionId, general: General) {
        self.raw().generals.insert((session, general.id), general);
    }

    pub fn insert_nation(&self, session: SessionId, nation: Nation) {
        self.raw().nations.insert((session, nation.id), nation);
    }

    pub fn insert_city(&self, session: SessionId, city: City) {
        self.raw().cities.insert((session, city.id), city);
    }

    pub fn insert_event(&self, session: SessionId, event: EventRecord) {
        self.raw().events.insert((session, event.id), event);
    }

    /// Queue `slot` at `idx` without going through the async interface.
    pub fn insert_turn(&self, session: SessionId, key: QueueKey, idx: usize, slot: TurnSlot) {
        let mut state = self.raw();
        state
            .queues
            .entry((session, key))
            .or_insert_with(|| TurnQueue::new(key.capacity()))
            .set(idx, slot);
    }

    /// History of `turntime` values written for `session`.
    pub fn turntime_writes(&self, session: SessionId) -> Vec<DateTime<Utc>> {
        self.raw()
            .turntime_writes
            .get(&session)
            .cloned()
            .unwrap_or_default()
    }
}

impl WorldStore for MemoryStore {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, EngineError> {
        Ok(self.state()?.sessions.get(&id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), EngineError> {
        let mut state = self.state()?;
        state
            .turntime_writes
            .entry(session.id)
            .or_default()
            .push(session.turntime);
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<Session>, EngineError> {
        Ok(self
            .state()?
            .sessions
            .values()
            .filter(|s| !s.state.is_frozen())
            .cloned()
            .collect())
    }

    async fn general(
        &self,
        session: SessionId,
        id: GeneralId,
    ) -> Result<Option<General>, EngineError> {
        Ok(self.state()?.generals.get(&(session, id)).cloned())
    }

    async fn generals_due_before(
        &self,
        session: SessionId,
        before: DateTime<Utc>,
    ) -> Result<Vec<General>, EngineError> {
        let state = self.state()?;
        let mut due: Vec<General> = state
            .generals
            .range((session, GeneralId::MIN)..=(session, GeneralId::MAX))
            .map(|(_, g)| g)
            .filter(|g| g.turntime < before)
            .cloned()
            .collect();
        due.sort_by_key(|g| (g.turntime, g.id));
        Ok(due)
    }

    async fn earliest_general_turntime(
        &self,
        session: SessionId,
    ) -> Result<Option<DateTime<Utc>>, EngineError> {
        let state = self.state()?;
        Ok(state
            .generals
            .range((session, GeneralId::MIN)..=(session, GeneralId::MAX))
            .map(|(_, g)| g.turntime)
            .min())
    }

    async fn save_general(&self, session: SessionId, general: &General) -> Result<(), EngineError> {
        self.state()?
            .generals
            .insert((session, general.id), general.clone());
        Ok(())
    }

    async fn remove_general(&self, session: SessionId, id: GeneralId) -> Result<(), EngineError> {
        let mut state = self.state()?;
        state.generals.remove(&(session, id));
        state.queues.remove(&(session, QueueKey::General(id)));
        Ok(())
    }

    async fn turns(&self, session: SessionId, key: QueueKey) -> Result<TurnQueue, EngineError> {
        Ok(self
            .state()?
            .queues
            .get(&(session, key))
            .cloned()
            .unwrap_or_else(|| TurnQueue::new(key.capacity())))
    }

    async fn set_turn(
        &self,
        session: SessionId,
        key: QueueKey,
        idx: usize,
        slot: &TurnSlot,
    ) -> Result<(), EngineError> {
        let mut state = self.state()?;
        state
            .queues
            .entry((session, key))
            .or_insert_with(|| TurnQueue::new(key.capacity()))
            .set(idx, slot.clone());
        Ok(())
    }

    async fn rotate_turns(
        &self,
        session: SessionId,
        key: QueueKey,
        by: usize,
    ) -> Result<(), EngineError> {
        let mut state = self.state()?;
        if let Some(queue) = state.queues.get_mut(&(session, key)) {
            queue.rotate(by);
        }
        Ok(())
    }

    async fn nation(&self, session: SessionId, id: NationId) -> Result<Option<Nation>, EngineError> {
        Ok(self.state()?.nations.get(&(session, id)).cloned())
    }

    async fn nations(&self, session: SessionId) -> Result<Vec<Nation>, EngineError> {
        let state = self.state()?;
        Ok(state
            .nations
            .range((session, NationId::MIN)..=(session, NationId::MAX))
            .map(|(_, n)| n.clone())
            .collect())
    }

    async fn save_nation(&self, session: SessionId, nation: &Nation) -> Result<(), EngineError> {
        self.state()?
            .nations
            .insert((session, nation.id), nation.clone());
        Ok(())
    }

    async fn dissolve_nation(&self, session: SessionId, id: NationId) -> Result<(), EngineError> {
        let mut state = self.state()?;
        state.nations.remove(&(session, id));
        state.queues.retain(|(s, key), _| {
            !(*s == session && matches!(key, QueueKey::Nation { nation, .. } if *nation == id))
        });
        for ((s, _), general) in state.generals.iter_mut() {
            if *s == session && general.nation == id {
                general.nation = 0;
                general.officer_level = 0;
            }
        }
        Ok(())
    }

    async fn city(&self, session: SessionId, id: CityId) -> Result<Option<City>, EngineError> {
        Ok(self.state()?.cities.get(&(session, id)).cloned())
    }

    async fn cities(&self, session: SessionId) -> Result<Vec<City>, EngineError> {
        let state = self.state()?;
        Ok(state
            .cities
            .range((session, CityId::MIN)..=(session, CityId::MAX))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn save_city(&self, session: SessionId, city: &City) -> Result<(), EngineError> {
        self.state()?.cities.insert((session, city.id), city.clone());
        Ok(())
    }

    async fn events_for(
        &self,
        session: SessionId,
        target: EventTarget,
    ) -> Result<Vec<EventRecord>, EngineError> {
        let state = self.state()?;
        let mut events: Vec<EventRecord> = state
            .events
            .range((session, EventId::MIN)..=(session, EventId::MAX))
            .map(|(_, e)| e)
            .filter(|e| e.target == target)
            .cloned()
            .collect();
        events.sort_by_key(|e| (Reverse(e.priority), e.id));
        Ok(events)
    }

    async fn save_event(&self, session: SessionId, event: &EventRecord) -> Result<(), EngineError> {
        self.state()?.events.insert((session, event.id), event.clone());
        Ok(())
    }

    async fn remove_event(&self, session: SessionId, id: EventId) -> Result<(), EngineError> {
        self.state()?.events.remove(&(session, id));
        Ok(())
    }

    async fn append_logs(&self, session: SessionId, entries: &[LogEntry]) -> Result<(), EngineError> {
        let mut state = self.state()?;
        if state.reject_logs {
            return Err(EngineError::Unavailable("log writes rejected".to_string()));
        }
        state
            .logs
            .extend(entries.iter().map(|entry| (session, entry.clone())));
        Ok(())
    }

    async fn logs(&self, session: SessionId) -> Result<Vec<LogEntry>, EngineError> {
        Ok(self
            .state()?
            .logs
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn age_generals(&self, session: SessionId, years: i16) -> Result<(), EngineError> {
        let mut state = self.state()?;
        for ((s, _), general) in state.generals.iter_mut() {
            if *s == session {
                general.age = general.age.saturating_add(years);
            }
        }
        Ok(())
    }

    async fn decay_strategic_limits(&self, session: SessionId) -> Result<(), EngineError> {
        let mut state = self.state()?;
        for ((s, _), nation) in state.nations.iter_mut() {
            if *s == session && nation.strategic_limit > 0 {
                nation.strategic_limit -= 1;
            }
        }
        Ok(())
    }
}
