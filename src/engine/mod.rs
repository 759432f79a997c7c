//! The execution loop: advances one session from its stored `turntime` up
//! to "now", one turn boundary at a time, under the session lock.

mod dispatch;
mod general;
mod month;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{SystemTime, TimeSource, advance, truncate_to_turn};
use crate::command::CommandRegistry;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::lock::{LockProvider, TurnLock};
use crate::model::{Session, SessionId};
use crate::scheduler::{DueSession, SessionRunner};
use crate::store::WorldStore;

/// Result of one [`TurnEngine::execute`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    /// `now` is still before the session's `turntime`.
    NotDue {
        turntime: DateTime<Utc>,
        next_due: Option<DateTime<Utc>>,
    },
    /// Another invocation holds the session lock.
    Busy,
    /// The session is unified or closed.
    Frozen,
    Executed(TurnReport),
}

impl ExecuteOutcome {
    /// True if any general or month was processed.
    pub fn executed(&self) -> bool {
        matches!(self, ExecuteOutcome::Executed(r) if r.generals > 0 || r.months > 0)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, ExecuteOutcome::Busy)
    }

    /// The session's `turntime` as of the end of the call, when known.
    pub fn turntime(&self) -> Option<DateTime<Utc>> {
        match self {
            ExecuteOutcome::NotDue { turntime, .. } => Some(*turntime),
            ExecuteOutcome::Executed(report) => Some(report.turntime),
            ExecuteOutcome::Busy | ExecuteOutcome::Frozen => None,
        }
    }

    /// When the session next has work, or `None` if it never will.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        match self {
            ExecuteOutcome::NotDue { next_due, .. } => *next_due,
            ExecuteOutcome::Executed(report) => report.next_due,
            ExecuteOutcome::Busy | ExecuteOutcome::Frozen => None,
        }
    }

    pub fn report(&self) -> ExecuteReport {
        ExecuteReport {
            executed: self.executed(),
            turntime: self.turntime(),
            busy: self.is_busy(),
        }
    }
}

/// What was processed in one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub turntime: DateTime<Utc>,
    pub next_due: Option<DateTime<Utc>>,
    /// General turns processed.
    pub generals: usize,
    /// Month boundaries crossed.
    pub months: u32,
    /// Stopped early because the wall-clock budget ran out.
    pub budget_exhausted: bool,
}

/// Flat summary for callers that only need the headline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecuteReport {
    pub executed: bool,
    pub turntime: Option<DateTime<Utc>>,
    pub busy: bool,
}

#[derive(Debug, Default)]
struct Progress {
    generals: usize,
    months: u32,
    budget_exhausted: bool,
}

/// Advances sessions. Holds no per-session state between calls.
pub struct TurnEngine<S, L> {
    store: S,
    lock: TurnLock<L>,
    registry: CommandRegistry,
    time: Arc<dyn TimeSource>,
    config: EngineConfig,
}

impl<S: WorldStore, L: LockProvider> TurnEngine<S, L> {
    pub fn new(
        store: S,
        provider: L,
        registry: CommandRegistry,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            store,
            lock: TurnLock::new(provider, config.lock_ttl),
            registry,
            time: Arc::new(SystemTime),
            config,
        })
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn lock(&self) -> &TurnLock<L> {
        &self.lock
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Run every turn of `session` that is due, within the execution budget.
    ///
    /// The session lock is released before returning, whether or not the
    /// run succeeded.
    pub async fn execute(&self, session: SessionId) -> Result<ExecuteOutcome, EngineError> {
        let Some(token) = self.lock.try_acquire(session).await? else {
            return Ok(ExecuteOutcome::Busy);
        };
        let result = self.run_locked(session).await;
        if let Err(err) = self.lock.release(token).await {
            tracing::error!(session, %err, "failed to release turn lock");
        }
        if let Err(err) = &result {
            tracing::error!(session, %err, "turn execution failed");
        }
        result
    }

    /// When `session` next has work: the next turn boundary or the earliest
    /// general's `turntime`, whichever comes first. `None` once frozen.
    pub async fn next_due(&self, session: &Session) -> Result<Option<DateTime<Utc>>, EngineError> {
        if session.state.is_frozen() {
            return Ok(None);
        }
        let term = session.turn_term()?;
        let boundary = advance(truncate_to_turn(session.turntime, term), term);
        let earliest = self.store.earliest_general_turntime(session.id).await?;
        let due = earliest.map_or(boundary, |t| t.min(boundary));
        Ok(Some(due.max(session.turntime)))
    }

    async fn run_locked(&self, id: SessionId) -> Result<ExecuteOutcome, EngineError> {
        let mut session = self
            .store
            .session(id)
            .await?
            .ok_or(EngineError::SessionNotFound(id))?;
        let now = self.time.now();
        if now < session.turntime {
            let next_due = self.next_due(&session).await?;
            return Ok(ExecuteOutcome::NotDue {
                turntime: session.turntime,
                next_due,
            });
        }
        if session.state.is_frozen() {
            tracing::debug!(session = id, state = ?session.state, "session frozen");
            return Ok(ExecuteOutcome::Frozen);
        }

        let term = session.turn_term()?;
        let deadline = Instant::now() + self.config.execution_budget;
        let mut progress = Progress::default();
        let mut prev = truncate_to_turn(session.turntime, term);
        let mut next = advance(prev, term);

        while next <= now {
            if Instant::now() >= deadline {
                progress.budget_exhausted = true;
                break;
            }
            if let Some(reached) = self
                .run_generals(&session, next, deadline, &mut progress)
                .await?
            {
                session.turntime = session.turntime.max(reached);
                progress.budget_exhausted = true;
                break;
            }

            month::cross_month(&self.store, &mut session).await?;
            progress.months += 1;
            prev = next;
            next = advance(prev, term);
            session.turntime = session.turntime.max(prev);
            self.store.save_session(&session).await?;
            tracing::debug!(session = id, date = %session.date, turntime = %session.turntime, "month processed");

            if session.state.is_frozen() {
                tracing::info!(session = id, state = ?session.state, "session froze during catch-up");
                break;
            }
        }

        if !progress.budget_exhausted && !session.state.is_frozen() {
            match self
                .run_generals(&session, now, deadline, &mut progress)
                .await?
            {
                Some(reached) => {
                    session.turntime = session.turntime.max(reached);
                    progress.budget_exhausted = true;
                }
                None => session.turntime = session.turntime.max(now),
            }
        }
        self.store.save_session(&session).await?;

        if progress.budget_exhausted {
            tracing::warn!(
                session = id,
                turntime = %session.turntime,
                behind = %(now - session.turntime),
                "execution budget exhausted; resuming next run"
            );
        }
        let next_due = self.next_due(&session).await?;
        tracing::info!(
            session = id,
            generals = progress.generals,
            months = progress.months,
            turntime = %session.turntime,
            "turns executed"
        );
        Ok(ExecuteOutcome::Executed(TurnReport {
            turntime: session.turntime,
            next_due,
            generals: progress.generals,
            months: progress.months,
            budget_exhausted: progress.budget_exhausted,
        }))
    }

    /// Process every general whose `turntime` is before `target`, earliest
    /// first. Returns the `turntime` of the first general left unprocessed if
    /// the budget ran out.
    async fn run_generals(
        &self,
        session: &Session,
        target: DateTime<Utc>,
        deadline: Instant,
        progress: &mut Progress,
    ) -> Result<Option<DateTime<Utc>>, EngineError> {
        let env = session.env()?;
        loop {
            let due = self.store.generals_due_before(session.id, target).await?;
            if due.is_empty() {
                return Ok(None);
            }
            for listed in due {
                if Instant::now() >= deadline {
                    return Ok(Some(listed.turntime));
                }
                // Earlier turns in this batch may have changed or removed it.
                let Some(current) = self.store.general(session.id, listed.id).await? else {
                    continue;
                };
                if current.turntime >= target {
                    continue;
                }
                self.process_general(env, current).await?;
                progress.generals += 1;
            }
        }
    }
}

impl<S, L> SessionRunner for TurnEngine<S, L>
where
    S: WorldStore + 'static,
    L: LockProvider + 'static,
{
    async fn due_sessions(&self) -> Result<Vec<DueSession>, EngineError> {
        let mut due = Vec::new();
        for session in self.store.active_sessions().await? {
            if self.lock.is_held(session.id).await? {
                tracing::debug!(session = session.id, "skipping locked session");
                continue;
            }
            if let Some(next_due) = self.next_due(&session).await? {
                due.push(DueSession {
                    id: session.id,
                    next_due,
                });
            }
        }
        Ok(due)
    }

    async fn execute(&self, session: SessionId) -> Result<ExecuteOutcome, EngineError> {
        TurnEngine::execute(self, session).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::clock::{GameDate, ManualTime};
    use crate::lock::MemoryLockProvider;
    use crate::model::{General, SessionState};
    use crate::store::MemoryStore;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 - 1_700_000_000 % 3600 + minutes * 60, 0).unwrap()
    }

    fn session(turntime: DateTime<Utc>) -> Session {
        Session {
            id: 1,
            name: "test".to_string(),
            turntime,
            turnterm: 60,
            date: GameDate::new(190, 1),
            state: SessionState::Running,
            killturn: 24,
            hidden_seed: 42,
        }
    }

    fn engine(store: MemoryStore, now: DateTime<Utc>) -> TurnEngine<MemoryStore, MemoryLockProvider> {
        TurnEngine::new(
            store,
            MemoryLockProvider::new(),
            CommandRegistry::with_builtins(),
            EngineConfig::default(),
        )
        .unwrap()
        .with_time_source(Arc::new(ManualTime::new(now)))
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig::new(Duration::from_secs(10), Duration::from_secs(10));
        let err = TurnEngine::new(
            MemoryStore::new(),
            MemoryLockProvider::new(),
            CommandRegistry::new(),
            config,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn missing_session_is_an_error_and_unlocks() {
        let engine = engine(MemoryStore::new(), at(0));
        let err = engine.execute(9).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(9)));
        assert!(!engine.lock().is_held(9).await.unwrap());
    }

    #[tokio::test]
    async fn not_due_before_turntime() {
        let store = MemoryStore::new();
        store.insert_session(session(at(30)));
        let engine = engine(store, at(10));
        let outcome = engine.execute(1).await.unwrap();
        assert!(!outcome.executed());
        assert_eq!(outcome.turntime(), Some(at(30)));
        assert_eq!(outcome.next_due(), Some(at(60)));
    }

    #[tokio::test]
    async fn next_due_prefers_earlier_general() {
        let store = MemoryStore::new();
        store.insert_session(session(at(0)));
        store.insert_general(1, General::new(1, "Zhang Fei", at(25)));
        let engine = engine(store, at(0));
        let s = engine.store().session(1).await.unwrap().unwrap();
        assert_eq!(engine.next_due(&s).await.unwrap(), Some(at(25)));
    }

    #[tokio::test]
    async fn frozen_session_does_nothing() {
        let store = MemoryStore::new();
        let mut s = session(at(0));
        s.state = SessionState::Unified;
        store.insert_session(s);
        let engine = engine(store, at(300));
        assert_eq!(engine.execute(1).await.unwrap(), ExecuteOutcome::Frozen);
        let s = engine.store().session(1).await.unwrap().unwrap();
        assert_eq!(s.turntime, at(0));
        assert_eq!(engine.next_due(&s).await.unwrap(), None);
    }

    #[tokio::test]
    async fn crosses_each_boundary_once() {
        let store = MemoryStore::new();
        store.insert_session(session(at(0)));
        let engine = engine(store, at(0) + TimeDelta::minutes(185));

        let outcome = engine.execute(1).await.unwrap();
        let ExecuteOutcome::Executed(report) = outcome else {
            panic!("expected execution, got {outcome:?}");
        };
        assert_eq!(report.months, 3);
        assert_eq!(report.turntime, at(185));
        let s = engine.store().session(1).await.unwrap().unwrap();
        assert_eq!(s.date, GameDate::new(190, 4));
    }
}
