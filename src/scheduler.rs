//! Per-process timer loop that keeps every active session executing close to
//! its due time, with at most `max_concurrent_sessions` running at once.
//!
//! Sessions past the cap wait in a FIFO queue. Cross-process exclusion is
//! left to the session lock; this only avoids double-starting a session
//! inside one process.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::engine::ExecuteOutcome;
use crate::error::EngineError;
use crate::model::SessionId;

/// A session with work at `next_due`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueSession {
    pub id: SessionId,
    pub next_due: DateTime<Utc>,
}

/// What the scheduler drives. Implemented by [`TurnEngine`](crate::engine::TurnEngine).
pub trait SessionRunner: Send + Sync + 'static {
    /// Active sessions that are not locked elsewhere, with their next due time.
    fn due_sessions(&self) -> impl Future<Output = Result<Vec<DueSession>, EngineError>> + Send;

    fn execute(
        &self,
        session: SessionId,
    ) -> impl Future<Output = Result<ExecuteOutcome, EngineError>> + Send;
}

/// Where a session currently sits in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Armed,
    Pending,
    Running,
}

struct ArmedTimer {
    next_run: DateTime<Utc>,
    seq: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    /// Bumped by `stop`; work started under an older epoch is ignored.
    epoch: u64,
    next_seq: u64,
    timers: HashMap<SessionId, ArmedTimer>,
    running: HashSet<SessionId>,
    pending: VecDeque<SessionId>,
    poller: Option<JoinHandle<()>>,
}

struct Shared<R> {
    runner: Arc<R>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

/// Cheap to clone; clones drive the same timers.
pub struct SessionScheduler<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for SessionScheduler<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: SessionRunner> SessionScheduler<R> {
    pub fn new(runner: Arc<R>, config: SchedulerConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                runner,
                config,
                state: Mutex::new(SchedulerState::default()),
            }),
        })
    }

    /// Begin polling for due sessions every `poll_interval`. Idempotent.
    pub fn start(&self) {
        let mut state = self.shared.lock();
        if state.poller.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let period = self.shared.config.poll_interval;
        state.poller = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(err) = shared.poll().await {
                    tracing::warn!(%err, "session poll failed");
                }
            }
        }));
        tracing::info!(
            max_concurrent = self.shared.config.max_concurrent_sessions,
            poll_interval = ?period,
            "scheduler started"
        );
    }

    /// Cancel every timer, drop queued sessions and stop polling.
    ///
    /// Executions already running finish on their own; their results are
    /// discarded.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        state.epoch += 1;
        if let Some(poller) = state.poller.take() {
            poller.abort();
        }
        for (_, timer) in state.timers.drain() {
            timer.handle.abort();
        }
        let dropped = state.pending.len();
        state.pending.clear();
        state.running.clear();
        tracing::info!(dropped, "scheduler stopped");
    }

    /// Read due sessions once and arm their timers. Returns how many were
    /// (re-)armed.
    pub async fn poll_once(&self) -> Result<usize, EngineError> {
        self.shared.poll().await
    }

    /// Run `session` as soon as a slot is free, ignoring its timer.
    pub fn trigger(&self, session: SessionId) {
        let mut state = self.shared.lock();
        if let Some(timer) = state.timers.remove(&session) {
            timer.handle.abort();
        }
        self.shared.admit(&mut state, session);
    }

    pub fn status(&self, session: SessionId) -> Option<SlotState> {
        let state = self.shared.lock();
        if state.running.contains(&session) {
            Some(SlotState::Running)
        } else if state.pending.contains(&session) {
            Some(SlotState::Pending)
        } else if state.timers.contains_key(&session) {
            Some(SlotState::Armed)
        } else {
            None
        }
    }

    pub fn running_count(&self) -> usize {
        self.shared.lock().running.len()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn armed_count(&self) -> usize {
        self.shared.lock().timers.len()
    }
}

impl<R: SessionRunner> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn poll(self: &Arc<Self>) -> Result<usize, EngineError> {
        let due = self.runner.due_sessions().await?;
        let mut state = self.lock();
        let armed = due
            .into_iter()
            .filter(|d| self.arm(&mut state, d.id, d.next_due))
            .count();
        tracing::debug!(armed, "sessions polled");
        Ok(armed)
    }

    /// Set the session's timer to fire at `at` plus jitter. Sessions already
    /// running or queued, and timers already set for `at`, are left alone.
    fn arm(self: &Arc<Self>, state: &mut SchedulerState, id: SessionId, at: DateTime<Utc>) -> bool {
        if state.running.contains(&id) || state.pending.contains(&id) {
            return false;
        }
        if state.timers.get(&id).is_some_and(|t| t.next_run == at) {
            return false;
        }
        if let Some(old) = state.timers.remove(&id) {
            old.handle.abort();
        }

        let delay = (at - Utc::now()).to_std().unwrap_or_default() + self.jitter();
        let seq = state.next_seq;
        state.next_seq += 1;
        let epoch = state.epoch;
        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire(id, seq, epoch);
        });
        state.timers.insert(
            id,
            ArmedTimer {
                next_run: at,
                seq,
                handle,
            },
        );
        tracing::trace!(session = id, %at, ?delay, "timer armed");
        true
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.config.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    fn fire(self: &Arc<Self>, id: SessionId, seq: u64, epoch: u64) {
        let mut state = self.lock();
        if state.epoch != epoch || state.timers.get(&id).is_none_or(|t| t.seq != seq) {
            return;
        }
        state.timers.remove(&id);
        self.admit(&mut state, id);
    }

    /// Start `id` if under the cap, otherwise queue it.
    fn admit(self: &Arc<Self>, state: &mut SchedulerState, id: SessionId) {
        if state.running.contains(&id) || state.pending.contains(&id) {
            return;
        }
        if state.running.len() < self.config.max_concurrent_sessions {
            self.launch(state, id);
        } else {
            tracing::debug!(session = id, queued = state.pending.len() + 1, "at capacity; queued");
            state.pending.push_back(id);
        }
    }

    fn launch(self: &Arc<Self>, state: &mut SchedulerState, id: SessionId) {
        state.running.insert(id);
        let epoch = state.epoch;
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            // Run in its own task so a panic still reaches `finish`.
            let runner = Arc::clone(&shared.runner);
            let result = match tokio::spawn(async move { runner.execute(id).await }).await {
                Ok(result) => result,
                Err(err) => Err(EngineError::TaskAborted(err.to_string())),
            };
            shared.finish(id, epoch, result);
        });
    }

    fn finish(self: &Arc<Self>, id: SessionId, epoch: u64, result: Result<ExecuteOutcome, EngineError>) {
        let mut state = self.lock();
        if state.epoch != epoch {
            return;
        }
        state.running.remove(&id);

        let retry = Utc::now() + TimeDelta::from_std(self.config.poll_interval).unwrap_or(TimeDelta::seconds(5));
        let next = match result {
            Ok(ExecuteOutcome::Busy) => {
                tracing::debug!(session = id, "session busy elsewhere; retrying");
                Some(retry)
            }
            Ok(ExecuteOutcome::Frozen) => None,
            Ok(outcome) => outcome.next_due(),
            Err(err) => {
                tracing::warn!(session = id, %err, "session execution failed; retrying");
                Some(retry)
            }
        };
        if let Some(at) = next {
            self.arm(&mut state, id, at);
        }

        while state.running.len() < self.config.max_concurrent_sessions {
            let Some(queued) = state.pending.pop_front() else {
                break;
            };
            self.launch(&mut state, queued);
        }
    }
}
