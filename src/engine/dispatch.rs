use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::command::{CommandScope, CommandSubject};
use crate::error::{CommandError, EngineError};
use crate::lock::LockProvider;
use crate::model::{GameEnv, General, LogEntry, TurnSlot};
use crate::random::SeededRandom;
use crate::store::WorldStore;
use crate::trigger::{self, EventContext};

use super::TurnEngine;

/// How a queued action went. Only the general queue's result feeds
/// liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Dispatched {
    Completed,
    Rested,
    /// No handler is registered under the action's name.
    Unknown,
    /// The handler's precondition did not hold.
    Rejected,
    /// The handler returned an error; nothing it changed was kept.
    Failed,
}

impl<S: WorldStore, L: LockProvider> TurnEngine<S, L> {
    /// Run the action in `slot` for `general` and persist what it changed.
    ///
    /// Returns the general as it should continue through the turn: the
    /// handler's copy on success, the original otherwise.
    pub(super) async fn dispatch(
        &self,
        scope: CommandScope,
        env: GameEnv,
        general: General,
        slot: &TurnSlot,
        rng: &mut SeededRandom,
        logs: &mut Vec<LogEntry>,
    ) -> Result<(General, Dispatched), EngineError> {
        let session = env.session_id;
        let action = slot.action.as_str();

        let nation = match general.nation {
            0 => None,
            id => self.store.nation(session, id).await?,
        };
        let city = match general.city {
            0 => None,
            id => self.store.city(session, id).await?,
        };
        let subject = CommandSubject::new(general, nation, city);

        let Some(mut command) = self
            .registry
            .build(scope, action, &subject, &env, &slot.args)
        else {
            if slot.is_rest() {
                return Ok((subject.general, Dispatched::Rested));
            }
            tracing::warn!(session, general = subject.general.id, %scope, action, "unknown command");
            logs.push(LogEntry::general(
                subject.general.id,
                env.date,
                format!("unknown command: {action}"),
            ));
            return Ok((subject.general, Dispatched::Unknown));
        };

        if !command.has_precondition_met() {
            let reason = command.failure_message();
            tracing::info!(session, general = subject.general.id, %scope, action, %reason, "precondition failed");
            logs.push(LogEntry::general(
                subject.general.id,
                env.date,
                format!("{action} failed: {reason}"),
            ));
            return Ok((subject.general, Dispatched::Rejected));
        }

        let mut draft = subject.clone();
        // A panicking handler is a failed command, not a dead session.
        let ran = panic::catch_unwind(AssertUnwindSafe(|| command.run(&mut draft, rng)))
            .unwrap_or_else(|payload| Err(CommandError::Panicked(panic_message(payload.as_ref()))));
        if let Err(err) = ran {
            tracing::warn!(session, general = subject.general.id, %scope, action, %err, "command failed");
            logs.push(LogEntry::general(
                subject.general.id,
                env.date,
                format!("{action} failed: {err}"),
            ));
            return Ok((subject.general, Dispatched::Failed));
        }

        let (lines, raised) = draft.take_outputs();
        if let Some(nation) = &draft.nation {
            self.store.save_nation(session, nation).await?;
        }
        if let Some(city) = &draft.city {
            self.store.save_city(session, city).await?;
        }
        logs.extend(
            lines
                .into_iter()
                .map(|line| LogEntry::general(draft.general.id, env.date, line)),
        );
        for event in raised {
            let ctx = EventContext {
                env,
                general: Some(draft.general.id),
                nation: event.nation,
                city: event.city,
            };
            trigger::fire(&self.store, event.target, ctx).await?;
        }

        let outcome = if slot.is_rest() {
            Dispatched::Rested
        } else {
            Dispatched::Completed
        };
        Ok((draft.general, outcome))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
