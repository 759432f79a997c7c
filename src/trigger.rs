//! Runs the stored event scripts bound to a lifecycle target.
//!
//! A `raise` action queues another target; queued targets run after the
//! current one finishes, breadth-first, in the order they were raised.

use std::collections::VecDeque;

use crate::error::EngineError;
use crate::model::{
    CityId, ConditionFacts, EventAction, EventRecord, EventTarget, GameEnv, GeneralId, LogEntry,
    NationId, Resource, SessionId,
};
use crate::store::WorldStore;

/// Share of a city's commerce (or agriculture) paid out as income.
const INCOME_DIVISOR: i32 = 10;
/// Semi-annual development decay, in percent.
const SEMI_ANNUAL_DECAY_PERCENT: i32 = 1;

/// Who and where an event fires for. World-level events leave every id unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    pub env: GameEnv,
    pub general: Option<GeneralId>,
    pub nation: Option<NationId>,
    pub city: Option<CityId>,
}

impl EventContext {
    pub fn world(env: GameEnv) -> Self {
        Self {
            env,
            general: None,
            nation: None,
            city: None,
        }
    }

    pub fn for_nation(env: GameEnv, nation: NationId) -> Self {
        Self {
            nation: Some(nation),
            ..Self::world(env)
        }
    }
}

/// What one [`fire`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FireReport {
    /// Targets processed, in order, including raised ones.
    pub targets: Vec<EventTarget>,
    pub ran: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Fire `target` and anything its events raise.
///
/// An event whose action fails is logged and skipped; later events still
/// run. Only failures to read the event list itself are returned.
pub async fn fire<S: WorldStore>(
    store: &S,
    target: EventTarget,
    ctx: EventContext,
) -> Result<FireReport, EngineError> {
    let session = ctx.env.session_id;
    let mut report = FireReport::default();
    let mut queue = VecDeque::from([target]);

    while let Some(target) = queue.pop_front() {
        report.targets.push(target);
        let events = store.events_for(session, target).await?;
        if events.is_empty() {
            continue;
        }
        let facts = ConditionFacts {
            date: ctx.env.date,
            nation_count: store.nations(session).await?.len(),
        };

        for event in &events {
            if !event.condition.evaluate(&facts) {
                report.skipped += 1;
                continue;
            }
            match run_actions(store, event, &ctx, &mut queue).await {
                Ok(()) => report.ran += 1,
                Err(err) => {
                    tracing::warn!(session, event = event.id, %target, %err, "event failed");
                    report.failed += 1;
                }
            }
        }
    }

    tracing::debug!(
        session,
        targets = report.targets.len(),
        ran = report.ran,
        failed = report.failed,
        "events fired"
    );
    Ok(report)
}

async fn run_actions<S: WorldStore>(
    store: &S,
    event: &EventRecord,
    ctx: &EventContext,
    queue: &mut VecDeque<EventTarget>,
) -> Result<(), EngineError> {
    let session = ctx.env.session_id;
    for action in &event.actions {
        match action {
            EventAction::Log { text } => {
                let entry = LogEntry::world(ctx.env.date, text.clone());
                store.append_logs(session, &[entry]).await?;
            }
            EventAction::ProcessIncome { resource } => {
                process_income(store, session, *resource).await?;
            }
            EventAction::ProcessSemiAnnual { resource } => {
                process_semi_annual(store, session, *resource).await?;
            }
            EventAction::Raise { target } => queue.push_back(*target),
            EventAction::DeleteSelf => store.remove_event(session, event.id).await?,
        }
    }
    Ok(())
}

/// Every nation collects from the cities it holds.
async fn process_income<S: WorldStore>(
    store: &S,
    session: SessionId,
    resource: Resource,
) -> Result<(), EngineError> {
    let cities = store.cities(session).await?;
    for mut nation in store.nations(session).await? {
        let income: i32 = cities
            .iter()
            .filter(|c| c.nation == nation.id)
            .map(|c| match resource {
                Resource::Gold => c.commerce,
                Resource::Rice => c.agriculture,
            } / INCOME_DIVISOR)
            .sum();
        if income == 0 {
            continue;
        }
        match resource {
            Resource::Gold => nation.gold += income,
            Resource::Rice => nation.rice += income,
        }
        store.save_nation(session, &nation).await?;
    }
    Ok(())
}

async fn process_semi_annual<S: WorldStore>(
    store: &S,
    session: SessionId,
    resource: Resource,
) -> Result<(), EngineError> {
    for mut city in store.cities(session).await? {
        let value = match resource {
            Resource::Gold => &mut city.commerce,
            Resource::Rice => &mut city.agriculture,
        };
        *value -= *value * SEMI_ANNUAL_DECAY_PERCENT / 100;
        store.save_city(session, &city).await?;
    }
    Ok(())
}
