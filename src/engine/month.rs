//! Work done when a turn boundary rolls the in-game month.

use crate::clock::roll_month;
use crate::error::EngineError;
use crate::model::{EventTarget, GameEnv, LogEntry, Session, SessionState};
use crate::store::WorldStore;
use crate::trigger::{self, EventContext};

/// Nations at this level are wandering armies and may hold no city.
const WANDERING_LEVEL: i16 = 0;

/// Fire the month lifecycle around the date roll and run housekeeping.
///
/// Updates `session.date` (and `state` on unification) in place; the caller
/// persists the session.
pub(super) async fn cross_month<S: WorldStore>(
    store: &S,
    session: &mut Session,
) -> Result<(), EngineError> {
    let env = session.env()?;
    trigger::fire(store, EventTarget::PreMonth, EventContext::world(env)).await?;
    pre_month(store, env).await?;

    session.date = roll_month(session.date);
    let env = env.with_date(session.date);
    trigger::fire(store, EventTarget::Month, EventContext::world(env)).await?;
    if post_month(store, env).await? {
        session.state = SessionState::Unified;
    }
    Ok(())
}

async fn pre_month<S: WorldStore>(store: &S, env: GameEnv) -> Result<(), EngineError> {
    store.decay_strategic_limits(env.session_id).await
}

/// Returns `true` if one nation now holds every city.
async fn post_month<S: WorldStore>(store: &S, env: GameEnv) -> Result<bool, EngineError> {
    let session = env.session_id;
    if env.date.is_year_start() {
        store.age_generals(session, 1).await?;
    }

    let cities = store.cities(session).await?;
    let mut fallen = Vec::new();
    for nation in store.nations(session).await? {
        if nation.level == WANDERING_LEVEL || cities.iter().any(|c| c.nation == nation.id) {
            continue;
        }
        tracing::info!(session, nation = nation.id, "nation destroyed");
        store.dissolve_nation(session, nation.id).await?;
        store
            .append_logs(
                session,
                &[LogEntry::world(env.date, format!("{} has fallen", nation.name))],
            )
            .await?;
        fallen.push(nation.id);
    }
    for nation in fallen {
        let ctx = EventContext::for_nation(env, nation);
        trigger::fire(store, EventTarget::DestroyNation, ctx).await?;
    }

    let Some(first) = cities.first() else {
        return Ok(false);
    };
    if first.nation == 0 || cities.iter().any(|c| c.nation != first.nation) {
        return Ok(false);
    }
    let Some(winner) = store.nation(session, first.nation).await? else {
        return Ok(false);
    };
    tracing::info!(session, nation = winner.id, "world unified");
    store
        .append_logs(
            session,
            &[LogEntry::world(
                env.date,
                format!("{} has unified the land", winner.name),
            )],
        )
        .await?;
    trigger::fire(store, EventTarget::United, EventContext::for_nation(env, winner.id)).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::clock::GameDate;
    use crate::model::{City, General, Nation};
    use crate::store::MemoryStore;

    fn session(date: GameDate) -> Session {
        Session {
            id: 1,
            name: "test".to_string(),
            turntime: DateTime::from_timestamp(0, 0).unwrap(),
            turnterm: 60,
            date,
            state: SessionState::Running,
            killturn: 24,
            hidden_seed: 0,
        }
    }

    #[tokio::test]
    async fn december_rolls_into_new_year_and_ages() {
        let store = MemoryStore::new();
        store.insert_general(1, General::new(1, "Huang Zhong", DateTime::from_timestamp(0, 0).unwrap()));
        let mut s = session(GameDate::new(190, 12));

        cross_month(&store, &mut s).await.unwrap();
        assert_eq!(s.date, GameDate::new(191, 1));
        assert_eq!(store.general(1, 1).await.unwrap().unwrap().age, 21);
    }

    #[tokio::test]
    async fn strategic_limits_decay() {
        let store = MemoryStore::new();
        let mut nation = Nation::new(1, "Wu");
        nation.strategic_limit = 2;
        store.insert_nation(1, nation);
        store.insert_city(1, City::new(10, "Jianye", 1));
        store.insert_city(1, City::new(11, "Xiangyang", 0));

        let mut s = session(GameDate::new(190, 3));
        cross_month(&store, &mut s).await.unwrap();
        assert_eq!(store.nation(1, 1).await.unwrap().unwrap().strategic_limit, 1);
        assert_eq!(s.state, SessionState::Running);
    }

    #[tokio::test]
    async fn cityless_nation_falls_but_wanderers_survive() {
        let store = MemoryStore::new();
        store.insert_nation(1, Nation::new(1, "Yuan"));
        let mut wanderer = Nation::new(2, "Lu Bu's band");
        wanderer.level = WANDERING_LEVEL;
        store.insert_nation(1, wanderer);
        store.insert_city(1, City::new(10, "Ye", 0));

        let mut s = session(GameDate::new(190, 3));
        cross_month(&store, &mut s).await.unwrap();
        assert!(store.nation(1, 1).await.unwrap().is_none());
        assert!(store.nation(1, 2).await.unwrap().is_some());
        let logs = store.logs(1).await.unwrap();
        assert!(logs.iter().any(|l| l.text == "Yuan has fallen"));
    }

    #[tokio::test]
    async fn single_owner_unifies() {
        let store = MemoryStore::new();
        store.insert_nation(1, Nation::new(1, "Jin"));
        store.insert_nation(1, Nation::new(2, "Wu"));
        store.insert_city(1, City::new(10, "Luoyang", 1));
        store.insert_city(1, City::new(11, "Jianye", 1));

        let mut s = session(GameDate::new(280, 3));
        cross_month(&store, &mut s).await.unwrap();
        assert_eq!(s.state, SessionState::Unified);
        assert!(store.nation(1, 2).await.unwrap().is_none());
    }
}
