//! One general's turn: upkeep, queued actions, queue rotation, liveness and
//! the `turntime` advance.

use crate::command::CommandScope;
use crate::error::EngineError;
use crate::lock::LockProvider;
use crate::model::{Control, GameEnv, General, LogEntry, QueueKey};
use crate::random::SeededRandom;
use crate::store::WorldStore;

use super::TurnEngine;
use super::dispatch::Dispatched;

/// Rice eaten per hundred soldiers each turn.
const RICE_PER_HUNDRED_CREW: i32 = 1;

impl<S: WorldStore, L: LockProvider> TurnEngine<S, L> {
    pub(super) async fn process_general(
        &self,
        env: GameEnv,
        mut general: General,
    ) -> Result<(), EngineError> {
        let session = env.session_id;
        let mut logs = Vec::new();
        let mut rng = SeededRandom::for_turn(env.hidden_seed, general.id, env.date);

        upkeep(&mut general, env, &mut logs);

        // Captured before dispatch: a command may change rank or nation.
        let nation_queue = general.holds_chief_slot().then_some(QueueKey::Nation {
            nation: general.nation,
            officer_level: general.officer_level,
        });
        let general_queue = QueueKey::General(general.id);

        let acted = if general.is_blocked() {
            tracing::debug!(session, general = general.id, block = general.block, "turn blocked");
            logs.push(LogEntry::general(
                general.id,
                env.date,
                format!("turn skipped: blocked (level {})", general.block),
            ));
            Dispatched::Rested
        } else {
            if let Some(key) = nation_queue {
                let slot = self.store.turns(session, key).await?.head();
                let (updated, _) = self
                    .dispatch(CommandScope::Nation, env, general, &slot, &mut rng, &mut logs)
                    .await?;
                general = updated;
            }
            let slot = self.store.turns(session, general_queue).await?.head();
            let (updated, outcome) = self
                .dispatch(CommandScope::General, env, general, &slot, &mut rng, &mut logs)
                .await?;
            general = updated;
            outcome
        };

        if let Some(key) = nation_queue {
            self.store.rotate_turns(session, key, 1).await?;
        }
        self.store.rotate_turns(session, general_queue, 1).await?;

        update_killturn(&mut general, env, acted);
        if general.killturn <= 0 {
            return self.retire(env, general, logs).await;
        }

        general.turntime += env.turn_term.as_delta();
        self.store.save_general(session, &general).await?;
        self.store.append_logs(session, &logs).await?;
        Ok(())
    }

    /// A general whose liveness ran out. Players still serving a nation are
    /// handed to the AI; everyone else leaves the world.
    async fn retire(
        &self,
        env: GameEnv,
        mut general: General,
        mut logs: Vec<LogEntry>,
    ) -> Result<(), EngineError> {
        let session = env.session_id;
        if general.control == Control::Player && general.nation != 0 {
            tracing::info!(session, general = general.id, "idle player handed to the AI");
            general.control = Control::Npc;
            general.killturn = env.killturn;
            general.turntime += env.turn_term.as_delta();
            logs.push(LogEntry::general(
                general.id,
                env.date,
                "left idle too long; now commanded by the AI",
            ));
            self.store.save_general(session, &general).await?;
        } else {
            tracing::info!(session, general = general.id, "general removed");
            self.store.remove_general(session, general.id).await?;
            logs.push(LogEntry::world(
                env.date,
                format!("{} has left the world", general.name),
            ));
        }
        self.store.append_logs(session, &logs).await
    }
}

/// Per-turn costs applied before any action: injuries heal one step and
/// the troops eat. Unfed troops desert.
fn upkeep(general: &mut General, env: GameEnv, logs: &mut Vec<LogEntry>) {
    if general.injury > 0 {
        general.injury -= 1;
    }
    if general.crew <= 0 {
        return;
    }
    let ration = (general.crew + 99) / 100 * RICE_PER_HUNDRED_CREW;
    if general.rice >= ration {
        general.rice -= ration;
    } else {
        logs.push(LogEntry::general(
            general.id,
            env.date,
            format!("{} soldiers deserted for lack of rice", general.crew),
        ));
        general.crew = 0;
        general.train = 0;
    }
}

/// Players reset to the session's budget whenever they act; resting (or an
/// action nobody knows) costs one. AI generals always count down.
fn update_killturn(general: &mut General, env: GameEnv, acted: Dispatched) {
    match (general.control, acted) {
        (Control::Player, Dispatched::Completed | Dispatched::Rejected | Dispatched::Failed) => {
            general.killturn = env.killturn;
        }
        _ => general.killturn -= 1,
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::clock::{GameDate, TurnTerm};

    fn env() -> GameEnv {
        GameEnv {
            session_id: 1,
            date: GameDate::new(190, 1),
            turn_term: TurnTerm::from_minutes(60).unwrap(),
            killturn: 24,
            hidden_seed: 0,
        }
    }

    fn general() -> General {
        General::new(1, "Zhao Yun", DateTime::from_timestamp(0, 0).unwrap())
    }

    #[test]
    fn upkeep_feeds_troops() {
        let mut g = general();
        g.crew = 250;
        g.injury = 2;
        let mut logs = Vec::new();
        upkeep(&mut g, env(), &mut logs);
        assert_eq!(g.rice, 997);
        assert_eq!(g.injury, 1);
        assert!(logs.is_empty());
    }

    #[test]
    fn unfed_troops_desert() {
        let mut g = general();
        g.crew = 500;
        g.train = 70;
        g.rice = 2;
        let mut logs = Vec::new();
        upkeep(&mut g, env(), &mut logs);
        assert_eq!((g.crew, g.train, g.rice), (0, 0, 2));
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn no_crew_costs_nothing() {
        let mut g = general();
        let before = g.clone();
        upkeep(&mut g, env(), &mut Vec::new());
        assert_eq!(g, before);
    }

    #[test]
    fn player_liveness() {
        let mut g = general();
        g.killturn = 5;
        update_killturn(&mut g, env(), Dispatched::Rested);
        assert_eq!(g.killturn, 4);
        update_killturn(&mut g, env(), Dispatched::Unknown);
        assert_eq!(g.killturn, 3);
        update_killturn(&mut g, env(), Dispatched::Rejected);
        assert_eq!(g.killturn, 24);
    }

    #[test]
    fn npc_always_counts_down() {
        let mut g = general();
        g.control = Control::Npc;
        g.killturn = 5;
        update_killturn(&mut g, env(), Dispatched::Completed);
        assert_eq!(g.killturn, 4);
    }
}
