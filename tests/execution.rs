mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use turn_engine::error::CommandError;
use turn_engine::model::{Control, GameEnv, QueueKey};
use turn_engine::random::RandomSource;
use turn_engine::*;

use common::*;

#[tokio::test]
async fn failed_precondition_consumes_the_turn() {
    let mut scenario = Scenario::starting_at(t0());
    let ronin = scenario
        .general("Zhao Yun")
        .queue(0, "recruit", json!({ "amount": 500 }))
        .queue(1, "train", json!({}))
        .id();
    let store = scenario.build();
    let before = general(&store, ronin).await.unwrap();

    let engine = engine_at(store.clone(), t0() + mins(1));
    let outcome = engine.execute(Scenario::SESSION_ID).await.unwrap();
    assert!(outcome.executed());

    let after = general(&store, ronin).await.unwrap();
    assert_eq!((after.gold, after.rice, after.crew), (before.gold, before.rice, before.crew));
    assert_eq!(after.turntime, t0() + mins(60));
    assert_eq!(after.killturn, 24, "a rejected command still counts as acting");

    let logs = log_texts(&store).await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].starts_with("recruit failed"), "{logs:?}");

    let queue = store.turns(Scenario::SESSION_ID, QueueKey::General(ronin)).await.unwrap();
    assert_eq!(queue.head().action, "train");
    assert!(queue.get(queue.len() - 1).unwrap().is_rest());
}

#[tokio::test]
async fn unknown_action_is_logged_and_skipped() {
    let mut scenario = Scenario::starting_at(t0());
    let id = scenario.general("Pang Tong").queue(0, "teleport", json!({})).id();
    let store = scenario.build();

    let engine = engine_at(store.clone(), t0() + mins(5));
    engine.execute(Scenario::SESSION_ID).await.unwrap();

    assert_eq!(log_texts(&store).await, vec!["unknown command: teleport"]);
    let after = general(&store, id).await.unwrap();
    assert_eq!(after.killturn, 23);
    assert_eq!(after.turntime, t0() + mins(60));
    let queue = store.turns(Scenario::SESSION_ID, QueueKey::General(id)).await.unwrap();
    assert!(queue.head().is_rest());
}

#[tokio::test]
async fn successful_command_persists_every_touched_record() {
    let mut scenario = Scenario::starting_at(t0());
    let nation = scenario.nation("Shu").id();
    let city = scenario.city("Chengdu", nation).id();
    let id = scenario
        .general("Guan Yu")
        .nation(nation)
        .city(city)
        .queue(0, "recruit", json!({ "amount": 1000 }))
        .queue(1, "donate", json!({ "amount": 200 }))
        .id();
    let store = scenario.build();
    let engine = engine_at(store.clone(), t0() + mins(70));

    let outcome = engine.execute(Scenario::SESSION_ID).await.unwrap();
    let ExecuteOutcome::Executed(report) = outcome else {
        panic!("expected execution, got {outcome:?}");
    };
    assert_eq!((report.generals, report.months), (2, 1));

    let after = general(&store, id).await.unwrap();
    // 1000 crew eat 10 rice on the second turn.
    assert_eq!((after.crew, after.gold, after.rice), (1000, 700, 990));
    let city = store.city(Scenario::SESSION_ID, city).await.unwrap().unwrap();
    assert_eq!(city.population, 99_000);
    let nation = store.nation(Scenario::SESSION_ID, nation).await.unwrap().unwrap();
    assert_eq!(nation.gold, 10_200);
}

#[tokio::test]
async fn each_general_acts_once_per_boundary() {
    let mut scenario = Scenario::starting_at(t0());
    let id = scenario
        .general("Sima Yi")
        .turntime(t0() + mins(30))
        .queue(0, "a0", json!({}))
        .queue(1, "a1", json!({}))
        .queue(2, "a2", json!({}))
        .id();
    let store = scenario.build();

    let engine = engine_at(store.clone(), t0() + mins(150));
    let outcome = engine.execute(Scenario::SESSION_ID).await.unwrap();
    let ExecuteOutcome::Executed(report) = outcome else {
        panic!("expected execution, got {outcome:?}");
    };
    assert_eq!(report.generals, 2);
    assert_eq!(report.months, 2);
    assert_eq!(report.turntime, t0() + mins(150));
    assert_eq!(
        log_texts(&store).await,
        vec!["unknown command: a0", "unknown command: a1"]
    );
    assert_eq!(general(&store, id).await.unwrap().turntime, t0() + mins(150));
    assert_eq!(report.next_due, Some(t0() + mins(150)));
}

#[tokio::test]
async fn generals_run_in_turntime_order() {
    let mut scenario = Scenario::starting_at(t0());
    let late = scenario.general("Late").turntime(t0() + mins(20)).queue(0, "late", json!({})).id();
    let early = scenario.general("Early").turntime(t0() + mins(10)).queue(0, "early", json!({})).id();
    let store = scenario.build();
    assert!(early > late);

    engine_at(store.clone(), t0() + mins(40)).execute(1).await.unwrap();
    assert_eq!(
        log_texts(&store).await,
        vec!["unknown command: early", "unknown command: late"]
    );
}

#[tokio::test]
async fn month_rolls_over_the_year() {
    let mut scenario = Scenario::starting_at(t0()).date(190, 12);
    let id = scenario.general("Huang Zhong").age(59).id();
    let store = scenario.build();

    engine_at(store.clone(), t0() + mins(61)).execute(1).await.unwrap();
    let s = session(&store).await;
    assert_eq!(s.date, GameDate::new(191, 1));
    assert_eq!(s.turntime, t0() + mins(61));
    assert_eq!(general(&store, id).await.unwrap().age, 60);
}

#[tokio::test]
async fn chief_runs_the_nation_queue() {
    let mut scenario = Scenario::starting_at(t0());
    let nation = scenario
        .nation("Wu")
        .queue(12, 0, "buy_rice", json!({ "amount": 1000 }))
        .queue(12, 1, "teleport", json!({}))
        .id();
    let city = scenario.city("Jianye", nation).id();
    scenario.general("Sun Quan").nation(nation).city(city).officer_level(12).id();
    let store = scenario.build();

    engine_at(store.clone(), t0() + mins(1)).execute(1).await.unwrap();

    let after = store.nation(1, nation).await.unwrap().unwrap();
    assert_eq!((after.gold, after.rice), (8_900, 11_000));
    let key = QueueKey::Nation { nation, officer_level: 12 };
    let queue = store.turns(1, key).await.unwrap();
    assert_eq!(queue.head().action, "teleport");
    assert_eq!(queue.len(), turn_engine::model::MAX_CHIEF_TURN);
}

#[tokio::test]
async fn blocked_general_loses_the_turn() {
    let mut scenario = Scenario::starting_at(t0());
    let id = scenario
        .general("Ma Su")
        .block(2)
        .gold(300)
        .queue(0, "train", json!({}))
        .id();
    let store = scenario.build();

    engine_at(store.clone(), t0() + mins(1)).execute(1).await.unwrap();
    let after = general(&store, id).await.unwrap();
    assert_eq!(after.killturn, 23);
    assert_eq!(after.turntime, t0() + mins(60));
    let queue = store.turns(1, QueueKey::General(id)).await.unwrap();
    assert!(queue.head().is_rest(), "blocked turns still rotate the queue");
    assert!(log_texts(&store).await[0].contains("blocked"));
}

#[tokio::test]
async fn idle_players_leave_or_hand_over() {
    let mut scenario = Scenario::starting_at(t0());
    let (nation, city, _) = scenario.add_kingdom("Shu");
    let loyal = scenario.general("Wei Yan").nation(nation).city(city).killturn(1).id();
    let drifter = scenario.general("Drifter").killturn(1).id();
    let store = scenario.build();

    engine_at(store.clone(), t0() + mins(1)).execute(1).await.unwrap();

    assert!(general(&store, drifter).await.is_none());
    let loyal = general(&store, loyal).await.unwrap();
    assert_eq!(loyal.control, Control::Npc);
    assert_eq!(loyal.killturn, 24);
    assert_eq!(loyal.turntime, t0() + mins(60));
    assert!(log_texts(&store).await.iter().any(|l| l == "Drifter has left the world"));
}

#[tokio::test]
async fn not_due_is_a_no_op() {
    let scenario = Scenario::starting_at(t0() + mins(30));
    let store = scenario.build();
    let outcome = engine_at(store.clone(), t0() + mins(10)).execute(1).await.unwrap();

    assert_eq!(
        outcome.report(),
        ExecuteReport { executed: false, turntime: Some(t0() + mins(30)), busy: false }
    );
    assert!(store.turntime_writes(1).is_empty());
}

#[tokio::test]
async fn held_lock_reports_busy() {
    let mut scenario = Scenario::starting_at(t0());
    let id = scenario.general("Jiang Wei").id();
    let store = scenario.build();
    let engine = engine_at(store.clone(), t0() + mins(90));

    let token = engine.lock().try_acquire(1).await.unwrap().unwrap();
    let outcome = engine.execute(1).await.unwrap();
    assert!(outcome.is_busy());
    assert!(outcome.report().busy);
    assert_eq!(general(&store, id).await.unwrap().turntime, t0());
    assert!(store.turntime_writes(1).is_empty());

    engine.lock().release(token).await.unwrap();
    assert!(engine.execute(1).await.unwrap().executed());
}

#[tokio::test]
async fn stale_lock_is_taken_over() {
    let mut scenario = Scenario::starting_at(t0());
    scenario.general("Deng Ai");
    let store = scenario.build();
    let engine = engine_at(store.clone(), t0() + mins(1));

    engine
        .lock()
        .provider()
        .insert_stale(&TurnLock::<MemoryLockProvider>::key(1), "crashed-worker");
    assert!(engine.execute(1).await.unwrap().executed());
    assert!(!engine.lock().is_held(1).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_execute_once() {
    let mut scenario = Scenario::starting_at(t0());
    let id = scenario.general("Zhuge Liang").id();
    let store = scenario.build();
    let engine = Arc::new(engine_at(store.clone(), t0() + mins(5)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.execute(1).await.unwrap() })
        })
        .collect();
    let mut executed = 0;
    for handle in handles {
        if handle.await.unwrap().executed() {
            executed += 1;
        }
    }

    assert_eq!(executed, 1);
    assert_eq!(general(&store, id).await.unwrap().turntime, t0() + mins(60));
}

#[tokio::test]
async fn store_failure_releases_the_lock() {
    let mut scenario = Scenario::starting_at(t0());
    scenario.general("Xu Shu");
    let store = scenario.build();
    let engine = engine_at(store.clone(), t0() + mins(5));

    store.set_unavailable(true);
    let err = engine.execute(1).await.unwrap_err();
    assert!(matches!(err, EngineError::Unavailable(_)));
    assert!(!engine.lock().is_held(1).await.unwrap());

    store.set_unavailable(false);
    assert!(engine.execute(1).await.unwrap().executed());
}

#[tokio::test]
async fn budget_bounds_a_long_catch_up() {
    let behind = 10_000;
    // Liveness high enough that nobody retires during the catch-up.
    let mut scenario = Scenario::starting_at(t0()).turnterm(1).killturn(1_000_000);
    for n in 0..50 {
        scenario.general(&format!("Soldier {n}"));
    }
    let store = scenario.build();
    let now = t0() + mins(behind);
    let engine = engine_with(
        store.clone(),
        CommandRegistry::with_builtins(),
        tight_budget(Duration::from_millis(50)),
        now,
    );

    let started = Instant::now();
    let outcome = engine.execute(1).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    let ExecuteOutcome::Executed(first) = outcome else {
        panic!("expected execution, got {outcome:?}");
    };
    assert!(first.budget_exhausted);
    assert!(first.turntime > t0() && first.turntime < now);
    assert!(!engine.lock().is_held(1).await.unwrap());

    let ExecuteOutcome::Executed(second) = engine.execute(1).await.unwrap() else {
        panic!("expected a second execution");
    };
    assert!(second.turntime > first.turntime);

    let writes = store.turntime_writes(1);
    assert!(!writes.is_empty());
    assert!(writes.windows(2).all(|w| w[0] <= w[1]), "turntime went backwards");
}

#[tokio::test]
async fn same_seed_same_outcome() {
    async fn run_once() -> i16 {
        let mut scenario = Scenario::starting_at(t0()).hidden_seed(77);
        let id = scenario
            .general("Gan Ning")
            .crew(500)
            .train(10)
            .queue(0, "train", json!({}))
            .queue(1, "train", json!({}))
            .queue(2, "train", json!({}))
            .id();
        let store = scenario.build();
        engine_at(store.clone(), t0() + mins(130)).execute(1).await.unwrap();
        general(&store, id).await.unwrap().train
    }

    let a = run_once().await;
    let b = run_once().await;
    assert_eq!(a, b);
    assert!(a > 10);
}

struct Boom;

impl Boom {
    fn build(_: &CommandSubject, _: &GameEnv, _: &serde_json::Value) -> Box<dyn TurnCommand> {
        Box::new(Boom)
    }
}

impl TurnCommand for Boom {
    fn name(&self) -> &'static str {
        "boom"
    }

    fn has_precondition_met(&self) -> bool {
        true
    }

    fn failure_message(&self) -> String {
        String::new()
    }

    fn run(
        &mut self,
        subject: &mut CommandSubject,
        _: &mut dyn RandomSource,
    ) -> Result<(), CommandError> {
        subject.general.gold = 0;
        panic!("powder keg");
    }
}

#[tokio::test]
async fn panicking_command_is_a_failed_turn() {
    let mut scenario = Scenario::starting_at(t0());
    let id = scenario
        .general("Lu Bu")
        .queue(0, "boom", json!({}))
        .queue(1, "train", json!({}))
        .id();
    let store = scenario.build();
    let mut registry = CommandRegistry::with_builtins();
    registry.register(CommandScope::General, "boom", Boom::build);
    let before = general(&store, id).await.unwrap();
    let engine = engine_with(store.clone(), registry, EngineConfig::default(), t0() + mins(1));

    assert!(engine.execute(1).await.unwrap().executed());
    assert!(!engine.lock().is_held(1).await.unwrap());

    let after = general(&store, id).await.unwrap();
    assert_eq!(after.gold, before.gold, "nothing the handler touched is kept");
    assert_eq!(after.turntime, t0() + mins(60));
    assert_eq!(after.killturn, 24);
    assert_eq!(log_texts(&store).await, vec!["boom failed: command panicked: powder keg"]);
    let queue = store.turns(1, QueueKey::General(id)).await.unwrap();
    assert_eq!(queue.head().action, "train");

    assert!(!engine.execute(1).await.unwrap().is_busy());
}
