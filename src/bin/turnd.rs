use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use turn_engine::command::CommandRegistry;
use turn_engine::config::{EngineConfig, SchedulerConfig};
use turn_engine::db::{PgLockProvider, PgStore, migrate};
use turn_engine::engine::TurnEngine;
use turn_engine::error::EngineError;
use turn_engine::scheduler::SessionScheduler;

#[derive(Parser, Debug)]
#[command(author, version, about = "Turn execution daemon", long_about = None)]
struct Args {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Apply the schema before starting
    #[arg(long)]
    migrate: bool,

    /// Execute one session once, print the result as JSON and exit
    #[arg(long)]
    once: Option<i64>,

    /// Sessions executing concurrently in this process
    #[arg(long, env = "TURND_MAX_SESSIONS", default_value_t = 4)]
    max_sessions: usize,

    /// Seconds between polls for due sessions (also the retry delay)
    #[arg(long, env = "TURND_POLL_SECS", default_value_t = 5)]
    poll_secs: u64,

    /// Upper bound of the random delay added to each timer (milliseconds)
    #[arg(long, env = "TURND_JITTER_MS", default_value_t = 500)]
    jitter_ms: u64,

    /// Session lock TTL (seconds); must exceed the execution budget
    #[arg(long, env = "TURND_LOCK_TTL_SECS", default_value_t = 60)]
    lock_ttl_secs: u64,

    /// Wall-clock budget for one execution (seconds)
    #[arg(long, env = "TURND_BUDGET_SECS", default_value_t = 50)]
    budget_secs: u64,

    /// Maximum Postgres connections
    #[arg(long, env = "TURND_DB_CONNECTIONS", default_value_t = 8)]
    db_connections: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!(%err, "turnd exited with an error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), EngineError> {
    let pool = PgPoolOptions::new()
        .max_connections(args.db_connections)
        .connect(&args.database_url)
        .await?;
    if args.migrate {
        migrate(&pool).await?;
    }

    let engine_config = EngineConfig::new(
        Duration::from_secs(args.lock_ttl_secs),
        Duration::from_secs(args.budget_secs),
    );
    let engine = TurnEngine::new(
        PgStore::new(pool.clone()),
        PgLockProvider::new(pool),
        CommandRegistry::with_builtins(),
        engine_config,
    )?;

    if let Some(session) = args.once {
        let outcome = engine.execute(session).await?;
        println!("{}", serde_json::to_string(&outcome.report())?);
        return Ok(());
    }

    let scheduler_config = SchedulerConfig::new(args.max_sessions, Duration::from_secs(args.poll_secs))
        .with_jitter(Duration::from_millis(args.jitter_ms));
    let scheduler = SessionScheduler::new(Arc::new(engine), scheduler_config)?;
    scheduler.start();
    info!(max_sessions = args.max_sessions, "turnd ready");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to wait for shutdown signal");
    }
    info!("shutting down");
    scheduler.stop();
    Ok(())
}
