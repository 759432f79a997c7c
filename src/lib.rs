pub mod clock;
pub mod command;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod id;
pub mod lock;
pub mod model;
pub mod random;
pub mod scenario;
pub mod scheduler;
pub mod store;
pub mod trigger;

pub use clock::{GameDate, ManualTime, SystemTime, TimeSource, TurnTerm};
pub use command::{CommandRegistry, CommandScope, CommandSubject, TurnCommand};
pub use config::{EngineConfig, SchedulerConfig};
pub use engine::{ExecuteOutcome, ExecuteReport, TurnEngine, TurnReport};
pub use error::{CommandError, EngineError};
pub use id::IdGenerator;
pub use lock::{LockProvider, MemoryLockProvider, TurnLock};
pub use scenario::Scenario;
pub use scheduler::{SessionRunner, SessionScheduler};
pub use store::{MemoryStore, WorldStore};
