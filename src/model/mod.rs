#[macro_use]
mod macros;

pub mod event;
pub mod general;
pub mod log;
pub mod nation;
pub mod session;
pub mod turn;

pub use event::{
    Cmp, Condition, ConditionFacts, EventAction, EventId, EventRecord, EventTarget, Resource,
};
pub use general::{CHIEF_OFFICER_LEVEL, Control, General, GeneralId};
pub use log::LogEntry;
pub use nation::{City, CityId, Nation, NationId};
pub use session::{GameEnv, Session, SessionId, SessionState};
pub use turn::{MAX_CHIEF_TURN, MAX_TURN, QueueKey, REST_ACTION, TurnQueue, TurnSlot};
