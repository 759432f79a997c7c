use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::nation::{CityId, NationId};

pub type GeneralId = i64;

/// Lowest officer level that owns a nation-turn queue.
pub const CHIEF_OFFICER_LEVEL: i16 = 5;

/// Block level from which a general's turns are suspended.
pub const TURN_BLOCK_LEVEL: i16 = 2;

/// Who decides what a general queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Player,
    Npc,
}

impl Control {
    pub fn from_code(code: i16) -> Self {
        if code == 0 { Control::Player } else { Control::Npc }
    }

    pub fn code(self) -> i16 {
        match self {
            Control::Player => 0,
            Control::Npc => 2,
        }
    }
}

/// An actor in the world. Fields beyond the ones the engine touches live
/// in `payload`, which is passed to command handlers untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct General {
    pub id: GeneralId,
    pub name: String,
    pub nation: NationId,
    pub city: CityId,
    pub officer_level: i16,
    pub turntime: DateTime<Utc>,
    pub killturn: i32,
    pub control: Control,
    pub block: i16,
    pub age: i16,
    pub gold: i32,
    pub rice: i32,
    pub crew: i32,
    pub train: i16,
    pub injury: i16,
    pub payload: serde_json::Value,
}

impl General {
    pub fn new(id: GeneralId, name: impl Into<String>, turntime: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            nation: 0,
            city: 0,
            officer_level: 0,
            turntime,
            killturn: 24,
            control: Control::Player,
            block: 0,
            age: 20,
            gold: 1_000,
            rice: 1_000,
            crew: 0,
            train: 0,
            injury: 0,
            payload: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.block >= TURN_BLOCK_LEVEL
    }

    /// True if this general also acts for its nation each turn.
    pub fn holds_chief_slot(&self) -> bool {
        self.nation != 0 && self.officer_level >= CHIEF_OFFICER_LEVEL
    }
}
