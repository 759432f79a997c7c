//! Fixed-length action rings (GeneralTurn / NationTurn).
//!
//! Slot 0 is the action due this turn. Consuming `n` leading slots shifts
//! everything down by `n` and refills the exposed tail with `rest`.

use serde::{Deserialize, Serialize};

use super::general::GeneralId;
use super::nation::NationId;

/// Length of a general's action queue.
pub const MAX_TURN: usize = 30;

/// Length of a nation officer's action queue.
pub const MAX_CHIEF_TURN: usize = 12;

/// Action name every vacated slot is reset to.
pub const REST_ACTION: &str = "rest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSlot {
    pub action: String,
    pub args: serde_json::Value,
}

impl TurnSlot {
    pub fn new(action: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            args,
        }
    }

    pub fn rest() -> Self {
        Self::new(REST_ACTION, serde_json::Value::Object(Default::default()))
    }

    pub fn is_rest(&self) -> bool {
        self.action == REST_ACTION
    }
}

impl Default for TurnSlot {
    fn default() -> Self {
        Self::rest()
    }
}

/// Which ring a queue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueKey {
    General(GeneralId),
    Nation { nation: NationId, officer_level: i16 },
}

impl QueueKey {
    pub fn capacity(self) -> usize {
        match self {
            QueueKey::General(_) => MAX_TURN,
            QueueKey::Nation { .. } => MAX_CHIEF_TURN,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnQueue {
    slots: Vec<TurnSlot>,
}

impl TurnQueue {
    /// A queue of `len` rest slots.
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![TurnSlot::rest(); len],
        }
    }

    /// Build from stored `(turn_idx, slot)` rows. Missing indices are rest;
    /// indices outside `[0, len)` are ignored.
    pub fn from_rows(len: usize, rows: impl IntoIterator<Item = (usize, TurnSlot)>) -> Self {
        let mut queue = Self::new(len);
        for (idx, slot) in rows {
            queue.set(idx, slot);
        }
        queue
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The slot due this turn.
    pub fn head(&self) -> TurnSlot {
        self.slots.first().cloned().unwrap_or_default()
    }

    pub fn get(&self, idx: usize) -> Option<&TurnSlot> {
        self.slots.get(idx)
    }

    /// Overwrite one slot. Returns `false` if `idx` is out of range.
    pub fn set(&mut self, idx: usize, slot: TurnSlot) -> bool {
        match self.slots.get_mut(idx) {
            Some(existing) => {
                *existing = slot;
                true
            }
            None => false,
        }
    }

    /// Consume `by` leading slots.
    pub fn rotate(&mut self, by: usize) {
        let len = self.slots.len();
        let by = by.min(len);
        self.slots.rotate_left(by);
        for slot in &mut self.slots[len - by..] {
            *slot = TurnSlot::rest();
        }
    }

    pub fn slots(&self) -> &[TurnSlot] {
        &self.slots
    }
}
