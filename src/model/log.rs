use serde::{Deserialize, Serialize};

use super::general::GeneralId;
use crate::clock::GameDate;

/// A game-visible log line: a general's action log, or world history when
/// `general_id` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub general_id: Option<GeneralId>,
    pub date: GameDate,
    pub text: String,
}

impl LogEntry {
    pub fn general(general_id: GeneralId, date: GameDate, text: impl Into<String>) -> Self {
        Self {
            general_id: Some(general_id),
            date,
            text: text.into(),
        }
    }

    pub fn world(date: GameDate, text: impl Into<String>) -> Self {
        Self {
            general_id: None,
            date,
            text: text.into(),
        }
    }
}
