use serde::{Deserialize, Serialize};

use crate::clock::GameDate;

pub type EventId = i64;

/// Named lifecycle hook at which event scripts run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventTarget {
    PreMonth,
    Month,
    OccupyCity,
    DestroyNation,
    United,
}

string_enum!(EventTarget {
    PreMonth => "pre_month",
    Month => "month",
    OccupyCity => "occupy_city",
    DestroyNation => "destroy_nation",
    United => "united",
});

/// Stockpile an economic event action works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Resource {
    Gold,
    Rice,
}

string_enum!(Resource {
    Gold => "gold",
    Rice => "rice",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    pub fn holds<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            Cmp::Eq => lhs == rhs,
            Cmp::Ne => lhs != rhs,
            Cmp::Lt => lhs < rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Ge => lhs >= rhs,
        }
    }
}

/// World facts a condition is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionFacts {
    pub date: GameDate,
    pub nation_count: usize,
}

/// Guard deciding whether an event's actions run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Always,
    /// Compare the current date with a year and/or month. Missing parts match.
    Date {
        cmp: Cmp,
        year: Option<i32>,
        month: Option<u8>,
    },
    RemainNations {
        cmp: Cmp,
        count: usize,
    },
    And {
        all: Vec<Condition>,
    },
    Or {
        any: Vec<Condition>,
    },
    Not {
        inner: Box<Condition>,
    },
}

impl Condition {
    pub fn evaluate(&self, facts: &ConditionFacts) -> bool {
        match self {
            Condition::Always => true,
            Condition::Date { cmp, year, month } => {
                let year_ok = year.is_none_or(|y| cmp.holds(facts.date.year, y));
                let month_ok = month.is_none_or(|m| cmp.holds(facts.date.month, m));
                year_ok && month_ok
            }
            Condition::RemainNations { cmp, count } => cmp.holds(facts.nation_count, *count),
            Condition::And { all } => all.iter().all(|c| c.evaluate(facts)),
            Condition::Or { any } => any.iter().any(|c| c.evaluate(facts)),
            Condition::Not { inner } => !inner.evaluate(facts),
        }
    }
}

/// One step of an event script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventAction {
    /// Append a line to the world history log.
    Log { text: String },
    /// Nations collect `resource` from their cities.
    ProcessIncome { resource: Resource },
    /// City development tied to `resource` decays by one percent.
    ProcessSemiAnnual { resource: Resource },
    /// Queue another lifecycle target after the current one finishes.
    Raise { target: EventTarget },
    /// Remove this event so it never runs again.
    DeleteSelf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub target: EventTarget,
    /// Higher runs first; ties run in id order.
    pub priority: i32,
    pub condition: Condition,
    pub actions: Vec<EventAction>,
}
