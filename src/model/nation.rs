use serde::{Deserialize, Serialize};

pub type NationId = i64;
pub type CityId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nation {
    pub id: NationId,
    pub name: String,
    pub capital: CityId,
    pub gold: i32,
    pub rice: i32,
    pub level: i16,
    /// Months until the next strategic command is allowed. Decays monthly.
    pub strategic_limit: i16,
}

impl Nation {
    pub fn new(id: NationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            capital: 0,
            gold: 10_000,
            rice: 10_000,
            level: 1,
            strategic_limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: CityId,
    pub name: String,
    /// Owning nation, 0 if unclaimed.
    pub nation: NationId,
    pub population: i32,
    pub agriculture: i32,
    pub commerce: i32,
}

impl City {
    pub fn new(id: CityId, name: impl Into<String>, nation: NationId) -> Self {
        Self {
            id,
            name: name.into(),
            nation,
            population: 100_000,
            agriculture: 1_000,
            commerce: 1_000,
        }
    }
}
