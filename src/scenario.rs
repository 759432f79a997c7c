//! Fixture builder for sessions: chain-configure generals, nations, cities,
//! queued actions and events, then load them into a store.

use chrono::{DateTime, Utc};

use crate::clock::GameDate;
use crate::error::EngineError;
use crate::id::IdGenerator;
use crate::model::*;
use crate::store::{MemoryStore, WorldStore};

// -- Builder-style ref types --

/// Typed reference to a general in a [`Scenario`], enabling chained field mutation.
///
/// Created by [`Scenario::general`]. Call [`.id()`](GeneralRef::id) to end the chain.
pub struct GeneralRef<'a> {
    scenario: &'a mut Scenario,
    idx: usize,
}

impl<'a> GeneralRef<'a> {
    fn data_mut(&mut self) -> &mut General {
        &mut self.scenario.generals[self.idx]
    }

    pub fn nation(mut self, v: NationId) -> Self { self.data_mut().nation = v; self }
    pub fn city(mut self, v: CityId) -> Self { self.data_mut().city = v; self }
    pub fn officer_level(mut self, v: i16) -> Self { self.data_mut().officer_level = v; self }
    pub fn turntime(mut self, v: DateTime<Utc>) -> Self { self.data_mut().turntime = v; self }
    pub fn killturn(mut self, v: i32) -> Self { self.data_mut().killturn = v; self }
    pub fn npc(mut self) -> Self { self.data_mut().control = Control::Npc; self }
    pub fn block(mut self, v: i16) -> Self { self.data_mut().block = v; self }
    pub fn age(mut self, v: i16) -> Self { self.data_mut().age = v; self }
    pub fn gold(mut self, v: i32) -> Self { self.data_mut().gold = v; self }
    pub fn rice(mut self, v: i32) -> Self { self.data_mut().rice = v; self }
    pub fn crew(mut self, v: i32) -> Self { self.data_mut().crew = v; self }
    pub fn train(mut self, v: i16) -> Self { self.data_mut().train = v; self }

    /// Queue `action` with `args` at slot `idx` of this general's ring.
    pub fn queue(mut self, idx: usize, action: &str, args: serde_json::Value) -> Self {
        let id = self.data_mut().id;
        self.scenario.turns.push((QueueKey::General(id), idx, TurnSlot::new(action, args)));
        self
    }

    /// Escape hatch: apply an arbitrary closure to the general.
    pub fn with(mut self, f: impl FnOnce(&mut General)) -> Self { f(self.data_mut()); self }

    /// Terminate the chain and return the general's id.
    pub fn id(self) -> GeneralId { self.scenario.generals[self.idx].id }
}

/// Typed reference to a nation in a [`Scenario`].
pub struct NationRef<'a> {
    scenario: &'a mut Scenario,
    idx: usize,
}

impl<'a> NationRef<'a> {
    fn data_mut(&mut self) -> &mut Nation {
        &mut self.scenario.nations[self.idx]
    }

    pub fn gold(mut self, v: i32) -> Self { self.data_mut().gold = v; self }
    pub fn rice(mut self, v: i32) -> Self { self.data_mut().rice = v; self }
    pub fn level(mut self, v: i16) -> Self { self.data_mut().level = v; self }
    pub fn capital(mut self, v: CityId) -> Self { self.data_mut().capital = v; self }
    pub fn strategic_limit(mut self, v: i16) -> Self { self.data_mut().strategic_limit = v; self }

    /// Queue `action` for the officer of `officer_level` at slot `idx`.
    pub fn queue(mut self, officer_level: i16, idx: usize, action: &str, args: serde_json::Value) -> Self {
        let nation = self.data_mut().id;
        let key = QueueKey::Nation { nation, officer_level };
        self.scenario.turns.push((key, idx, TurnSlot::new(action, args)));
        self
    }

    pub fn with(mut self, f: impl FnOnce(&mut Nation)) -> Self { f(self.data_mut()); self }

    pub fn id(self) -> NationId { self.scenario.nations[self.idx].id }
}

/// Typed reference to a city in a [`Scenario`].
pub struct CityRef<'a> {
    scenario: &'a mut Scenario,
    idx: usize,
}

impl<'a> CityRef<'a> {
    fn data_mut(&mut self) -> &mut City {
        &mut self.scenario.cities[self.idx]
    }

    pub fn population(mut self, v: i32) -> Self { self.data_mut().population = v; self }
    pub fn agriculture(mut self, v: i32) -> Self { self.data_mut().agriculture = v; self }
    pub fn commerce(mut self, v: i32) -> Self { self.data_mut().commerce = v; self }

    pub fn with(mut self, f: impl FnOnce(&mut City)) -> Self { f(self.data_mut()); self }

    pub fn id(self) -> CityId { self.scenario.cities[self.idx].id }
}

// -- Scenario --

/// One session's worth of fixtures.
///
/// Generals default to the session's `turntime`, so a fresh scenario has
/// every general due at the first boundary.
pub struct Scenario {
    session: Session,
    generals: Vec<General>,
    nations: Vec<Nation>,
    cities: Vec<City>,
    turns: Vec<(QueueKey, usize, TurnSlot)>,
    events: Vec<EventRecord>,
    ids: IdGenerator,
}

impl Scenario {
    pub const SESSION_ID: SessionId = 1;

    /// A running session with one-hour turns starting at `turntime`.
    pub fn starting_at(turntime: DateTime<Utc>) -> Self {
        Self {
            session: Session {
                id: Self::SESSION_ID,
                name: "scenario".to_string(),
                turntime,
                turnterm: 60,
                date: GameDate::new(184, 1),
                state: SessionState::Running,
                killturn: 24,
                hidden_seed: 0x5eed,
            },
            generals: Vec::new(),
            nations: Vec::new(),
            cities: Vec::new(),
            turns: Vec::new(),
            events: Vec::new(),
            ids: IdGenerator::new(),
        }
    }

    // -- Session settings --

    pub fn session_id(mut self, id: SessionId) -> Self { self.session.id = id; self }
    pub fn turnterm(mut self, minutes: i32) -> Self { self.session.turnterm = minutes; self }
    pub fn date(mut self, year: i32, month: u8) -> Self { self.session.date = GameDate::new(year, month); self }
    pub fn killturn(mut self, v: i32) -> Self { self.session.killturn = v; self }
    pub fn hidden_seed(mut self, v: u64) -> Self { self.session.hidden_seed = v; self }
    pub fn state(mut self, v: SessionState) -> Self { self.session.state = v; self }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // -- Records --

    pub fn general(&mut self, name: &str) -> GeneralRef<'_> {
        let id = self.ids.next_id();
        let mut general = General::new(id, name, self.session.turntime);
        general.killturn = self.session.killturn;
        self.generals.push(general);
        GeneralRef { idx: self.generals.len() - 1, scenario: self }
    }

    pub fn nation(&mut self, name: &str) -> NationRef<'_> {
        let id = self.ids.next_id();
        self.nations.push(Nation::new(id, name));
        NationRef { idx: self.nations.len() - 1, scenario: self }
    }

    /// A city held by `nation` (0 for unclaimed).
    pub fn city(&mut self, name: &str, nation: NationId) -> CityRef<'_> {
        let id = self.ids.next_id();
        self.cities.push(City::new(id, name, nation));
        CityRef { idx: self.cities.len() - 1, scenario: self }
    }

    /// A nation of level 1 holding one city, with a chief who serves there.
    /// Returns `(nation, city, chief)`.
    pub fn add_kingdom(&mut self, name: &str) -> (NationId, CityId, GeneralId) {
        let nation = self.nation(name).id();
        let city = self.city(&format!("{name} capital"), nation).id();
        self.nations.iter_mut()
            .filter(|n| n.id == nation)
            .for_each(|n| n.capital = city);
        let chief = self
            .general(&format!("{name} ruler"))
            .nation(nation)
            .city(city)
            .officer_level(12)
            .id();
        (nation, city, chief)
    }

    pub fn event(
        &mut self,
        target: EventTarget,
        priority: i32,
        condition: Condition,
        actions: Vec<EventAction>,
    ) -> EventId {
        let id = self.ids.next_id();
        self.events.push(EventRecord { id, target, priority, condition, actions });
        id
    }

    // -- Output --

    /// Load everything into a fresh [`MemoryStore`].
    pub fn build(&self) -> MemoryStore {
        let store = MemoryStore::new();
        let session = self.session.id;
        store.insert_session(self.session.clone());
        for nation in &self.nations {
            store.insert_nation(session, nation.clone());
        }
        for city in &self.cities {
            store.insert_city(session, city.clone());
        }
        for general in &self.generals {
            store.insert_general(session, general.clone());
        }
        for (key, idx, slot) in &self.turns {
            store.insert_turn(session, *key, *idx, slot.clone());
        }
        for event in &self.events {
            store.insert_event(session, event.clone());
        }
        store
    }

    /// Write everything through any [`WorldStore`].
    pub async fn seed<S: WorldStore>(&self, store: &S) -> Result<(), EngineError> {
        let session = self.session.id;
        store.save_session(&self.session).await?;
        for nation in &self.nations {
            store.save_nation(session, nation).await?;
        }
        for city in &self.cities {
            store.save_city(session, city).await?;
        }
        for general in &self.generals {
            store.save_general(session, general).await?;
        }
        for (key, idx, slot) in &self.turns {
            store.set_turn(session, *key, *idx, slot).await?;
        }
        for event in &self.events {
            store.save_event(session, event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_699_999_200, 0).unwrap()
    }

    #[tokio::test]
    async fn built_store_holds_fixtures() {
        let mut scenario = Scenario::starting_at(start()).date(190, 5);
        let (nation, city, chief) = scenario.add_kingdom("Shu");
        let officer = scenario
            .general("Ma Chao")
            .nation(nation)
            .city(city)
            .queue(0, "recruit", json!({ "amount": 100 }))
            .id();
        let store = scenario.build();

        let s = store.session(Scenario::SESSION_ID).await.unwrap().unwrap();
        assert_eq!(s.date, GameDate::new(190, 5));
        assert_eq!(store.nation(1, nation).await.unwrap().unwrap().capital, city);
        assert!(store.general(1, chief).await.unwrap().unwrap().holds_chief_slot());

        let queue = store.turns(1, QueueKey::General(officer)).await.unwrap();
        assert_eq!(queue.head().action, "recruit");
        assert!(queue.get(1).unwrap().is_rest());
    }

    #[test]
    fn ids_are_unique_across_kinds() {
        let mut scenario = Scenario::starting_at(start());
        let a = scenario.nation("Wei").id();
        let b = scenario.city("Ye", a).id();
        let c = scenario.general("Cao Cao").id();
        assert_eq!((a, b, c), (1, 2, 3));
    }
}
