use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::clock::GameDate;
use crate::error::EngineError;
use crate::model::{
    City, CityId, Condition, Control, EventAction, EventId, EventRecord, EventTarget, General,
    GeneralId, LogEntry, Nation, NationId, QueueKey, Session, SessionId, SessionState, TurnQueue,
    TurnSlot,
};
use crate::store::WorldStore;

const GENERAL_COLUMNS: &str = "id, name, nation, city, officer_level, turntime, killturn, npc, \
     block, age, gold, rice, crew, train, injury, payload";

/// [`WorldStore`] on the tables in `sql/schema.sql`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// `(owner_kind, owner_id, officer_level)` for a queue.
fn queue_owner(key: QueueKey) -> (i16, i64, i16) {
    match key {
        QueueKey::General(id) => (0, id, 0),
        QueueKey::Nation {
            nation,
            officer_level,
        } => (1, nation, officer_level),
    }
}

fn game_date(year: i32, month: i16) -> Result<GameDate, EngineError> {
    u8::try_from(month)
        .ok()
        .filter(|m| (1..=12).contains(m))
        .map(|m| GameDate::new(year, m))
        .ok_or_else(|| EngineError::Corrupt(format!("month {month} out of range")))
}

fn session_from_row(row: &PgRow) -> Result<Session, EngineError> {
    let seed: i64 = row.try_get("hidden_seed")?;
    Ok(Session {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        turntime: row.try_get("turntime")?,
        turnterm: row.try_get("turnterm")?,
        date: game_date(row.try_get("year")?, row.try_get("month")?)?,
        state: SessionState::from_code(row.try_get("isunited")?)?,
        killturn: row.try_get("killturn")?,
        hidden_seed: seed as u64,
    })
}

fn general_from_row(row: &PgRow) -> Result<General, EngineError> {
    let Json(payload) = row.try_get::<Json<serde_json::Value>, _>("payload")?;
    Ok(General {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        nation: row.try_get("nation")?,
        city: row.try_get("city")?,
        officer_level: row.try_get("officer_level")?,
        turntime: row.try_get("turntime")?,
        killturn: row.try_get("killturn")?,
        control: Control::from_code(row.try_get("npc")?),
        block: row.try_get("block")?,
        age: row.try_get("age")?,
        gold: row.try_get("gold")?,
        rice: row.try_get("rice")?,
        crew: row.try_get("crew")?,
        train: row.try_get("train")?,
        injury: row.try_get("injury")?,
        payload,
    })
}

fn nation_from_row(row: &PgRow) -> Result<Nation, EngineError> {
    Ok(Nation {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        capital: row.try_get("capital")?,
        gold: row.try_get("gold")?,
        rice: row.try_get("rice")?,
        level: row.try_get("level")?,
        strategic_limit: row.try_get("strategic_limit")?,
    })
}

fn city_from_row(row: &PgRow) -> Result<City, EngineError> {
    Ok(City {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        nation: row.try_get("nation")?,
        population: row.try_get("population")?,
        agriculture: row.try_get("agriculture")?,
        commerce: row.try_get("commerce")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<EventRecord, EngineError> {
    let target: String = row.try_get("target")?;
    let Json(condition) = row.try_get::<Json<Condition>, _>("condition")?;
    let Json(actions) = row.try_get::<Json<Vec<EventAction>>, _>("actions")?;
    Ok(EventRecord {
        id: row.try_get("id")?,
        target: EventTarget::parse(&target).map_err(EngineError::Corrupt)?,
        priority: row.try_get("priority")?,
        condition,
        actions,
    })
}

impl WorldStore for PgStore {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, EngineError> {
        sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(session_from_row)
            .transpose()
    }

    async fn save_session(&self, session: &Session) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO sessions
                 (id, name, turntime, turnterm, year, month, isunited, killturn, hidden_seed)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 turntime = EXCLUDED.turntime,
                 turnterm = EXCLUDED.turnterm,
                 year = EXCLUDED.year,
                 month = EXCLUDED.month,
                 isunited = EXCLUDED.isunited,
                 killturn = EXCLUDED.killturn,
                 hidden_seed = EXCLUDED.hidden_seed",
        )
        .bind(session.id)
        .bind(&session.name)
        .bind(session.turntime)
        .bind(session.turnterm)
        .bind(session.date.year)
        .bind(i16::from(session.date.month))
        .bind(session.state.code())
        .bind(session.killturn)
        .bind(session.hidden_seed as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<Session>, EngineError> {
        sqlx::query("SELECT * FROM sessions WHERE isunited NOT IN (2, 3) ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(session_from_row)
            .collect()
    }

    async fn general(
        &self,
        session: SessionId,
        id: GeneralId,
    ) -> Result<Option<General>, EngineError> {
        sqlx::query(&format!(
            "SELECT {GENERAL_COLUMNS} FROM generals WHERE session_id = $1 AND id = $2"
        ))
        .bind(session)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(general_from_row)
        .transpose()
    }

    async fn generals_due_before(
        &self,
        session: SessionId,
        before: DateTime<Utc>,
    ) -> Result<Vec<General>, EngineError> {
        sqlx::query(&format!(
            "SELECT {GENERAL_COLUMNS} FROM generals
             WHERE session_id = $1 AND turntime < $2
             ORDER BY turntime, id"
        ))
        .bind(session)
        .bind(before)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(general_from_row)
        .collect()
    }

    async fn earliest_general_turntime(
        &self,
        session: SessionId,
    ) -> Result<Option<DateTime<Utc>>, EngineError> {
        let earliest = sqlx::query_scalar("SELECT MIN(turntime) FROM generals WHERE session_id = $1")
            .bind(session)
            .fetch_one(&self.pool)
            .await?;
        Ok(earliest)
    }

    async fn save_general(&self, session: SessionId, general: &General) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO generals
                 (session_id, id, name, nation, city, officer_level, turntime, killturn, npc,
                  block, age, gold, rice, crew, train, injury, payload)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
             ON CONFLICT (session_id, id) DO UPDATE SET
                 name = EXCLUDED.name,
                 nation = EXCLUDED.nation,
                 city = EXCLUDED.city,
                 officer_level = EXCLUDED.officer_level,
                 turntime = EXCLUDED.turntime,
                 killturn = EXCLUDED.killturn,
                 npc = EXCLUDED.npc,
                 block = EXCLUDED.block,
                 age = EXCLUDED.age,
                 gold = EXCLUDED.gold,
                 rice = EXCLUDED.rice,
                 crew = EXCLUDED.crew,
                 train = EXCLUDED.train,
                 injury = EXCLUDED.injury,
                 payload = EXCLUDED.payload",
        )
        .bind(session)
        .bind(general.id)
        .bind(&general.name)
        .bind(general.nation)
        .bind(general.city)
        .bind(general.officer_level)
        .bind(general.turntime)
        .bind(general.killturn)
        .bind(general.control.code())
        .bind(general.block)
        .bind(general.age)
        .bind(general.gold)
        .bind(general.rice)
        .bind(general.crew)
        .bind(general.train)
        .bind(general.injury)
        .bind(Json(&general.payload))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_general(&self, session: SessionId, id: GeneralId) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM generals WHERE session_id = $1 AND id = $2")
            .bind(session)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let (kind, owner, level) = queue_owner(QueueKey::General(id));
        sqlx::query(
            "DELETE FROM turn_slots
             WHERE session_id = $1 AND owner_kind = $2 AND owner_id = $3 AND officer_level = $4",
        )
        .bind(session)
        .bind(kind)
        .bind(owner)
        .bind(level)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn turns(&self, session: SessionId, key: QueueKey) -> Result<TurnQueue, EngineError> {
        let (kind, owner, level) = queue_owner(key);
        let rows = sqlx::query(
            "SELECT turn_idx, action, args FROM turn_slots
             WHERE session_id = $1 AND owner_kind = $2 AND owner_id = $3 AND officer_level = $4",
        )
        .bind(session)
        .bind(kind)
        .bind(owner)
        .bind(level)
        .fetch_all(&self.pool)
        .await?;

        let mut slots = Vec::with_capacity(rows.len());
        for row in &rows {
            let idx: i16 = row.try_get("turn_idx")?;
            let Json(args) = row.try_get::<Json<serde_json::Value>, _>("args")?;
            let Ok(idx) = usize::try_from(idx) else {
                continue;
            };
            slots.push((idx, TurnSlot::new(row.try_get::<String, _>("action")?, args)));
        }
        Ok(TurnQueue::from_rows(key.capacity(), slots))
    }

    async fn set_turn(
        &self,
        session: SessionId,
        key: QueueKey,
        idx: usize,
        slot: &TurnSlot,
    ) -> Result<(), EngineError> {
        if idx >= key.capacity() {
            return Ok(());
        }
        let (kind, owner, level) = queue_owner(key);
        sqlx::query(
            "INSERT INTO turn_slots
                 (session_id, owner_kind, owner_id, officer_level, turn_idx, action, args)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (session_id, owner_kind, owner_id, officer_level, turn_idx)
             DO UPDATE SET action = EXCLUDED.action, args = EXCLUDED.args",
        )
        .bind(session)
        .bind(kind)
        .bind(owner)
        .bind(level)
        .bind(idx as i16)
        .bind(&slot.action)
        .bind(Json(&slot.args))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rotate_turns(
        &self,
        session: SessionId,
        key: QueueKey,
        by: usize,
    ) -> Result<(), EngineError> {
        let by = by.min(key.capacity()) as i16;
        if by == 0 {
            return Ok(());
        }
        let (kind, owner, level) = queue_owner(key);
        let owner_clause =
            "session_id = $1 AND owner_kind = $2 AND owner_id = $3 AND officer_level = $4";

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "DELETE FROM turn_slots WHERE {owner_clause} AND turn_idx < $5"
        ))
        .bind(session)
        .bind(kind)
        .bind(owner)
        .bind(level)
        .bind(by)
        .execute(&mut *tx)
        .await?;
        // Shift through negative indices so no row ever collides with one
        // that has not moved yet.
        sqlx::query(&format!(
            "UPDATE turn_slots SET turn_idx = -(turn_idx - $5) - 1 WHERE {owner_clause}"
        ))
        .bind(session)
        .bind(kind)
        .bind(owner)
        .bind(level)
        .bind(by)
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "UPDATE turn_slots SET turn_idx = -turn_idx - 1 WHERE {owner_clause} AND turn_idx < 0"
        ))
        .bind(session)
        .bind(kind)
        .bind(owner)
        .bind(level)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn nation(&self, session: SessionId, id: NationId) -> Result<Option<Nation>, EngineError> {
        sqlx::query("SELECT * FROM nations WHERE session_id = $1 AND id = $2")
            .bind(session)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(nation_from_row)
            .transpose()
    }

    async fn nations(&self, session: SessionId) -> Result<Vec<Nation>, EngineError> {
        sqlx::query("SELECT * FROM nations WHERE session_id = $1 ORDER BY id")
            .bind(session)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(nation_from_row)
            .collect()
    }

    async fn save_nation(&self, session: SessionId, nation: &Nation) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO nations (session_id, id, name, capital, gold, rice, level, strategic_limit)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (session_id, id) DO UPDATE SET
                 name = EXCLUDED.name,
                 capital = EXCLUDED.capital,
                 gold = EXCLUDED.gold,
                 rice = EXCLUDED.rice,
                 level = EXCLUDED.level,
                 strategic_limit = EXCLUDED.strategic_limit",
        )
        .bind(session)
        .bind(nation.id)
        .bind(&nation.name)
        .bind(nation.capital)
        .bind(nation.gold)
        .bind(nation.rice)
        .bind(nation.level)
        .bind(nation.strategic_limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dissolve_nation(&self, session: SessionId, id: NationId) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM nations WHERE session_id = $1 AND id = $2")
            .bind(session)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM turn_slots WHERE session_id = $1 AND owner_kind = 1 AND owner_id = $2")
            .bind(session)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE generals SET nation = 0, officer_level = 0 WHERE session_id = $1 AND nation = $2",
        )
        .bind(session)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn city(&self, session: SessionId, id: CityId) -> Result<Option<City>, EngineError> {
        sqlx::query("SELECT * FROM cities WHERE session_id = $1 AND id = $2")
            .bind(session)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(city_from_row)
            .transpose()
    }

    async fn cities(&self, session: SessionId) -> Result<Vec<City>, EngineError> {
        sqlx::query("SELECT * FROM cities WHERE session_id = $1 ORDER BY id")
            .bind(session)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(city_from_row)
            .collect()
    }

    async fn save_city(&self, session: SessionId, city: &City) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO cities (session_id, id, name, nation, population, agriculture, commerce)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (session_id, id) DO UPDATE SET
                 name = EXCLUDED.name,
                 nation = EXCLUDED.nation,
                 population = EXCLUDED.population,
                 agriculture = EXCLUDED.agriculture,
                 commerce = EXCLUDED.commerce",
        )
        .bind(session)
        .bind(city.id)
        .bind(&city.name)
        .bind(city.nation)
        .bind(city.population)
        .bind(city.agriculture)
        .bind(city.commerce)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events_for(
        &self,
        session: SessionId,
        target: EventTarget,
    ) -> Result<Vec<EventRecord>, EngineError> {
        sqlx::query(
            "SELECT id, target, priority, condition, actions FROM events
             WHERE session_id = $1 AND target = $2
             ORDER BY priority DESC, id",
        )
        .bind(session)
        .bind(target.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(event_from_row)
        .collect()
    }

    async fn save_event(&self, session: SessionId, event: &EventRecord) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO events (session_id, id, target, priority, condition, actions)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (session_id, id) DO UPDATE SET
                 target = EXCLUDED.target,
                 priority = EXCLUDED.priority,
                 condition = EXCLUDED.condition,
                 actions = EXCLUDED.actions",
        )
        .bind(session)
        .bind(event.id)
        .bind(event.target.as_str())
        .bind(event.priority)
        .bind(Json(&event.condition))
        .bind(Json(&event.actions))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_event(&self, session: SessionId, id: EventId) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM events WHERE session_id = $1 AND id = $2")
            .bind(session)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_logs(&self, session: SessionId, entries: &[LogEntry]) -> Result<(), EngineError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                "INSERT INTO game_logs (session_id, general_id, year, month, text)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(session)
            .bind(entry.general_id)
            .bind(entry.date.year)
            .bind(i16::from(entry.date.month))
            .bind(&entry.text)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn logs(&self, session: SessionId) -> Result<Vec<LogEntry>, EngineError> {
        let rows = sqlx::query(
            "SELECT general_id, year, month, text FROM game_logs WHERE session_id = $1 ORDER BY id",
        )
        .bind(session)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<LogEntry, EngineError> {
                Ok(LogEntry {
                    general_id: row.try_get("general_id")?,
                    date: game_date(row.try_get("year")?, row.try_get("month")?)?,
                    text: row.try_get("text")?,
                })
            })
            .collect()
    }

    async fn age_generals(&self, session: SessionId, years: i16) -> Result<(), EngineError> {
        sqlx::query("UPDATE generals SET age = age + $2 WHERE session_id = $1")
            .bind(session)
            .bind(years)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn decay_strategic_limits(&self, session: SessionId) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE nations SET strategic_limit = strategic_limit - 1
             WHERE session_id = $1 AND strategic_limit > 0",
        )
        .bind(session)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
