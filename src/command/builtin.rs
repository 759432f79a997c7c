//! Built-in commands: enough to drive a session without an external
//! catalogue and to exercise every dispatch path.

use crate::error::CommandError;
use crate::model::{GameEnv, REST_ACTION};
use crate::random::RandomSource;

use super::{CommandRegistry, CommandScope, CommandSubject, TurnCommand};

/// Gold spent per ten recruits.
const RECRUIT_GOLD_PER_TEN: i32 = 1;
/// Training level new recruits arrive with.
const RECRUIT_TRAIN: i32 = 40;
const MAX_TRAIN: i16 = 100;
/// Gold a nation gives up per unit of rice bought.
const RICE_PRICE_PERCENT: i32 = 110;

pub fn register(registry: &mut CommandRegistry) {
    registry
        .register(CommandScope::General, REST_ACTION, Rest::build)
        .register(CommandScope::General, "recruit", Recruit::build)
        .register(CommandScope::General, "train", Train::build)
        .register(CommandScope::General, "donate", Donate::build)
        .register(CommandScope::Nation, REST_ACTION, Rest::build)
        .register(CommandScope::Nation, "buy_rice", BuyRice::build);
}

fn amount_arg(args: &serde_json::Value) -> Option<i32> {
    args.get("amount")
        .and_then(serde_json::Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
}

// ---------------------------------------------------------------------------
// rest
// ---------------------------------------------------------------------------

pub struct Rest;

impl Rest {
    fn build(_: &CommandSubject, _: &GameEnv, _: &serde_json::Value) -> Box<dyn TurnCommand> {
        Box::new(Rest)
    }
}

impl TurnCommand for Rest {
    fn name(&self) -> &'static str {
        REST_ACTION
    }

    fn has_precondition_met(&self) -> bool {
        true
    }

    fn failure_message(&self) -> String {
        String::new()
    }

    fn run(&mut self, _: &mut CommandSubject, _: &mut dyn RandomSource) -> Result<(), CommandError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// recruit
// ---------------------------------------------------------------------------

/// Raise `amount` soldiers from the general's current city.
///
/// Requires a nation, a city that nation holds, enough population and
/// enough gold.
pub struct Recruit {
    amount: i32,
    cost: i32,
    failure: Option<String>,
}

impl Recruit {
    fn build(subject: &CommandSubject, _: &GameEnv, args: &serde_json::Value) -> Box<dyn TurnCommand> {
        let amount = amount_arg(args).unwrap_or(0);
        let cost = (amount.max(0) + 9) / 10 * RECRUIT_GOLD_PER_TEN;
        let general = &subject.general;
        let city = subject.city.as_ref();

        let failure = if amount <= 0 {
            Some("a positive amount is required".to_string())
        } else if general.nation == 0 {
            Some("not serving any nation".to_string())
        } else if !city.is_some_and(|c| c.nation == general.nation) {
            Some("the current city is not held by your nation".to_string())
        } else if !city.is_some_and(|c| c.population >= amount) {
            Some("the city's population is too small".to_string())
        } else if general.gold < cost {
            Some(format!("{cost} gold needed, {} on hand", general.gold))
        } else {
            None
        };
        Box::new(Recruit {
            amount,
            cost,
            failure,
        })
    }
}

impl TurnCommand for Recruit {
    fn name(&self) -> &'static str {
        "recruit"
    }

    fn has_precondition_met(&self) -> bool {
        self.failure.is_none()
    }

    fn failure_message(&self) -> String {
        self.failure.clone().unwrap_or_default()
    }

    fn run(&mut self, subject: &mut CommandSubject, _: &mut dyn RandomSource) -> Result<(), CommandError> {
        let city = subject
            .city
            .as_mut()
            .ok_or(CommandError::Failed("no city to recruit from".to_string()))?;
        city.population -= self.amount;

        let general = &mut subject.general;
        let old_crew = general.crew.max(0);
        let total = old_crew + self.amount;
        let blended = (i32::from(general.train) * old_crew + RECRUIT_TRAIN * self.amount) / total;
        general.crew = total;
        general.train = i16::try_from(blended).unwrap_or(MAX_TRAIN);
        general.gold -= self.cost;

        let line = format!("recruited {} soldiers for {} gold", self.amount, self.cost);
        subject.log(line);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// train
// ---------------------------------------------------------------------------

pub struct Train {
    failure: Option<String>,
}

impl Train {
    fn build(subject: &CommandSubject, _: &GameEnv, _: &serde_json::Value) -> Box<dyn TurnCommand> {
        let general = &subject.general;
        let failure = if general.crew <= 0 {
            Some("there are no soldiers to train".to_string())
        } else if general.train >= MAX_TRAIN {
            Some("the troops are fully trained".to_string())
        } else {
            None
        };
        Box::new(Train { failure })
    }
}

impl TurnCommand for Train {
    fn name(&self) -> &'static str {
        "train"
    }

    fn has_precondition_met(&self) -> bool {
        self.failure.is_none()
    }

    fn failure_message(&self) -> String {
        self.failure.clone().unwrap_or_default()
    }

    fn run(&mut self, subject: &mut CommandSubject, rng: &mut dyn RandomSource) -> Result<(), CommandError> {
        let gain = rng.range(3, 8) as i16;
        let general = &mut subject.general;
        general.train = (general.train + gain).min(MAX_TRAIN);
        let line = format!("drilled the troops, training now {}", general.train);
        subject.log(line);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// donate
// ---------------------------------------------------------------------------

/// Hand `amount` of the general's gold to the nation treasury.
pub struct Donate {
    amount: i32,
    failure: Option<String>,
}

impl Donate {
    fn build(subject: &CommandSubject, _: &GameEnv, args: &serde_json::Value) -> Box<dyn TurnCommand> {
        let amount = amount_arg(args).unwrap_or(0);
        let general = &subject.general;
        let failure = if amount <= 0 {
            Some("a positive amount is required".to_string())
        } else if subject.nation.is_none() {
            Some("not serving any nation".to_string())
        } else if general.gold < amount {
            Some(format!("{amount} gold needed, {} on hand", general.gold))
        } else {
            None
        };
        Box::new(Donate { amount, failure })
    }
}

impl TurnCommand for Donate {
    fn name(&self) -> &'static str {
        "donate"
    }

    fn has_precondition_met(&self) -> bool {
        self.failure.is_none()
    }

    fn failure_message(&self) -> String {
        self.failure.clone().unwrap_or_default()
    }

    fn run(&mut self, subject: &mut CommandSubject, _: &mut dyn RandomSource) -> Result<(), CommandError> {
        let nation = subject
            .nation
            .as_mut()
            .ok_or(CommandError::Failed("nation vanished".to_string()))?;
        nation.gold += self.amount;
        subject.general.gold -= self.amount;
        subject.log(format!("donated {} gold", self.amount));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// buy_rice (nation)
// ---------------------------------------------------------------------------

/// Convert treasury gold into rice at a fixed markup.
pub struct BuyRice {
    amount: i32,
    price: i32,
    failure: Option<String>,
}

impl BuyRice {
    fn build(subject: &CommandSubject, _: &GameEnv, args: &serde_json::Value) -> Box<dyn TurnCommand> {
        let amount = amount_arg(args).unwrap_or(0);
        let price = amount.max(0).saturating_mul(RICE_PRICE_PERCENT) / 100;
        let treasury = subject.nation.as_ref().map_or(0, |n| n.gold);
        let failure = if amount <= 0 {
            Some("a positive amount is required".to_string())
        } else if subject.nation.is_none() {
            Some("not serving any nation".to_string())
        } else if treasury < price {
            Some(format!("{price} gold needed, treasury holds {treasury}"))
        } else {
            None
        };
        Box::new(BuyRice {
            amount,
            price,
            failure,
        })
    }
}

impl TurnCommand for BuyRice {
    fn name(&self) -> &'static str {
        "buy_rice"
    }

    fn has_precondition_met(&self) -> bool {
        self.failure.is_none()
    }

    fn failure_message(&self) -> String {
        self.failure.clone().unwrap_or_default()
    }

    fn run(&mut self, subject: &mut CommandSubject, _: &mut dyn RandomSource) -> Result<(), CommandError> {
        let nation = subject
            .nation
            .as_mut()
            .ok_or(CommandError::Failed("nation vanished".to_string()))?;
        nation.gold -= self.price;
        nation.rice += self.amount;
        let line = format!("bought {} rice for the nation at {} gold", self.amount, self.price);
        subject.log(line);
        Ok(())
    }
}
