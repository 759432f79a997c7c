//! Command handler contract and the name → factory registry.
//!
//! The catalogue of real game commands lives outside this crate; only a
//! handful of built-ins ship here (see [`builtin`]).

pub mod builtin;

use std::collections::HashMap;
use std::fmt;

use crate::error::CommandError;
use crate::model::{City, CityId, EventTarget, GameEnv, General, Nation, NationId};
use crate::random::RandomSource;

/// A lifecycle target a command asks the engine to fire once it succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaisedEvent {
    pub target: EventTarget,
    pub nation: Option<NationId>,
    pub city: Option<CityId>,
}

/// Everything a command may read and change: the acting general plus its
/// nation and current city as loaded for this turn.
///
/// Handlers run against a copy; the engine persists it only if `run`
/// returns `Ok`.
#[derive(Debug, Clone)]
pub struct CommandSubject {
    pub general: General,
    pub nation: Option<Nation>,
    pub city: Option<City>,
    logs: Vec<String>,
    raised: Vec<RaisedEvent>,
}

impl CommandSubject {
    pub fn new(general: General, nation: Option<Nation>, city: Option<City>) -> Self {
        Self {
            general,
            nation,
            city,
            logs: Vec::new(),
            raised: Vec::new(),
        }
    }

    /// Add a line to the acting general's log.
    pub fn log(&mut self, text: impl Into<String>) {
        self.logs.push(text.into());
    }

    pub fn raise(&mut self, event: RaisedEvent) {
        self.raised.push(event);
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn raised(&self) -> &[RaisedEvent] {
        &self.raised
    }

    pub(crate) fn take_outputs(&mut self) -> (Vec<String>, Vec<RaisedEvent>) {
        (
            std::mem::take(&mut self.logs),
            std::mem::take(&mut self.raised),
        )
    }
}

/// One queued action, built for a specific subject, environment and args.
pub trait TurnCommand: Send {
    fn name(&self) -> &'static str;

    fn has_precondition_met(&self) -> bool;

    /// Why the precondition failed. Only meaningful when
    /// [`has_precondition_met`](TurnCommand::has_precondition_met) is false.
    fn failure_message(&self) -> String;

    fn run(
        &mut self,
        subject: &mut CommandSubject,
        rng: &mut dyn RandomSource,
    ) -> Result<(), CommandError>;
}

pub type CommandFactory =
    fn(&CommandSubject, &GameEnv, &serde_json::Value) -> Box<dyn TurnCommand>;

/// Which queue an action was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandScope {
    General,
    Nation,
}

impl fmt::Display for CommandScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandScope::General => "general",
            CommandScope::Nation => "nation",
        })
    }
}

/// Static map from action name to factory, filled once at startup.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    general: HashMap<&'static str, CommandFactory>,
    nation: HashMap<&'static str, CommandFactory>,
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in commands.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        scope: CommandScope,
        name: &'static str,
        factory: CommandFactory,
    ) -> &mut Self {
        self.table_mut(scope).insert(name, factory);
        self
    }

    pub fn contains(&self, scope: CommandScope, name: &str) -> bool {
        self.table(scope).contains_key(name)
    }

    /// Construct the handler for `name`, or `None` if it is not registered.
    pub fn build(
        &self,
        scope: CommandScope,
        name: &str,
        subject: &CommandSubject,
        env: &GameEnv,
        args: &serde_json::Value,
    ) -> Option<Box<dyn TurnCommand>> {
        self.table(scope)
            .get(name)
            .map(|factory| factory(subject, env, args))
    }

    fn table(&self, scope: CommandScope) -> &HashMap<&'static str, CommandFactory> {
        match scope {
            CommandScope::General => &self.general,
            CommandScope::Nation => &self.nation,
        }
    }

    fn table_mut(&mut self, scope: CommandScope) -> &mut HashMap<&'static str, CommandFactory> {
        match scope {
            CommandScope::General => &mut self.general,
            CommandScope::Nation => &mut self.nation,
        }
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut general: Vec<&str> = self.general.keys().copied().collect();
        let mut nation: Vec<&str> = self.nation.keys().copied().collect();
        general.sort_unstable();
        nation.sort_unstable();
        f.debug_struct("CommandRegistry")
            .field("general", &general)
            .field("nation", &nation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::clock::{GameDate, TurnTerm};

    struct Noop;

    impl TurnCommand for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }
        fn has_precondition_met(&self) -> bool {
            true
        }
        fn failure_message(&self) -> String {
            String::new()
        }
        fn run(&mut self, subject: &mut CommandSubject, _rng: &mut dyn RandomSource) -> Result<(), CommandError> {
            subject.log("did nothing");
            Ok(())
        }
    }

    fn noop(_: &CommandSubject, _: &GameEnv, _: &serde_json::Value) -> Box<dyn TurnCommand> {
        Box::new(Noop)
    }

    fn env() -> GameEnv {
        GameEnv {
            session_id: 1,
            date: GameDate::new(190, 1),
            turn_term: TurnTerm::from_minutes(60).unwrap(),
            killturn: 24,
            hidden_seed: 0,
        }
    }

    fn subject() -> CommandSubject {
        CommandSubject::new(
            General::new(1, "Liu Bei", DateTime::from_timestamp(0, 0).unwrap()),
            None,
            None,
        )
    }

    #[test]
    fn lookup_is_scoped() {
        let mut registry = CommandRegistry::new();
        registry.register(CommandScope::Nation, "noop", noop);

        assert!(registry.contains(CommandScope::Nation, "noop"));
        assert!(!registry.contains(CommandScope::General, "noop"));
        let args = serde_json::json!({});
        assert!(registry
            .build(CommandScope::General, "noop", &subject(), &env(), &args)
            .is_none());
        let cmd = registry
            .build(CommandScope::Nation, "noop", &subject(), &env(), &args)
            .unwrap();
        assert_eq!(cmd.name(), "noop");
    }

    #[test]
    fn builtins_registered() {
        let registry = CommandRegistry::with_builtins();
        for name in ["rest", "recruit", "train", "donate"] {
            assert!(registry.contains(CommandScope::General, name), "{name}");
        }
        for name in ["rest", "buy_rice"] {
            assert!(registry.contains(CommandScope::Nation, name), "{name}");
        }
        let debug = format!("{registry:?}");
        assert!(debug.contains("buy_rice"));
    }

    #[test]
    fn subject_outputs_drain() {
        let mut subject = subject();
        subject.log("a");
        subject.raise(RaisedEvent {
            target: EventTarget::OccupyCity,
            nation: Some(1),
            city: Some(2),
        });
        let (logs, raised) = subject.take_outputs();
        assert_eq!(logs, vec!["a".to_string()]);
        assert_eq!(raised.len(), 1);
        assert!(subject.logs().is_empty());
        assert!(subject.raised().is_empty());
    }
}
