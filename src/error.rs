use crate::model::SessionId;

/// Failures that abort an engine invocation or a store/lock operation.
///
/// Expected outcomes (a busy lock, a frozen session, a rejected command)
/// are not errors; see [`crate::engine::ExecuteOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store unavailable: {0}")]
    Store(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("turn term must be positive, got {0} minutes")]
    InvalidTurnTerm(i32),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("lock provider failed: {0}")]
    Lock(String),
    #[error("session task aborted: {0}")]
    TaskAborted(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Corrupt(err.to_string())
    }
}

/// A command handler failed while running. The engine logs it and consumes
/// the turn; nothing the handler touched is persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("missing argument `{0}`")]
    MissingArgument(&'static str),
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    #[error("{0}")]
    Failed(String),
    #[error("command panicked: {0}")]
    Panicked(String),
}
