use std::time::Duration;

use crate::error::EngineError;

/// Configuration for the execution loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Safety ceiling on a session lock. Must exceed `execution_budget`.
    pub lock_ttl: Duration,
    /// Wall-clock time one `execute` call may spend consuming turns.
    pub execution_budget: Duration,
}

impl EngineConfig {
    pub fn new(lock_ttl: Duration, execution_budget: Duration) -> Self {
        Self {
            lock_ttl,
            execution_budget,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.lock_ttl.as_secs() == 0 {
            return Err(EngineError::Config(
                "lock_ttl must be at least one second".to_string(),
            ));
        }
        if self.lock_ttl <= self.execution_budget {
            return Err(EngineError::Config(format!(
                "lock_ttl ({:?}) must exceed execution_budget ({:?})",
                self.lock_ttl, self.execution_budget
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(50))
    }
}

/// Configuration for the per-process session scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_sessions: usize,
    /// How often active sessions are re-read and their timers re-armed.
    /// Also the retry delay after a failed or busy execution.
    pub poll_interval: Duration,
    /// Upper bound of the random delay added to every armed timer.
    pub max_jitter: Duration,
}

impl SchedulerConfig {
    pub fn new(max_concurrent_sessions: usize, poll_interval: Duration) -> Self {
        Self {
            max_concurrent_sessions,
            poll_interval,
            max_jitter: Duration::from_millis(500),
        }
    }

    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_concurrent_sessions == 0 {
            return Err(EngineError::Config(
                "max_concurrent_sessions must be positive".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(EngineError::Config(
                "poll_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(4, Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
        SchedulerConfig::default().validate().unwrap();
    }

    #[test]
    fn lock_ttl_must_exceed_budget() {
        let config = EngineConfig::new(Duration::from_secs(30), Duration::from_secs(30));
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = SchedulerConfig::new(0, Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let config = SchedulerConfig::new(2, Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
