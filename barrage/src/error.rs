use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by a step or hook action.
///
/// The engine only looks at the message; whether to retry is decided by the
/// predicate configured next to the [`RetryConfig`](crate::retry::RetryConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepError {
    message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Capture the display text of any error type.
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        Self::new(err.to_string())
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StepError {}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Why a scenario attempt did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Failure {
    #[error("step '{step}' failed: {message}")]
    Step { step: String, message: String },
    #[error("hook '{hook}' failed: {message}")]
    Hook { hook: String, message: String },
    #[error("attempt timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("scenario panicked: {message}")]
    Panicked { message: String },
    #[error("execution was cancelled")]
    Cancelled,
}

impl Failure {
    /// The bare failure text, without the step or hook prefix.
    pub fn message(&self) -> String {
        match self {
            Failure::Step { message, .. }
            | Failure::Hook { message, .. }
            | Failure::Panicked { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_parallel must be at least 1")]
    MaxParallelZero,
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("initial retry delay must be greater than zero")]
    ZeroInitialDelay,
    #[error("max retry delay ({max:?}) is lower than the initial delay ({initial:?})")]
    MaxDelayBelowInitial { initial: Duration, max: Duration },
    #[error("users must be at least 1")]
    NoUsers,
    #[error("duration must be greater than zero")]
    ZeroDuration,
    #[error("report interval must be greater than zero")]
    ZeroReportInterval,
    #[error("requests per second must be greater than zero when set")]
    ZeroRequestRate,
    #[error("success rate threshold {0} is outside 0.0..=1.0")]
    InvalidSuccessRate(f64),
    #[error("no scenarios to run")]
    NoScenarios,
    #[error("scenario '{name}' has invalid weight {weight}")]
    InvalidWeight { name: String, weight: f64 },
    #[error("scenario '{0}' is defined more than once")]
    DuplicateScenario(String),
    #[error("no action registered for scenario '{0}'")]
    UnknownScenario(String),
    #[error("unknown load profile '{0}'")]
    UnknownProfile(String),
    #[error("invalid duration '{0}'")]
    InvalidDuration(String),
    #[error("invalid name pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("unsupported config file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("scenario worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("virtual user task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Turn a panic payload into something printable.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
