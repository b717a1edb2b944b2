//! Error types for the training driver.
//!
//! Only [`DriverError`] ever terminates a run. Callback, sink and queue
//! problems are recovered locally and surface through
//! [`Incidents`](crate::incident::Incidents) instead.

use std::fmt;
use std::io;

use thiserror::Error;

/// Boxed error produced by external collaborators (agents, evaluators, persistence).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the crate.
pub type Result<T, E = DriverError> = std::result::Result<T, E>;

/// Fatal outcome of a run.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The interaction or training step function failed.
    #[error("step function failed at step {step}: {source}")]
    Step {
        /// Counter value reached before the failing call.
        step: u64,
        #[source]
        source: StepError,
    },

    /// Configuration could not be used.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A whole chunk executed zero steps while the step function claimed more work.
    #[error("chunk of {requested} steps made no progress at step {step}")]
    NoProgress { step: u64, requested: u64 },

    /// A parallel unit panicked.
    #[error("{role} thread panicked: {message}")]
    Panicked { role: &'static str, message: String },

    /// A parallel unit could not be spawned.
    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: io::Error,
    },

    /// A sink could not be created.
    #[error("sink setup failed: {0}")]
    Sink(#[from] crate::metrics::SinkError),
}

/// Error returned by an external step or train function.
pub struct StepError(BoxError);

impl StepError {
    /// Wrap any error.
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self(err.into())
    }

    /// Build an error from a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self(message.to_string().into())
    }

    /// Unwrap the inner error.
    pub fn into_inner(self) -> BoxError {
        self.0
    }
}

impl fmt::Debug for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for StepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Error raised inside a log, evaluation or save callback. Never fatal.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("{0}")]
    Failed(BoxError),

    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl CallbackError {
    /// Wrap any error.
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self::Failed(err.into())
    }

    /// Build an error from a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string().into())
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A count parameter must be positive.
    #[error("{field} must be > 0, got {value}")]
    InvalidCount { field: &'static str, value: u64 },

    /// A parameter is outside its valid range.
    #[error("{field} must be in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Two parameters are inconsistent.
    #[error("{0}")]
    Invalid(String),

    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),

    #[error("cannot parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid score pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_display_passes_through() {
        let err = StepError::msg("env crashed");
        assert_eq!(err.to_string(), "env crashed");

        let driver = DriverError::Step { step: 42, source: err };
        assert_eq!(driver.to_string(), "step function failed at step 42: env crashed");
    }

    #[test]
    fn test_callback_error_from_io() {
        let err = CallbackError::new(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn test_config_error_converts_into_driver_error() {
        let err: DriverError = ConfigError::Invalid("action_repeat must be > 0".into()).into();
        assert!(matches!(err, DriverError::Config(_)));
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");

        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}
