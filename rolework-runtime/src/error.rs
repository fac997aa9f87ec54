//! Error types for construction and argument validation.
//!
//! Only fail-fast validation surfaces as `RoleworkError`. Failures inside a
//! tick, a task start/stop, or a disposal are logged and swallowed where they
//! happen.

use std::time::Duration;

use thiserror::Error;

/// Errors raised synchronously by constructors and pool operations.
#[derive(Debug, Error)]
pub enum RoleworkError {
    #[error("period must be greater than zero (got {0:?})")]
    InvalidPeriod(Duration),

    #[error("minimum ({minimum}) must not exceed maximum ({maximum})")]
    InvalidBounds { minimum: usize, maximum: usize },

    #[error("backoff minimum ({minimum:?}) must not exceed maximum ({maximum:?})")]
    InvalidBackoff { minimum: Duration, maximum: Duration },

    #[error("task factory `{0}` is already registered")]
    DuplicateFactory(String),

    #[error("at least one task factory is required")]
    NoFactories,

    #[error("{0} must not be empty")]
    EmptyName(&'static str),

    #[error("count must be greater than zero")]
    InvalidCount,

    #[error("no tokio runtime available; pass a runtime handle explicitly")]
    NoRuntime,

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("settings error: {0}")]
    Settings(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, RoleworkError>;

/// Reject empty or whitespace-only names.
pub(crate) fn require_name(value: &str, what: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RoleworkError::EmptyName(what));
    }
    Ok(())
}
