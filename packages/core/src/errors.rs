//! Core library error type.

use thiserror::Error;

use crate::hlc::{ClockDriftError, TimestampParseError};

/// Errors raised by `meshdoc-core`: HLC, resolver, and merge-engine failures.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("clock drift rejected: {0}")]
    ClockDrift(#[from] ClockDriftError),

    #[error("invalid HLC timestamp: {0}")]
    InvalidTimestamp(#[from] TimestampParseError),

    #[error("resolver failed to parse document body as JSON: {0}")]
    ResolverJson(#[source] serde_json::Error),

    #[error("store operation failed: {0}")]
    Store(String),
}
