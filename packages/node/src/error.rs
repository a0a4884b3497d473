//! Node-level error type, matching the error kinds enumerated in the
//! component design's error handling section.

use thiserror::Error;

/// Errors raised by `meshdoc-node`: transport, handshake, discovery, and
/// store-adapter failures.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Connect refused, read timeout, broken pipe. Recoverable: the caller
    /// evicts the session and retries next round.
    #[error("transient network error: {0}")]
    TransientNetwork(#[source] std::io::Error),

    /// Unknown frame type, length overflow, malformed payload. The
    /// connection is closed and not retried on the same session.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// `authToken` mismatch during handshake.
    #[error("authentication failed for peer {peer}")]
    AuthenticationFailed { peer: String },

    /// Per-request I/O exceeded the configured timeout.
    #[error("request to {peer} timed out after {timeout_ms}ms")]
    Timeout { peer: String, timeout_ms: u64 },

    #[error("store error: {0}")]
    Store(#[from] meshdoc_core::StoreError),

    #[error(transparent)]
    Core(#[from] meshdoc_core::CoreError),

    #[error("secure channel error: {0}")]
    Secure(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    /// Fatal: storage integrity check failure or inability to bind the
    /// configured TCP port. The node must halt.
    #[error("fatal: {0}")]
    Fatal(String),
}
