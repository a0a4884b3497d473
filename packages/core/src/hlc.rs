//! Hybrid Logical Clock (HLC) for distributed causality tracking.
//!
//! Produces monotonically increasing [`Timestamp`]s combining physical
//! wall-clock time with a logical counter and the issuing node's id. The
//! total order over timestamps is the causality order the rest of the
//! engine (oplog, merge engine, conflict resolver) relies on.

use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A hybrid logical timestamp: `(wall millis, logical counter, node id)`.
///
/// Ordering compares `wall`, then `counter`, then `node_id` (byte order).
/// The zero value `(0, 0, "")` represents "no information" and compares
/// less than any timestamp actually issued by a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Physical wall-clock milliseconds since the Unix epoch.
    pub wall: u64,
    /// Logical tie-breaker for events within the same millisecond.
    pub logical: u32,
    /// Id of the node that issued this timestamp.
    pub node: String,
}

impl Timestamp {
    /// The "no information" zero timestamp.
    pub const ZERO: Timestamp = Timestamp {
        wall: 0,
        logical: 0,
        node: String::new(),
    };

    /// Serializes to the wire format `"wall:logical:node"`.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parses the wire format `"wall:logical:node"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not exactly three colon-separated
    /// parts, or `wall`/`logical` do not parse as integers.
    pub fn decode(s: &str) -> Result<Timestamp, TimestampParseError> {
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        let [wall_s, logical_s, node] = parts.as_slice() else {
            return Err(TimestampParseError(s.to_string()));
        };
        let wall = wall_s
            .parse::<u64>()
            .map_err(|_| TimestampParseError(s.to_string()))?;
        let logical = logical_s
            .parse::<u32>()
            .map_err(|_| TimestampParseError(s.to_string()))?;
        if node.is_empty() {
            return Err(TimestampParseError(s.to_string()));
        }
        Ok(Timestamp {
            wall,
            logical,
            node: (*node).to_string(),
        })
    }
}

/// Error returned by [`Timestamp::decode`] for a malformed wire string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid timestamp format: {0}")]
pub struct TimestampParseError(pub String);

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall
            .cmp(&other.wall)
            .then_with(|| self.logical.cmp(&other.logical))
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.wall, self.logical, self.node)
    }
}

/// Abstraction over the system clock, for deterministic testing.
pub trait ClockSource: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Default clock source backed by `std::time::SystemTime`.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as u64
    }
}

/// Error raised by [`Hlc::observe`] in strict mode when remote drift exceeds
/// the configured bound.
#[derive(Debug, Clone, thiserror::Error)]
#[error("clock drift detected: remote wall {remote_wall} is {drift_ms}ms ahead of local {local_wall} (threshold {threshold_ms}ms)")]
pub struct ClockDriftError {
    pub remote_wall: u64,
    pub local_wall: u64,
    pub drift_ms: u64,
    pub threshold_ms: u64,
}

/// Node-scoped Hybrid Logical Clock.
///
/// `tick` generates a new timestamp for a local event; `observe` folds a
/// remote timestamp into the local clock so causality carries forward. Both
/// operations maintain strict monotonicity: `tick` never returns a value
/// equal to or less than any timestamp previously returned or observed.
pub struct Hlc {
    last_wall: u64,
    last_logical: u32,
    node_id: String,
    strict_mode: bool,
    max_drift_ms: u64,
    clock_source: Box<dyn ClockSource>,
}

impl Hlc {
    /// Default maximum tolerated drift between a remote timestamp and the
    /// local system clock; in non-strict mode this is only logged.
    pub const DEFAULT_MAX_DRIFT_MS: u64 = 60_000;

    /// Creates a new clock with default options (non-strict, 60s max drift).
    #[must_use]
    pub fn new(node_id: String, clock_source: Box<dyn ClockSource>) -> Self {
        Self::with_options(node_id, clock_source, false, Self::DEFAULT_MAX_DRIFT_MS)
    }

    /// Creates a new clock with explicit strict-mode and drift configuration.
    #[must_use]
    pub fn with_options(
        node_id: String,
        clock_source: Box<dyn ClockSource>,
        strict_mode: bool,
        max_drift_ms: u64,
    ) -> Self {
        Self {
            last_wall: 0,
            last_logical: 0,
            node_id,
            strict_mode,
            max_drift_ms,
            clock_source,
        }
    }

    /// This clock's node id.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The current value without advancing the clock.
    #[must_use]
    pub fn current(&self) -> Timestamp {
        Timestamp {
            wall: self.last_wall,
            logical: self.last_logical,
            node: self.node_id.clone(),
        }
    }

    /// Generates a new, strictly monotonic timestamp for a local event.
    ///
    /// If the system clock has advanced past the last tracked instant, the
    /// logical counter resets to zero; otherwise it increments.
    pub fn tick(&mut self) -> Timestamp {
        let phys = self.clock_source.now_millis();

        if phys > self.last_wall {
            self.last_wall = phys;
            self.last_logical = 0;
        } else {
            self.last_logical += 1;
        }

        self.current()
    }

    /// Folds a remote timestamp into the local clock, preserving causality.
    ///
    /// Must be called on every remote op received (merge engine) so that a
    /// subsequent local `tick()` is guaranteed to exceed any causally prior
    /// remote event. In strict mode, returns an error if the remote wall
    /// clock is further ahead of the local system clock than `max_drift_ms`;
    /// the remote timestamp is still absorbed in non-strict mode, only
    /// logged as a warning (AP behavior: never refuse to converge).
    pub fn observe(&mut self, remote: &Timestamp) -> Result<(), ClockDriftError> {
        let phys = self.clock_source.now_millis();

        if remote.wall > phys {
            let drift = remote.wall - phys;
            if drift > self.max_drift_ms {
                if self.strict_mode {
                    return Err(ClockDriftError {
                        remote_wall: remote.wall,
                        local_wall: phys,
                        drift_ms: drift,
                        threshold_ms: self.max_drift_ms,
                    });
                }
                tracing::warn!(
                    drift_ms = drift,
                    remote_wall = remote.wall,
                    local_wall = phys,
                    threshold_ms = self.max_drift_ms,
                    "clock drift detected"
                );
            }
        }

        let max_wall = self.last_wall.max(phys).max(remote.wall);

        self.last_logical = if max_wall == self.last_wall && max_wall == remote.wall {
            self.last_logical.max(remote.logical) + 1
        } else if max_wall == self.last_wall {
            self.last_logical + 1
        } else if max_wall == remote.wall {
            remote.logical + 1
        } else {
            0
        };
        self.last_wall = max_wall;
        Ok(())
    }
}
