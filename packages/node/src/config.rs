//! Node configuration.
//!
//! A plain struct with `Default` plus a builder-style `with_*` API. There is
//! no file/env/CLI loading here — config is assembled programmatically by
//! the embedder, per the engine's explicit scope (config loading is an
//! external concern).

use std::net::Ipv4Addr;
use std::time::Duration;

/// Which built-in conflict resolver a node uses for the field-merge path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverKind {
    #[default]
    LastWriteWins,
    FieldMerge,
}

/// Discovery-specific settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port used for beacons, both broadcast and listen.
    pub udp_port: u16,
    /// Broadcast address beacons are sent to.
    pub broadcast_addr: Ipv4Addr,
    /// Interval between beacon broadcasts.
    pub beacon_interval: Duration,
    /// When true, substitute 127.0.0.1 for the sender IP of received
    /// beacons -- for single-host multi-node test deployments.
    pub loopback_override: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            udp_port: 5000,
            broadcast_addr: Ipv4Addr::new(255, 255, 255, 255),
            beacon_interval: Duration::from_secs(5),
            loopback_override: false,
        }
    }
}

/// Clock robustness settings, passed through to the node's [`meshdoc_core::Hlc`].
#[derive(Debug, Clone, Copy)]
pub struct ClockConfig {
    pub strict_mode: bool,
    pub max_drift_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { strict_mode: false, max_drift_ms: meshdoc_core::Hlc::DEFAULT_MAX_DRIFT_MS }
    }
}

/// Top-level configuration for a [`crate::node::Node`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    /// Address the sync server TCP listener binds to, and the port
    /// advertised in discovery beacons.
    pub bind_tcp: std::net::SocketAddr,
    pub discovery: DiscoveryConfig,
    /// Number of peers contacted per gossip round.
    pub fanout: usize,
    /// Interval between gossip rounds.
    pub sync_interval: Duration,
    /// Per-request network I/O timeout.
    pub request_timeout: Duration,
    /// How long a peer may go without a beacon before eviction.
    pub peer_ttl: Duration,
    /// Interval of the peer directory liveness sweeper.
    pub sweep_interval: Duration,
    /// Payloads at or above this size are Brotli-compressed when both peers
    /// negotiated compression support.
    pub compression_threshold_bytes: usize,
    /// When true, the transport requires and performs the secure (AES-GCM +
    /// ECDH) handshake; when false it only ever speaks plaintext. The two
    /// modes are mutually exclusive per cluster.
    pub secure_mode: bool,
    /// Shared cluster secret compared against incoming `authToken`s.
    pub cluster_secret: String,
    pub resolver: ResolverKind,
    pub clock: ClockConfig,
}

impl NodeConfig {
    /// A minimal config for `node_id` bound to `bind_tcp`, everything else
    /// defaulted.
    #[must_use]
    pub fn new(node_id: impl Into<String>, bind_tcp: std::net::SocketAddr) -> Self {
        Self {
            node_id: node_id.into(),
            bind_tcp,
            discovery: DiscoveryConfig::default(),
            fanout: 3,
            sync_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            peer_ttl: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(10),
            compression_threshold_bytes: 1024,
            secure_mode: false,
            cluster_secret: String::new(),
            resolver: ResolverKind::default(),
            clock: ClockConfig::default(),
        }
    }

    #[must_use]
    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    #[must_use]
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    #[must_use]
    pub fn with_secure_mode(mut self, secure: bool) -> Self {
        self.secure_mode = secure;
        self
    }

    #[must_use]
    pub fn with_cluster_secret(mut self, secret: impl Into<String>) -> Self {
        self.cluster_secret = secret.into();
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: ResolverKind) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: ClockConfig) -> Self {
        self.clock = clock;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_sane_default_cadences() {
        let cfg = NodeConfig::new("n1", "127.0.0.1:0".parse().unwrap());
        assert_eq!(cfg.fanout, 3);
        assert_eq!(cfg.sync_interval, Duration::from_secs(2));
        assert_eq!(cfg.peer_ttl, Duration::from_secs(15));
        assert_eq!(cfg.discovery.beacon_interval, Duration::from_secs(5));
        assert_eq!(cfg.discovery.udp_port, 5000);
        assert_eq!(cfg.compression_threshold_bytes, 1024);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = NodeConfig::new("n1", "127.0.0.1:0".parse().unwrap())
            .with_fanout(5)
            .with_secure_mode(true)
            .with_resolver(ResolverKind::FieldMerge);
        assert_eq!(cfg.fanout, 5);
        assert!(cfg.secure_mode);
        assert_eq!(cfg.resolver, ResolverKind::FieldMerge);
    }
}
