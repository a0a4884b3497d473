//! Peer directory: the membership set of discovered peers with liveness.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;

/// A known peer: its stable id, its advertised sync address, and when its
/// last beacon arrived.
#[derive(Debug, Clone)]
pub struct PeerDescriptor {
    pub node_id: String,
    pub address: SocketAddr,
    pub last_seen: Instant,
}

/// Liveness state of a peer, per the `Unknown -> Alive -> Expired` machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Expired,
}

/// Thread-safe `nodeId -> PeerDescriptor` map with a background sweeper.
///
/// The local node is never inserted into its own directory -- callers must
/// filter it out at the beacon-listener boundary (see [`crate::discovery`]).
pub struct PeerDirectory {
    peers: DashMap<String, PeerDescriptor>,
    ttl: Duration,
}

impl PeerDirectory {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { peers: DashMap::new(), ttl }
    }

    /// Inserts or refreshes a peer's `last_seen`.
    pub fn upsert(&self, node_id: impl Into<String>, address: SocketAddr) {
        let node_id = node_id.into();
        self.peers
            .entry(node_id.clone())
            .and_modify(|p| {
                p.address = address;
                p.last_seen = Instant::now();
            })
            .or_insert_with(|| PeerDescriptor { node_id, address, last_seen: Instant::now() });
    }

    /// An independent copy of all currently tracked peers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PeerDescriptor> {
        self.peers.iter().map(|e| e.value().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    #[must_use]
    pub fn liveness(&self, node_id: &str) -> Option<Liveness> {
        self.peers.get(node_id).map(|p| {
            if p.last_seen.elapsed() > self.ttl {
                Liveness::Expired
            } else {
                Liveness::Alive
            }
        })
    }

    /// Evicts every peer whose `last_seen` exceeds the configured TTL.
    /// Returns the ids evicted.
    pub fn sweep(&self) -> Vec<String> {
        let expired: Vec<String> = self
            .peers
            .iter()
            .filter(|e| e.value().last_seen.elapsed() > self.ttl)
            .map(|e| e.key().clone())
            .collect();
        for id in &expired {
            self.peers.remove(id);
        }
        expired
    }

    /// Spawns the background sweeper task. Exits cleanly when `shutdown`
    /// fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        sweep_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let directory = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = directory.sweep();
                        for id in evicted {
                            tracing::info!(peer = %id, "evicted expired peer");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }
}
