//! Sync Orchestrator: the active side of anti-entropy. Periodically samples
//! the peer directory and runs a bounded-fanout gossip round.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use meshdoc_core::wire::{AckRes, ChangeSetRes, ClockRes, GetClockReq, MessageType, ProtoOplogEntry, PullChangesReq, PushChangesReq};
use meshdoc_core::{ConflictResolver, Hlc, OplogEntry, Store, Timestamp};
use rand::seq::SliceRandom;
use tokio::sync::{watch, Mutex};

use crate::directory::PeerDirectory;
use crate::error::NodeError;
use crate::transport::SessionPool;

/// Drives gossip-fanout anti-entropy rounds.
pub struct SyncOrchestrator {
    directory: Arc<PeerDirectory>,
    pool: Arc<SessionPool>,
    store: Arc<dyn Store>,
    resolver: Arc<dyn ConflictResolver>,
    hlc: Arc<Mutex<Hlc>>,
    fanout: usize,
    sync_interval: Duration,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(
        directory: Arc<PeerDirectory>,
        pool: Arc<SessionPool>,
        store: Arc<dyn Store>,
        resolver: Arc<dyn ConflictResolver>,
        hlc: Arc<Mutex<Hlc>>,
        fanout: usize,
        sync_interval: Duration,
    ) -> Self {
        Self { directory, pool, store, resolver, hlc, fanout, sync_interval }
    }

    /// Runs the periodic gossip loop until `shutdown` fires. Each round
    /// samples up to `fanout` peers and runs `sync_with` on each
    /// concurrently.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.sync_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_round().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("orchestrator stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn run_round(&self) {
        let mut peers = self.directory.snapshot();
        let mut rng = rand::rng();
        peers.shuffle(&mut rng);
        let targets = peers.into_iter().take(self.fanout);

        let mut handles = Vec::new();
        for peer in targets {
            handles.push(self.sync_with(peer.node_id.clone(), peer.address));
        }
        futures_util::future::join_all(handles).await;
    }

    /// Runs one anti-entropy exchange with `target`: compares clocks, then
    /// pulls or pushes the delta. A no-op if clocks are equal.
    pub async fn sync_with(&self, peer_node_id: String, address: SocketAddr) {
        if let Err(e) = self.try_sync_with(&peer_node_id, address).await {
            tracing::warn!(peer = %peer_node_id, error = %e, "sync round failed, evicting session");
            self.pool.evict(&peer_node_id);
        }
    }

    async fn try_sync_with(&self, peer_node_id: &str, address: SocketAddr) -> Result<(), NodeError> {
        let handle = self.pool.get_or_connect(peer_node_id, address).await?;
        let mut session = handle.lock().await;

        session.send(MessageType::GetClockReq, &GetClockReq).await?;
        let (msg_type, remote_clock): (MessageType, ClockRes) = session.recv().await?;
        if msg_type != MessageType::ClockRes {
            return Err(NodeError::ProtocolViolation(format!("expected ClockRes, got {msg_type:?}")));
        }
        let remote_clock = Timestamp::from(&remote_clock);
        let local_clock = self.store.get_latest_timestamp().await?;

        if remote_clock > local_clock {
            session.send(MessageType::PullChangesReq, &PullChangesReq::from(&local_clock)).await?;
            let (msg_type, change_set): (MessageType, ChangeSetRes) = session.recv().await?;
            if msg_type != MessageType::ChangeSetRes {
                return Err(NodeError::ProtocolViolation(format!("expected ChangeSetRes, got {msg_type:?}")));
            }
            let entries: Result<Vec<OplogEntry>, _> = change_set.entries.into_iter().map(OplogEntry::try_from).collect();
            let entries = entries.map_err(|e| NodeError::ProtocolViolation(format!("bad oplog entry: {e}")))?;

            let mut hlc = self.hlc.lock().await;
            meshdoc_core::apply_batch(self.store.as_ref(), self.resolver.as_ref(), &mut hlc, entries).await?;
        } else if local_clock > remote_clock {
            let entries = self.store.get_oplog_after(&remote_clock).await?;
            let proto: Vec<ProtoOplogEntry> = entries.iter().map(ProtoOplogEntry::from).collect();
            session.send(MessageType::PushChangesReq, &PushChangesReq { entries: proto }).await?;
            let (msg_type, ack): (MessageType, AckRes) = session.recv().await?;
            if msg_type != MessageType::AckRes {
                return Err(NodeError::ProtocolViolation(format!("expected AckRes, got {msg_type:?}")));
            }
            if !ack.success {
                return Err(NodeError::ProtocolViolation(format!("peer {peer_node_id} rejected push")));
            }
        }
        // Equal clocks: no-op.

        Ok(())
    }
}
