//! Top-level `Node`: wires storage, clock, peer directory, transport, sync
//! server and orchestrator together behind the deferred-startup lifecycle
//! (`new` / `start` / `serve`) the rest of this crate follows.

use std::sync::Arc;
use std::time::Duration;

use meshdoc_core::{
    ConflictResolver, Document, FieldMerge, Hlc, LastWriteWins, OplogEntry, Store, SystemClock, Timestamp,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::config::{NodeConfig, ResolverKind};
use crate::directory::PeerDirectory;
use crate::discovery;
use crate::error::NodeError;
use crate::identity::NodeIdentity;
use crate::orchestrator::SyncOrchestrator;
use crate::server::SyncServer;
use crate::shutdown::ShutdownController;
use crate::transport::{SessionConfig, SessionPool};

/// Resources bound during [`Node::start`] and consumed by [`Node::serve`].
pub struct BoundNode {
    listener: TcpListener,
    addr: std::net::SocketAddr,
}

impl BoundNode {
    #[must_use]
    pub fn addr(&self) -> std::net::SocketAddr {
        self.addr
    }
}

/// A single MeshDoc node: a document store plus its replication machinery.
pub struct Node {
    config: NodeConfig,
    identity: NodeIdentity,
    store: Arc<dyn Store>,
    resolver: Arc<dyn ConflictResolver>,
    hlc: Arc<Mutex<Hlc>>,
    directory: Arc<PeerDirectory>,
    pool: Arc<SessionPool>,
    server: Arc<SyncServer>,
    orchestrator: Arc<SyncOrchestrator>,
    shutdown: Arc<ShutdownController>,
}

impl Node {
    /// Assembles shared state without touching the network. No socket is
    /// bound until [`Node::start`].
    #[must_use]
    pub fn new(config: NodeConfig, identity: NodeIdentity, store: Arc<dyn Store>) -> Self {
        let resolver: Arc<dyn ConflictResolver> = match config.resolver {
            ResolverKind::LastWriteWins => Arc::new(LastWriteWins),
            ResolverKind::FieldMerge => Arc::new(FieldMerge),
        };
        let hlc = Arc::new(Mutex::new(Hlc::with_options(
            config.node_id.clone(),
            Box::new(SystemClock),
            config.clock.strict_mode,
            config.clock.max_drift_ms,
        )));
        let directory = Arc::new(PeerDirectory::new(config.peer_ttl));
        let shutdown = Arc::new(ShutdownController::new());

        let pool = Arc::new(SessionPool::new(SessionConfig {
            node_id: config.node_id.clone(),
            cluster_secret: identity.cluster_auth_token.clone(),
            secure_mode: config.secure_mode,
            compression_threshold: config.compression_threshold_bytes,
            request_timeout: config.request_timeout,
        }));

        let server = Arc::new(SyncServer::new(
            config.bind_tcp,
            identity.clone(),
            config.secure_mode,
            config.compression_threshold_bytes,
            Arc::clone(&store),
            Arc::clone(&resolver),
            Arc::clone(&hlc),
            Arc::clone(&shutdown),
        ));

        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&directory),
            Arc::clone(&pool),
            Arc::clone(&store),
            Arc::clone(&resolver),
            Arc::clone(&hlc),
            config.fanout,
            config.sync_interval,
        ));

        Self { config, identity, store, resolver, hlc, directory, pool, server, orchestrator, shutdown }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Writes `body` under `(collection, key)`, ticking the local clock and
    /// going through the same merge-engine path a remote batch takes (called
    /// here with a batch of one).
    pub async fn put(&self, collection: &str, key: &str, body: String) -> Result<Timestamp, NodeError> {
        let mut hlc = self.hlc.lock().await;
        let ts = hlc.tick();
        let entry = OplogEntry::put(collection, key, body, ts.clone());
        meshdoc_core::apply_batch(self.store.as_ref(), self.resolver.as_ref(), &mut hlc, vec![entry]).await?;
        Ok(ts)
    }

    /// Tombstones `(collection, key)`, ticking the local clock and going
    /// through the merge engine the same way [`Self::put`] does.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<Timestamp, NodeError> {
        let mut hlc = self.hlc.lock().await;
        let ts = hlc.tick();
        let entry = OplogEntry::delete(collection, key, ts.clone());
        meshdoc_core::apply_batch(self.store.as_ref(), self.resolver.as_ref(), &mut hlc, vec![entry]).await?;
        Ok(ts)
    }

    /// Fetches the current row for `(collection, key)`, if any (including
    /// tombstones).
    pub async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, NodeError> {
        Ok(self.store.get_document(collection, key).await?)
    }

    #[must_use]
    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    #[must_use]
    pub fn session_pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    #[must_use]
    pub fn hlc(&self) -> &Arc<Mutex<Hlc>> {
        &self.hlc
    }

    /// Binds the sync server's TCP listener. Separated from [`Self::serve`]
    /// so a bound but not-yet-serving node can report its address (tests
    /// commonly bind to port 0 and need the assigned port back).
    ///
    /// Also recovers clock state from the store: observes the maximum HLC
    /// already recorded in the oplog so a restart against a non-empty store
    /// can never tick a timestamp lower than one already durably stored.
    pub async fn start(&self) -> Result<BoundNode, NodeError> {
        let recovered = self.store.get_latest_timestamp().await?;
        if recovered > Timestamp::ZERO {
            self.hlc.lock().await.observe(&recovered).map_err(meshdoc_core::CoreError::from)?;
        }

        let (listener, addr) = self.server.start().await?;
        Ok(BoundNode { listener, addr })
    }

    /// Runs every background loop -- sync server, discovery emitter and
    /// listener, peer directory sweeper, sync orchestrator -- until
    /// [`Self::shutdown`] is called, then cancels them in the engine's
    /// required order: orchestrator first, then discovery, then the server,
    /// before waiting for in-flight connection handlers to drain.
    pub async fn serve(self: Arc<Self>, bound: BoundNode) {
        self.shutdown.set_ready();

        let server_task = tokio::spawn(Arc::clone(&self.server).serve(bound.listener, self.shutdown.shutdown_receiver()));

        let emitter_task = discovery::spawn_emitter(
            self.identity.node_id.clone(),
            bound.addr.port(),
            self.config.discovery.clone(),
            self.shutdown.shutdown_receiver(),
        );

        let listener_task = match discovery::spawn_listener(
            self.identity.node_id.clone(),
            self.config.discovery.clone(),
            Arc::clone(&self.directory),
            self.shutdown.shutdown_receiver(),
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "discovery listener failed to start, continuing without it");
                None
            }
        };

        let sweeper_task = self.directory.spawn_sweeper(self.config.sweep_interval, self.shutdown.shutdown_receiver());

        let orchestrator_task = tokio::spawn(Arc::clone(&self.orchestrator).run(self.shutdown.shutdown_receiver()));

        let mut rx = self.shutdown.shutdown_receiver();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }

        let _ = tokio::time::timeout(Duration::from_secs(5), orchestrator_task).await;
        emitter_task.abort();
        if let Some(handle) = listener_task {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        sweeper_task.abort();
        let _ = tokio::time::timeout(Duration::from_secs(5), server_task).await;

        self.shutdown.wait_for_drain(Duration::from_secs(5)).await;
    }

    /// Triggers the shutdown sequence described in [`Self::serve`].
    pub fn shutdown(&self) {
        self.shutdown.trigger_shutdown();
    }
}
