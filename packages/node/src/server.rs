//! Sync Server: the passive side of anti-entropy. One accept loop; one
//! independent handler task per connection; a server never initiates
//! messages.

use std::net::SocketAddr;
use std::sync::Arc;

use meshdoc_core::wire::{
    AckRes, ChangeSetRes, ClockRes, HandshakeReq, HandshakeRes, MessageType, ProtoOplogEntry, PullChangesReq,
    PushChangesReq,
};
use meshdoc_core::{ConflictResolver, Hlc, OplogEntry, Store};
use subtle::ConstantTimeEq;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};

use crate::error::NodeError;
use crate::identity::NodeIdentity;
use crate::shutdown::ShutdownController;
use crate::transport::secure::EphemeralKeyPair;
use crate::transport::session::{Session, SessionState};

/// Passive sync server: binds a TCP listener and answers handshake/clock/
/// pull/push requests from peers. Follows a deferred-startup lifecycle:
/// [`SyncServer::new`] allocates shared state without binding,
/// [`SyncServer::start`] binds the listener, [`SyncServer::serve`] consumes
/// it and runs the accept loop until shutdown.
pub struct SyncServer {
    bind_addr: SocketAddr,
    identity: NodeIdentity,
    secure_mode: bool,
    compression_threshold: usize,
    store: Arc<dyn Store>,
    resolver: Arc<dyn ConflictResolver>,
    hlc: Arc<Mutex<Hlc>>,
    shutdown: Arc<ShutdownController>,
}

impl SyncServer {
    #[must_use]
    pub fn new(
        bind_addr: SocketAddr,
        identity: NodeIdentity,
        secure_mode: bool,
        compression_threshold: usize,
        store: Arc<dyn Store>,
        resolver: Arc<dyn ConflictResolver>,
        hlc: Arc<Mutex<Hlc>>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self { bind_addr, identity, secure_mode, compression_threshold, store, resolver, hlc, shutdown }
    }

    /// Binds the listener and returns the bound local address (useful when
    /// `bind_addr`'s port is 0, e.g. in tests).
    pub async fn start(&self) -> Result<(TcpListener, SocketAddr), NodeError> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| NodeError::Fatal(format!("failed to bind sync server to {}: {e}", self.bind_addr)))?;
        let addr = listener.local_addr().map_err(NodeError::TransientNetwork)?;
        tracing::info!(addr = %addr, "sync server listening");
        Ok((listener, addr))
    }

    /// Accepts connections until shutdown fires. Spawns one independent
    /// handler task per connection; a connection's failure never affects
    /// others.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(&self);
                            let guard = server.shutdown.in_flight_guard();
                            tokio::spawn(async move {
                                let _guard = guard;
                                if let Err(e) = server.handle_connection(stream).await {
                                    tracing::warn!(peer = %peer_addr, error = %e, "sync connection terminated");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "sync server accept failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("sync server stopping accept loop");
                        return;
                    }
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<(), NodeError> {
        let mut session = Session::new(stream, "unknown", self.compression_threshold);
        session.state = SessionState::Handshaking;
        self.handle_handshake(&mut session).await?;
        session.state = SessionState::Ready;

        loop {
            let (msg_type, payload) = match session.recv_raw().await {
                Ok(v) => v,
                Err(_) => return Ok(()), // peer closed the connection; not an error
            };
            self.dispatch(&mut session, msg_type, payload).await?;
        }
    }

    async fn handle_handshake(&self, session: &mut Session) -> Result<(), NodeError> {
        let (msg_type, req): (MessageType, HandshakeReq) = session.recv().await?;
        if msg_type != MessageType::HandshakeReq {
            return Err(NodeError::ProtocolViolation(format!("expected HandshakeReq, got {msg_type:?}")));
        }

        let authorized: bool = req.auth_token.as_bytes().ct_eq(self.identity.cluster_auth_token.as_bytes()).into();
        let peer_wants_secure = req.ecdh_public_key.is_some();

        // Secure and plaintext modes are mutually exclusive per cluster.
        let mode_matches = peer_wants_secure == self.secure_mode;

        if !authorized || !mode_matches {
            tracing::warn!(peer = %req.node_id, authorized, mode_matches, "handshake rejected");
            let res = HandshakeRes { node_id: self.identity.node_id.clone(), accepted: false, selected_compression: None, ecdh_public_key: None };
            session.send(MessageType::HandshakeRes, &res).await?;
            return Err(NodeError::AuthenticationFailed { peer: req.node_id });
        }

        let selected_compression =
            req.supported_compression.iter().any(|c| c == "brotli").then(|| "brotli".to_string());
        session.compression_negotiated = selected_compression.is_some();

        let mut our_keypair = None;
        let ecdh_public_key = if self.secure_mode {
            let kp = EphemeralKeyPair::generate();
            let bytes = kp.public_bytes.clone();
            our_keypair = Some(kp);
            Some(bytes)
        } else {
            None
        };

        let res = HandshakeRes {
            node_id: self.identity.node_id.clone(),
            accepted: true,
            selected_compression,
            ecdh_public_key,
        };
        session.send(MessageType::HandshakeRes, &res).await?;

        if let (Some(kp), Some(peer_public)) = (our_keypair, req.ecdh_public_key) {
            session.session_key = Some(kp.derive_session_key(&peer_public)?);
        }

        session.peer_node_id = req.node_id;
        Ok(())
    }

    async fn dispatch(&self, session: &mut Session, msg_type: MessageType, payload: Vec<u8>) -> Result<(), NodeError> {
        match msg_type {
            MessageType::GetClockReq => {
                let clock = self.hlc.lock().await.current();
                session.send(MessageType::ClockRes, &ClockRes::from(&clock)).await
            }
            MessageType::PullChangesReq => {
                let req: PullChangesReq = rmp_serde::from_slice(&payload)
                    .map_err(|e| NodeError::ProtocolViolation(format!("bad PullChangesReq: {e}")))?;
                let since = meshdoc_core::Timestamp {
                    wall: req.since_wall,
                    logical: req.since_logical,
                    node: req.since_node,
                };
                let entries = self.store.get_oplog_after(&since).await?;
                let proto: Vec<ProtoOplogEntry> = entries.iter().map(ProtoOplogEntry::from).collect();
                session.send(MessageType::ChangeSetRes, &ChangeSetRes { entries: proto }).await
            }
            MessageType::PushChangesReq => {
                let req: PushChangesReq = rmp_serde::from_slice(&payload)
                    .map_err(|e| NodeError::ProtocolViolation(format!("bad PushChangesReq: {e}")))?;
                let entries: Result<Vec<OplogEntry>, _> =
                    req.entries.into_iter().map(OplogEntry::try_from).collect();
                let entries =
                    entries.map_err(|e| NodeError::ProtocolViolation(format!("bad oplog entry: {e}")))?;

                let success = {
                    let mut hlc = self.hlc.lock().await;
                    meshdoc_core::apply_batch(self.store.as_ref(), self.resolver.as_ref(), &mut hlc, entries)
                        .await
                        .is_ok()
                };
                session.send(MessageType::AckRes, &AckRes { success }).await
            }
            other => Err(NodeError::ProtocolViolation(format!("unexpected request type {other:?}"))),
        }
    }
}
