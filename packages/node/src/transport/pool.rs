//! Session pool: one reusable, exclusively-owned session per peer.
//!
//! Sessions are long-lived and reused across sync rounds; the orchestrator
//! discards a session on any error and reconnects on the next round. Each
//! session is wrapped in a `tokio::sync::Mutex` so at most one task ever
//! drives its request/response exchange at a time -- the async equivalent
//! of the compare-and-swap ownership the design calls for.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use meshdoc_core::wire::{HandshakeReq, HandshakeRes, MessageType};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::secure::EphemeralKeyPair;
use super::session::{Session, SessionState};
use crate::error::NodeError;

/// Shared configuration needed to open and authenticate a new session.
#[derive(Clone)]
pub struct SessionConfig {
    pub node_id: String,
    pub cluster_secret: String,
    pub secure_mode: bool,
    pub compression_threshold: usize,
    pub request_timeout: Duration,
}

/// Pool of reusable sessions, keyed by peer node id.
pub struct SessionPool {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    config: SessionConfig,
}

impl SessionPool {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self { sessions: DashMap::new(), config }
    }

    /// Returns the pooled session for `peer_node_id`, connecting and
    /// handshaking a new one at `address` if none is pooled.
    pub async fn get_or_connect(
        &self,
        peer_node_id: &str,
        address: SocketAddr,
    ) -> Result<Arc<Mutex<Session>>, NodeError> {
        if let Some(existing) = self.sessions.get(peer_node_id) {
            return Ok(Arc::clone(&existing));
        }

        let session = tokio::time::timeout(self.config.request_timeout, connect_and_handshake(&self.config, address))
            .await
            .map_err(|_| NodeError::Timeout { peer: peer_node_id.to_string(), timeout_ms: self.config.request_timeout.as_millis() as u64 })??;

        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(peer_node_id.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Evicts a session, e.g. after an error mid-exchange. The next round
    /// will reconnect.
    pub fn evict(&self, peer_node_id: &str) {
        self.sessions.remove(peer_node_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

async fn connect_and_handshake(config: &SessionConfig, address: SocketAddr) -> Result<Session, NodeError> {
    let stream = TcpStream::connect(address).await.map_err(NodeError::TransientNetwork)?;
    let mut session = Session::new(stream, "unknown", config.compression_threshold);
    session.state = SessionState::Connecting;

    let keypair = config.secure_mode.then(EphemeralKeyPair::generate);
    session.state = SessionState::Handshaking;

    let req = HandshakeReq {
        node_id: config.node_id.clone(),
        auth_token: config.cluster_secret.clone(),
        supported_compression: vec!["brotli".to_string()],
        ecdh_public_key: keypair.as_ref().map(|k| k.public_bytes.clone()),
    };
    session.send(MessageType::HandshakeReq, &req).await?;

    let (msg_type, res): (MessageType, HandshakeRes) = session.recv().await?;
    if msg_type != MessageType::HandshakeRes {
        session.mark_failed();
        return Err(NodeError::ProtocolViolation(format!("expected HandshakeRes, got {msg_type:?}")));
    }
    if !res.accepted {
        session.mark_failed();
        return Err(NodeError::AuthenticationFailed { peer: address.to_string() });
    }

    session.peer_node_id = res.node_id;
    session.compression_negotiated = res.selected_compression.is_some();

    if let (Some(local_keypair), Some(peer_public)) = (keypair, res.ecdh_public_key) {
        session.session_key = Some(local_keypair.derive_session_key(&peer_public)?);
    } else if config.secure_mode {
        session.mark_failed();
        return Err(NodeError::Secure("secure mode required but peer did not complete ECDH".into()));
    }

    session.state = SessionState::Ready;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            node_id: "local".into(),
            cluster_secret: "s3cr3t".into(),
            secure_mode: false,
            compression_threshold: 1024,
            request_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn evict_removes_pooled_session() {
        let pool = SessionPool::new(config());
        assert!(pool.is_empty());
        pool.evict("ghost"); // no-op, nothing pooled
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn get_or_connect_fails_fast_on_refused_connection() {
        let pool = SessionPool::new(config());
        // Port 1 is reserved and should refuse immediately in test sandboxes.
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = pool.get_or_connect("peer", addr).await;
        assert!(result.is_err());
        assert!(pool.is_empty());
    }
}
