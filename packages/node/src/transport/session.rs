//! A single peer-to-peer sync session: connection state plus the framed,
//! optionally compressed and encrypted message exchange built on top of it.

use meshdoc_core::wire::MessageType;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;

use super::framing::{self, RawFrame};
use super::secure::SessionKey;
use crate::error::NodeError;

/// Per-connection state machine. Only `Ready` accepts data exchanges;
/// `Failed` forces pool eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Connecting,
    Handshaking,
    Ready,
    Closed,
    Failed,
}

const GCM_TAG_LEN: usize = 16;

/// A long-lived, authenticated, optionally encrypted TCP connection reused
/// across successive sync exchanges.
pub struct Session {
    stream: TcpStream,
    pub peer_node_id: String,
    pub state: SessionState,
    pub compression_negotiated: bool,
    pub session_key: Option<SessionKey>,
    pub compression_threshold: usize,
}

impl Session {
    #[must_use]
    pub fn new(stream: TcpStream, peer_node_id: impl Into<String>, compression_threshold: usize) -> Self {
        Self {
            stream,
            peer_node_id: peer_node_id.into(),
            state: SessionState::New,
            compression_negotiated: false,
            session_key: None,
            compression_threshold,
        }
    }

    pub fn mark_failed(&mut self) {
        self.state = SessionState::Failed;
    }

    /// Serializes `msg` with MessagePack and sends it as one frame,
    /// compressing and/or encrypting as this session has negotiated.
    pub async fn send<T: Serialize + Sync>(&mut self, msg_type: MessageType, msg: &T) -> Result<(), NodeError> {
        let payload = rmp_serde::to_vec_named(msg)
            .map_err(|e| NodeError::ProtocolViolation(format!("encode failed: {e}")))?;
        self.send_raw(msg_type as u8, payload).await
    }

    async fn send_raw(&mut self, msg_type: u8, payload: Vec<u8>) -> Result<(), NodeError> {
        let (payload, flags) = framing::maybe_compress(payload, self.compression_negotiated, self.compression_threshold);

        if let Some(key) = &self.session_key {
            let mut inner = Vec::with_capacity(payload.len() + 2);
            inner.push(msg_type);
            inner.push(flags);
            inner.extend_from_slice(&payload);

            let (mut ciphertext, nonce) = key.encrypt(&inner)?;
            let tag_start = ciphertext.len().saturating_sub(GCM_TAG_LEN);
            let auth_tag = ciphertext.split_off(tag_start);
            let envelope = meshdoc_core::wire::SecureEnv { ciphertext, nonce, auth_tag };
            let envelope_bytes = rmp_serde::to_vec_named(&envelope)
                .map_err(|e| NodeError::ProtocolViolation(format!("encode envelope failed: {e}")))?;
            framing::write_frame(&mut self.stream, MessageType::SecureEnv as u8, 0, &envelope_bytes).await
        } else {
            framing::write_frame(&mut self.stream, msg_type, flags, &payload).await
        }
    }

    /// Reads one frame and returns its logical type plus decompressed,
    /// decrypted payload bytes.
    pub async fn recv_raw(&mut self) -> Result<(MessageType, Vec<u8>), NodeError> {
        let frame: RawFrame = framing::read_frame(&mut self.stream).await?;

        if frame.msg_type == MessageType::SecureEnv as u8 {
            let Some(key) = &self.session_key else {
                return Err(NodeError::ProtocolViolation("received SecureEnv on a plaintext session".into()));
            };
            let envelope: meshdoc_core::wire::SecureEnv = rmp_serde::from_slice(&frame.payload)
                .map_err(|e| NodeError::ProtocolViolation(format!("bad envelope: {e}")))?;
            let mut combined = envelope.ciphertext;
            combined.extend_from_slice(&envelope.auth_tag);
            let inner = key.decrypt(&combined, &envelope.nonce)?;
            let (&orig_type, rest) = inner
                .split_first()
                .ok_or_else(|| NodeError::ProtocolViolation("empty secure envelope".into()))?;
            let (&orig_flags, payload) =
                rest.split_first().ok_or_else(|| NodeError::ProtocolViolation("truncated secure envelope".into()))?;
            let msg_type = MessageType::from_u8(orig_type)
                .ok_or_else(|| NodeError::ProtocolViolation(format!("unknown inner type {orig_type}")))?;
            let payload = framing::maybe_decompress(payload.to_vec(), orig_flags)?;
            Ok((msg_type, payload))
        } else {
            let msg_type = MessageType::from_u8(frame.msg_type)
                .ok_or_else(|| NodeError::ProtocolViolation(format!("unknown type {}", frame.msg_type)))?;
            let payload = framing::maybe_decompress(frame.payload, frame.flags)?;
            Ok((msg_type, payload))
        }
    }

    /// Reads one frame and decodes its payload as `T`.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<(MessageType, T), NodeError> {
        let (msg_type, payload) = self.recv_raw().await?;
        let value = rmp_serde::from_slice(&payload)
            .map_err(|e| NodeError::ProtocolViolation(format!("decode failed: {e}")))?;
        Ok((msg_type, value))
    }
}

#[cfg(test)]
mod tests {
    use meshdoc_core::wire::{AckRes, HandshakeReq};
    use tokio::net::TcpListener;

    use super::*;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (server, (client, _)) = tokio::join!(connect, async { listener.accept().await.unwrap() });
        (server.unwrap(), client)
    }

    #[tokio::test]
    async fn plaintext_message_roundtrips() {
        let (client_stream, server_stream) = connected_pair().await;
        let mut client = Session::new(client_stream, "server", 1024);
        let mut server = Session::new(server_stream, "client", 1024);

        let req = HandshakeReq {
            node_id: "client".into(),
            auth_token: "secret".into(),
            supported_compression: vec!["brotli".into()],
            ecdh_public_key: None,
        };
        client.send(MessageType::HandshakeReq, &req).await.unwrap();
        let (msg_type, decoded): (MessageType, HandshakeReq) = server.recv().await.unwrap();

        assert_eq!(msg_type, MessageType::HandshakeReq);
        assert_eq!(decoded, req);
    }

    #[tokio::test]
    async fn compressed_large_payload_roundtrips() {
        let (client_stream, server_stream) = connected_pair().await;
        let mut client = Session::new(client_stream, "server", 16);
        client.compression_negotiated = true;
        let mut server = Session::new(server_stream, "client", 16);
        server.compression_negotiated = true;

        let req = HandshakeReq {
            node_id: "x".repeat(4096),
            auth_token: "secret".into(),
            supported_compression: vec!["brotli".into()],
            ecdh_public_key: None,
        };
        client.send(MessageType::HandshakeReq, &req).await.unwrap();
        let (_, decoded): (MessageType, HandshakeReq) = server.recv().await.unwrap();
        assert_eq!(decoded, req);
    }

    #[tokio::test]
    async fn secure_session_encrypts_and_decrypts() {
        use super::super::secure::EphemeralKeyPair;

        let (client_stream, server_stream) = connected_pair().await;
        let mut client = Session::new(client_stream, "server", 1024);
        let mut server = Session::new(server_stream, "client", 1024);

        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        client.session_key = Some(a.derive_session_key(&b.public_bytes).unwrap());
        server.session_key = Some(b.derive_session_key(&a.public_bytes).unwrap());

        client.send(MessageType::AckRes, &AckRes { success: true }).await.unwrap();
        let (msg_type, decoded): (MessageType, AckRes) = server.recv().await.unwrap();

        assert_eq!(msg_type, MessageType::AckRes);
        assert!(decoded.success);
    }

    #[tokio::test]
    async fn secure_peer_cannot_be_read_by_plaintext_session() {
        use super::super::secure::EphemeralKeyPair;

        let (client_stream, server_stream) = connected_pair().await;
        let mut client = Session::new(client_stream, "server", 1024);
        let mut server = Session::new(server_stream, "client", 1024);

        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        client.session_key = Some(a.derive_session_key(&b.public_bytes).unwrap());
        // server has no session key: plaintext mode.

        client.send(MessageType::AckRes, &AckRes { success: true }).await.unwrap();
        let err = server.recv_raw().await.unwrap_err();
        assert!(matches!(err, NodeError::ProtocolViolation(_)));
    }
}
