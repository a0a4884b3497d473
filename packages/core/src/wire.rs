//! Wire message types exchanged over the sync transport.
//!
//! Encoded with MessagePack (`rmp-serde`) inside the length-prefixed frame
//! the transport defines; this module only owns the typed payload shapes.

use serde::{Deserialize, Serialize};

use crate::hlc::Timestamp;
use crate::oplog::{Op, OplogEntry};

/// The closed set of frame payload kinds, carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    HandshakeReq = 0,
    HandshakeRes = 1,
    GetClockReq = 2,
    ClockRes = 3,
    PullChangesReq = 4,
    ChangeSetRes = 5,
    PushChangesReq = 6,
    AckRes = 7,
    SecureEnv = 8,
}

impl MessageType {
    /// Recovers a variant from its wire byte.
    #[must_use]
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::HandshakeReq,
            1 => Self::HandshakeRes,
            2 => Self::GetClockReq,
            3 => Self::ClockRes,
            4 => Self::PullChangesReq,
            5 => Self::ChangeSetRes,
            6 => Self::PushChangesReq,
            7 => Self::AckRes,
            8 => Self::SecureEnv,
            _ => return None,
        })
    }
}

/// Wire-friendly oplog entry, with HLC fields flattened for encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtoOplogEntry {
    pub collection: String,
    pub key: String,
    pub operation: String,
    pub json_data: Option<String>,
    pub hlc_wall: u64,
    pub hlc_logical: u32,
    pub hlc_node: String,
}

impl From<&OplogEntry> for ProtoOplogEntry {
    fn from(e: &OplogEntry) -> Self {
        Self {
            collection: e.collection.clone(),
            key: e.key.clone(),
            operation: match e.op {
                Op::Put => "Put".to_string(),
                Op::Delete => "Delete".to_string(),
            },
            json_data: e.body.clone(),
            hlc_wall: e.timestamp.wall,
            hlc_logical: e.timestamp.logical,
            hlc_node: e.timestamp.node.clone(),
        }
    }
}

/// Error converting a [`ProtoOplogEntry`] back into an [`OplogEntry`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid wire oplog entry: unknown operation {0:?}")]
pub struct ProtoDecodeError(pub String);

impl TryFrom<ProtoOplogEntry> for OplogEntry {
    type Error = ProtoDecodeError;

    fn try_from(p: ProtoOplogEntry) -> Result<Self, Self::Error> {
        let op = match p.operation.as_str() {
            "Put" => Op::Put,
            "Delete" => Op::Delete,
            other => return Err(ProtoDecodeError(other.to_string())),
        };
        Ok(OplogEntry {
            collection: p.collection,
            key: p.key,
            op,
            body: p.json_data,
            timestamp: Timestamp { wall: p.hlc_wall, logical: p.hlc_logical, node: p.hlc_node },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeReq {
    pub node_id: String,
    pub auth_token: String,
    pub supported_compression: Vec<String>,
    /// Present only when the initiator is configured for secure mode: this
    /// node's ephemeral P-256 ECDH public key, SEC1-encoded.
    pub ecdh_public_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRes {
    pub node_id: String,
    pub accepted: bool,
    pub selected_compression: Option<String>,
    /// Present only when the responder accepted a secure-mode handshake:
    /// this node's ephemeral P-256 ECDH public key, SEC1-encoded.
    pub ecdh_public_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetClockReq;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockRes {
    pub hlc_wall: u64,
    pub hlc_logical: u32,
    pub hlc_node: String,
}

impl From<&Timestamp> for ClockRes {
    fn from(t: &Timestamp) -> Self {
        Self { hlc_wall: t.wall, hlc_logical: t.logical, hlc_node: t.node.clone() }
    }
}

impl From<&ClockRes> for Timestamp {
    fn from(c: &ClockRes) -> Self {
        Timestamp { wall: c.hlc_wall, logical: c.hlc_logical, node: c.hlc_node.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullChangesReq {
    pub since_wall: u64,
    pub since_logical: u32,
    pub since_node: String,
}

impl From<&Timestamp> for PullChangesReq {
    fn from(t: &Timestamp) -> Self {
        Self { since_wall: t.wall, since_logical: t.logical, since_node: t.node.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetRes {
    pub entries: Vec<ProtoOplogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushChangesReq {
    pub entries: Vec<ProtoOplogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckRes {
    pub success: bool,
}

/// The encrypted envelope wrapping `[type][flags][payload]` once a secure
/// session key has been established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureEnv {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

/// The UDP discovery beacon. Field names are snake_case on the wire by
/// contract (interop requirement), matched here with `Serialize`/
/// `Deserialize` derives and no renames needed since the Rust field names
/// already are snake_case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub node_id: String,
    pub tcp_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_oplog_entry_roundtrip_put() {
        let entry = OplogEntry::put("c", "k", "{\"a\":1}".into(), Timestamp { wall: 10, logical: 2, node: "n".into() });
        let proto = ProtoOplogEntry::from(&entry);
        let back = OplogEntry::try_from(proto).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn proto_oplog_entry_roundtrip_delete() {
        let entry = OplogEntry::delete("c", "k", Timestamp { wall: 10, logical: 2, node: "n".into() });
        let proto = ProtoOplogEntry::from(&entry);
        assert_eq!(proto.operation, "Delete");
        let back = OplogEntry::try_from(proto).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn proto_oplog_entry_rejects_unknown_operation() {
        let proto = ProtoOplogEntry {
            collection: "c".into(),
            key: "k".into(),
            operation: "Patch".into(),
            json_data: None,
            hlc_wall: 0,
            hlc_logical: 0,
            hlc_node: "n".into(),
        };
        assert!(OplogEntry::try_from(proto).is_err());
    }

    #[test]
    fn message_type_roundtrips_through_u8() {
        for variant in [
            MessageType::HandshakeReq,
            MessageType::HandshakeRes,
            MessageType::GetClockReq,
            MessageType::ClockRes,
            MessageType::PullChangesReq,
            MessageType::ChangeSetRes,
            MessageType::PushChangesReq,
            MessageType::AckRes,
            MessageType::SecureEnv,
        ] {
            assert_eq!(MessageType::from_u8(variant as u8), Some(variant));
        }
        assert_eq!(MessageType::from_u8(255), None);
    }

    #[test]
    fn beacon_msgpack_roundtrip() {
        let beacon = Beacon { node_id: "node-a".into(), tcp_port: 7000 };
        let bytes = rmp_serde::to_vec_named(&beacon).unwrap();
        let decoded: Beacon = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, beacon);
    }

    #[test]
    fn clock_res_timestamp_roundtrip() {
        let ts = Timestamp { wall: 42, logical: 7, node: "n1".into() };
        let res = ClockRes::from(&ts);
        let back = Timestamp::from(&res);
        assert_eq!(back, ts);
    }
}
