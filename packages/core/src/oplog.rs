//! The append-only operation log entry type.
//!
//! The oplog itself has no standalone in-memory structure — it is exposed
//! only through [`crate::store::Store::get_oplog_after`] and
//! [`crate::store::Store::get_latest_timestamp`]; this module just defines
//! the record shape both the store and the wire codec share.

use serde::{Deserialize, Serialize};

use crate::document::DocKey;
use crate::hlc::Timestamp;

/// The mutation kind an [`OplogEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Put,
    Delete,
}

/// A single accepted mutation. Append-only; never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplogEntry {
    pub collection: String,
    pub key: String,
    pub op: Op,
    pub body: Option<String>,
    pub timestamp: Timestamp,
}

impl OplogEntry {
    #[must_use]
    pub fn put(collection: impl Into<String>, key: impl Into<String>, body: String, timestamp: Timestamp) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            op: Op::Put,
            body: Some(body),
            timestamp,
        }
    }

    #[must_use]
    pub fn delete(collection: impl Into<String>, key: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            op: Op::Delete,
            body: None,
            timestamp,
        }
    }

    #[must_use]
    pub fn doc_key(&self) -> DocKey {
        DocKey::new(&self.collection, &self.key)
    }

    /// The `(node, wall, logical)` triple that append idempotence keys on.
    #[must_use]
    pub fn idempotence_key(&self) -> (String, u64, u32) {
        (self.timestamp.node.clone(), self.timestamp.wall, self.timestamp.logical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_delete_constructors() {
        let ts = Timestamp { wall: 1, logical: 0, node: "n".into() };
        let p = OplogEntry::put("c", "k", "{}".into(), ts.clone());
        assert_eq!(p.op, Op::Put);
        assert!(p.body.is_some());

        let d = OplogEntry::delete("c", "k", ts);
        assert_eq!(d.op, Op::Delete);
        assert!(d.body.is_none());
    }

    #[test]
    fn idempotence_key_identifies_duplicate_entries() {
        let ts = Timestamp { wall: 5, logical: 2, node: "A".into() };
        let a = OplogEntry::put("c", "k1", "{}".into(), ts.clone());
        let b = OplogEntry::put("c", "k2", "{\"x\":1}".into(), ts);
        // Same HLC origin, different document -- idempotence is keyed purely
        // on the issuing event, not the payload.
        assert_eq!(a.idempotence_key(), b.idempotence_key());
    }
}
