//! The document entity and its primary key.

use serde::{Deserialize, Serialize};

use crate::hlc::Timestamp;

/// A stored document: `(collection, key)` uniquely identifies it.
///
/// `body` is opaque JSON text supplied by the embedder; the engine never
/// inspects its shape except through a [`crate::resolver::ConflictResolver`].
/// `body` is `None` exactly when `deleted` is `true` (a tombstone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub collection: String,
    pub key: String,
    pub body: Option<String>,
    pub updated_at: Timestamp,
    pub deleted: bool,
}

impl Document {
    /// Builds a live document with a JSON body.
    #[must_use]
    pub fn put(collection: impl Into<String>, key: impl Into<String>, body: String, updated_at: Timestamp) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            body: Some(body),
            updated_at,
            deleted: false,
        }
    }

    /// Builds a tombstone.
    #[must_use]
    pub fn tombstone(collection: impl Into<String>, key: impl Into<String>, updated_at: Timestamp) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            body: None,
            updated_at,
            deleted: true,
        }
    }

    /// A stable key for grouping/lookup: `"collection\0key"`.
    #[must_use]
    pub fn doc_key(&self) -> DocKey {
        DocKey::new(&self.collection, &self.key)
    }
}

/// A hashable, orderable `(collection, key)` pair used as a map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocKey(pub String, pub String);

impl DocKey {
    #[must_use]
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self(collection.into(), key.into())
    }
}
