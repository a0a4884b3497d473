//! The abstract store contract the engine requires from a storage backend.
//!
//! The engine ships no storage engine of its own beyond the in-memory
//! reference implementation in `meshdoc-node`; any backend implementing
//! this trait can be embedded instead.

use async_trait::async_trait;

use crate::document::Document;
use crate::hlc::Timestamp;
use crate::oplog::OplogEntry;
use crate::predicate::Predicate;

/// A field to sort `query_documents` results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Key,
    UpdatedAt,
}

/// Error surfaced by a [`Store`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The durable key→latest-document map plus oplog range reads.
///
/// Implementations MUST commit atomically: [`Store::apply_batch`] commits its
/// document upserts and oplog appends atomically — either all of them land
/// or none do. There is deliberately no separate "upsert document" +
/// "append oplog" pair of calls on this trait; `apply_batch` is the only
/// write path, including for a single local `Put`/`Delete` (called with a
/// batch of one).
///
/// An op that loses the merge engine's HLC-supersession check still has to
/// reach the oplog — replaying it later must stay a no-op rather than a
/// fresh write — but must not touch the document row. `writes` carries that
/// case as `(None, entry)`: append the entry, leave the document table
/// alone.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetches the current row for `(collection, key)`, if one exists
    /// (including tombstones).
    async fn get_document(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError>;

    /// Returns oplog entries with `timestamp > since`, ordered ascending by
    /// `(wall, logical)`.
    async fn get_oplog_after(&self, since: &Timestamp) -> Result<Vec<OplogEntry>, StoreError>;

    /// The latest timestamp recorded in the oplog, or [`Timestamp::ZERO`] if
    /// empty.
    async fn get_latest_timestamp(&self) -> Result<Timestamp, StoreError>;

    /// Atomically applies a set of `(document, oplog entry)` pairs. A `None`
    /// document means: append `entry` to the oplog only, leave the document
    /// table untouched.
    ///
    /// Append is idempotent per `(node, wall, logical)`: an oplog entry
    /// whose idempotence key already exists in the log is skipped without
    /// error, and its paired document write (if any) is skipped too.
    async fn apply_batch(&self, writes: Vec<(Option<Document>, OplogEntry)>) -> Result<(), StoreError>;

    /// Queries documents, optionally filtered, paginated, and ordered.
    /// Tombstones (`deleted == true`) are included; callers filter them out
    /// if they want live documents only.
    async fn query_documents(
        &self,
        collection: &str,
        predicate: Option<&Predicate>,
        skip: usize,
        take: Option<usize>,
        order_by: Option<OrderBy>,
        ascending: bool,
    ) -> Result<Vec<Document>, StoreError>;
}
