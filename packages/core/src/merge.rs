//! The merge engine: the heart of convergence.
//!
//! Implemented as a free function rather than a stateful object — it has no
//! state of its own between batches, only the store, the resolver, and the
//! local clock it is handed.

use std::collections::BTreeMap;

use crate::document::{DocKey, Document};
use crate::errors::CoreError;
use crate::hlc::{Hlc, Timestamp};
use crate::oplog::{Op, OplogEntry};
use crate::resolver::{ConflictResolver, ResolverInput};
use crate::store::Store;

/// Applies a batch of remote oplog entries against `store`, resolving
/// conflicts with `resolver` and observing every entry's timestamp into
/// `hlc`. The batch is unordered from the caller's perspective; groups by
/// `(collection, key)` are sorted ascending by HLC before being walked so
/// the final state is independent of receive order.
///
/// Also used for local single-document writes — called with a batch of one
/// entry — so every write, local or remote, goes through this single
/// transactional path instead of a separate, non-atomic document-then-oplog
/// call pair.
pub async fn apply_batch(
    store: &dyn Store,
    resolver: &dyn ConflictResolver,
    hlc: &mut Hlc,
    batch: Vec<OplogEntry>,
) -> Result<(), CoreError> {
    if batch.is_empty() {
        return Ok(());
    }

    let mut groups: BTreeMap<DocKey, Vec<OplogEntry>> = BTreeMap::new();
    for entry in batch {
        groups.entry(entry.doc_key()).or_default().push(entry);
    }

    let mut writes: Vec<(Option<Document>, OplogEntry)> = Vec::new();

    for (key, mut entries) in groups {
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let existing = store
            .get_document(&key.0, &key.1)
            .await
            .map_err(|e| CoreError::Store(e.0))?;
        let mut local_hlc = existing.as_ref().map_or(Timestamp::ZERO, |d| d.updated_at.clone());
        let mut local_body: Option<String> = existing.and_then(|d| d.body);

        for entry in entries {
            if entry.timestamp <= local_hlc {
                // Strictly-older-or-equal ops never supersede the current
                // state, but still have to land in the oplog: a later
                // replay of the same batch must see it as already applied
                // rather than re-evaluating it against a newer local state.
                writes.push((None, entry));
                continue;
            }

            let doc = match entry.op {
                Op::Delete => Document::tombstone(&key.0, &key.1, entry.timestamp.clone()),
                Op::Put => {
                    let merged_body = {
                        let local_input = ResolverInput {
                            body: local_body.as_deref().unwrap_or("{}"),
                            hlc: &local_hlc,
                        };
                        let remote_input = ResolverInput {
                            body: entry.body.as_deref().unwrap_or("{}"),
                            hlc: &entry.timestamp,
                        };
                        resolver.resolve(&local_input, &remote_input)
                    };
                    Document::put(&key.0, &key.1, merged_body, entry.timestamp.clone())
                }
            };

            local_hlc = entry.timestamp.clone();
            local_body = doc.body.clone();
            writes.push((Some(doc), entry));
        }
    }

    // Observe every entry's timestamp before committing, so a crash after
    // commit but before observe can never leave the clock behind causality
    // that is now durably stored.
    for (_, entry) in &writes {
        hlc.observe(&entry.timestamp)?;
    }

    store.apply_batch(writes).await.map_err(|e| CoreError::Store(e.0))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::hlc::SystemClock;
    use crate::predicate::Predicate;
    use crate::resolver::{FieldMerge, LastWriteWins};
    use crate::store::{OrderBy, StoreError};

    #[derive(Default)]
    struct TestStore {
        docs: StdMutex<BTreeMap<DocKey, Document>>,
        oplog: StdMutex<Vec<OplogEntry>>,
    }

    #[async_trait]
    impl Store for TestStore {
        async fn get_document(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
            Ok(self.docs.lock().unwrap().get(&DocKey::new(collection, key)).cloned())
        }

        async fn get_oplog_after(&self, since: &Timestamp) -> Result<Vec<OplogEntry>, StoreError> {
            let mut entries: Vec<OplogEntry> =
                self.oplog.lock().unwrap().iter().filter(|e| &e.timestamp > since).cloned().collect();
            entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            Ok(entries)
        }

        async fn get_latest_timestamp(&self) -> Result<Timestamp, StoreError> {
            Ok(self.oplog.lock().unwrap().iter().map(|e| e.timestamp.clone()).max().unwrap_or(Timestamp::ZERO))
        }

        async fn apply_batch(&self, writes: Vec<(Option<Document>, OplogEntry)>) -> Result<(), StoreError> {
            let mut docs = self.docs.lock().unwrap();
            let mut oplog = self.oplog.lock().unwrap();
            for (doc, entry) in writes {
                let dup = oplog.iter().any(|e| e.idempotence_key() == entry.idempotence_key());
                if dup {
                    continue;
                }
                if let Some(doc) = doc {
                    docs.insert(doc.doc_key(), doc);
                }
                oplog.push(entry);
            }
            Ok(())
        }

        async fn query_documents(
            &self,
            _collection: &str,
            _predicate: Option<&Predicate>,
            _skip: usize,
            _take: Option<usize>,
            _order_by: Option<OrderBy>,
            _ascending: bool,
        ) -> Result<Vec<Document>, StoreError> {
            Ok(self.docs.lock().unwrap().values().cloned().collect())
        }
    }

    fn ts(wall: u64, node: &str) -> Timestamp {
        Timestamp { wall, logical: 0, node: node.to_string() }
    }

    fn test_hlc() -> Hlc {
        Hlc::new("test".into(), Box::new(SystemClock))
    }

    #[tokio::test]
    async fn lww_resolves_concurrent_write_to_higher_hlc() {
        let store = TestStore::default();
        let mut hlc = test_hlc();
        let batch = vec![
            OplogEntry::put("users", "u1", "{\"v\":1}".into(), ts(100, "A")),
            OplogEntry::put("users", "u1", "{\"v\":2}".into(), ts(100, "B")),
        ];
        apply_batch(&store, &LastWriteWins, &mut hlc, batch).await.unwrap();

        let doc = store.get_document("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc.body.as_deref(), Some("{\"v\":2}"));
    }

    #[tokio::test]
    async fn delete_dominates_older_concurrent_put() {
        let store = TestStore::default();
        let mut hlc = test_hlc();
        let batch = vec![
            OplogEntry::delete("k", "k", ts(200, "A")),
            OplogEntry::put("k", "k", "{}".into(), ts(150, "B")),
        ];
        apply_batch(&store, &LastWriteWins, &mut hlc, batch).await.unwrap();

        let doc = store.get_document("k", "k").await.unwrap().unwrap();
        assert!(doc.deleted);
    }

    #[tokio::test]
    async fn delete_never_undone_by_older_put_regardless_of_order() {
        let store = TestStore::default();
        let mut hlc = test_hlc();
        // Same ops, reversed batch order -- result must be identical.
        let batch = vec![
            OplogEntry::put("k", "k", "{}".into(), ts(150, "B")),
            OplogEntry::delete("k", "k", ts(200, "A")),
        ];
        apply_batch(&store, &LastWriteWins, &mut hlc, batch).await.unwrap();

        let doc = store.get_document("k", "k").await.unwrap().unwrap();
        assert!(doc.deleted);
    }

    #[tokio::test]
    async fn superseded_entry_is_still_appended_to_oplog() {
        let store = TestStore::default();
        let mut hlc = test_hlc();
        apply_batch(
            &store,
            &LastWriteWins,
            &mut hlc,
            vec![OplogEntry::put("k", "k", "{\"v\":2}".into(), ts(200, "A"))],
        )
        .await
        .unwrap();

        // Causally older than what's already stored: the document must not
        // regress, but the op still has to be recorded as seen.
        let older = OplogEntry::put("k", "k", "{\"v\":1}".into(), ts(150, "B"));
        let older_key = older.idempotence_key();
        apply_batch(&store, &LastWriteWins, &mut hlc, vec![older]).await.unwrap();

        let doc = store.get_document("k", "k").await.unwrap().unwrap();
        assert_eq!(doc.body.as_deref(), Some("{\"v\":2}"));

        let oplog = store.oplog.lock().unwrap();
        assert!(oplog.iter().any(|e| e.idempotence_key() == older_key));
        assert_eq!(oplog.len(), 2);
    }

    #[tokio::test]
    async fn idempotent_reapply_same_batch_is_noop() {
        let store = TestStore::default();
        let mut hlc = test_hlc();
        let batch = vec![OplogEntry::put("c", "k", "{\"v\":1}".into(), ts(100, "A"))];

        apply_batch(&store, &LastWriteWins, &mut hlc, batch.clone()).await.unwrap();
        apply_batch(&store, &LastWriteWins, &mut hlc, batch).await.unwrap();

        assert_eq!(store.oplog.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn field_merge_resolves_concurrent_field_edits() {
        let store = TestStore::default();
        let mut hlc = test_hlc();

        // Establish initial state.
        apply_batch(
            &store,
            &FieldMerge,
            &mut hlc,
            vec![OplogEntry::put("p", "1", "{\"name\":\"Alice\",\"age\":25}".into(), ts(50, "A"))],
        )
        .await
        .unwrap();

        let batch = vec![
            OplogEntry::put("p", "1", "{\"name\":\"Alice\",\"age\":26}".into(), ts(100, "A")),
            OplogEntry::put("p", "1", "{\"name\":\"Alicia\",\"age\":25}".into(), ts(105, "B")),
        ];
        apply_batch(&store, &FieldMerge, &mut hlc, batch).await.unwrap();

        let doc = store.get_document("p", "1").await.unwrap().unwrap();
        let body: serde_json::Value = serde_json::from_str(doc.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["name"], "Alicia");
        assert_eq!(body["age"], 26);
    }

    #[tokio::test]
    async fn observes_every_entry_timestamp_into_clock() {
        let store = TestStore::default();
        let mut hlc = test_hlc();
        let batch = vec![OplogEntry::put("c", "k", "{}".into(), ts(u64::MAX / 2, "remote"))];
        apply_batch(&store, &LastWriteWins, &mut hlc, batch).await.unwrap();

        let next = hlc.tick();
        assert!(next.wall >= u64::MAX / 2);
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let store = TestStore::default();
        let mut hlc = test_hlc();
        apply_batch(&store, &LastWriteWins, &mut hlc, vec![]).await.unwrap();
        assert_eq!(store.oplog.lock().unwrap().len(), 0);
    }
}
