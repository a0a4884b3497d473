//! In-memory reference `Store` implementation.
//!
//! Commits atomically by guarding all document and oplog state behind a single
//! `parking_lot::Mutex`: every `apply_batch` call is one critical section,
//! so document upserts and their paired oplog appends commit together or
//! not at all. Not a production storage engine -- just enough to embed and
//! to exercise the engine in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use meshdoc_core::{DocKey, Document, OplogEntry, OrderBy, Predicate, Store, StoreError, Timestamp};
use parking_lot::Mutex;

#[derive(Default)]
struct State {
    docs: BTreeMap<DocKey, Document>,
    oplog: Vec<OplogEntry>,
}

/// A single-process, non-durable `Store`. Data does not survive restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_document(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
        let state = self.state.lock();
        Ok(state.docs.get(&DocKey::new(collection, key)).cloned())
    }

    async fn get_oplog_after(&self, since: &Timestamp) -> Result<Vec<OplogEntry>, StoreError> {
        let state = self.state.lock();
        let mut entries: Vec<OplogEntry> =
            state.oplog.iter().filter(|e| &e.timestamp > since).cloned().collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    async fn get_latest_timestamp(&self) -> Result<Timestamp, StoreError> {
        let state = self.state.lock();
        Ok(state.oplog.iter().map(|e| e.timestamp.clone()).max().unwrap_or(Timestamp::ZERO))
    }

    async fn apply_batch(&self, writes: Vec<(Option<Document>, OplogEntry)>) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        for (doc, entry) in writes {
            let idem_key = entry.idempotence_key();
            let already_present = state.oplog.iter().any(|e| e.idempotence_key() == idem_key);
            if already_present {
                continue;
            }
            if let Some(doc) = doc {
                state.docs.insert(doc.doc_key(), doc);
            }
            state.oplog.push(entry);
        }
        Ok(())
    }

    async fn query_documents(
        &self,
        collection: &str,
        predicate: Option<&Predicate>,
        skip: usize,
        take: Option<usize>,
        order_by: Option<OrderBy>,
        ascending: bool,
    ) -> Result<Vec<Document>, StoreError> {
        let state = self.state.lock();
        let mut docs: Vec<Document> = state
            .docs
            .values()
            .filter(|d| d.collection == collection)
            .filter(|d| match (predicate, &d.body) {
                (None, _) => true,
                (Some(p), Some(body)) => {
                    serde_json::from_str::<serde_json::Value>(body).is_ok_and(|v| p.matches(&v))
                }
                (Some(_), None) => false,
            })
            .cloned()
            .collect();

        match order_by {
            Some(OrderBy::Key) => docs.sort_by(|a, b| a.key.cmp(&b.key)),
            Some(OrderBy::UpdatedAt) => docs.sort_by(|a, b| a.updated_at.cmp(&b.updated_at)),
            None => {}
        }
        if !ascending {
            docs.reverse();
        }

        let docs = docs.into_iter().skip(skip);
        Ok(match take {
            Some(n) => docs.take(n).collect(),
            None => docs.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use meshdoc_core::{eq, ge};

    use super::*;

    fn ts(wall: u64, node: &str) -> Timestamp {
        Timestamp { wall, logical: 0, node: node.to_string() }
    }

    #[tokio::test]
    async fn apply_batch_then_get_document_roundtrips() {
        let store = MemoryStore::new();
        let doc = Document::put("users", "u1", "{\"v\":1}".into(), ts(1, "A"));
        let entry = OplogEntry::put("users", "u1", "{\"v\":1}".into(), ts(1, "A"));
        store.apply_batch(vec![(Some(doc.clone()), entry)]).await.unwrap();

        let fetched = store.get_document("users", "u1").await.unwrap().unwrap();
        assert_eq!(fetched, doc);
    }

    #[tokio::test]
    async fn get_oplog_after_is_exclusive_and_sorted() {
        let store = MemoryStore::new();
        for i in 1..=5u64 {
            let doc = Document::put("c", &i.to_string(), "{}".into(), ts(i, "A"));
            let entry = OplogEntry::put("c", &i.to_string(), "{}".into(), ts(i, "A"));
            store.apply_batch(vec![(Some(doc), entry)]).await.unwrap();
        }

        let after = store.get_oplog_after(&ts(2, "A")).await.unwrap();
        let walls: Vec<u64> = after.iter().map(|e| e.timestamp.wall).collect();
        assert_eq!(walls, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn apply_batch_is_idempotent() {
        let store = MemoryStore::new();
        let doc = Document::put("c", "k", "{}".into(), ts(1, "A"));
        let entry = OplogEntry::put("c", "k", "{}".into(), ts(1, "A"));
        store.apply_batch(vec![(Some(doc.clone()), entry.clone())]).await.unwrap();
        store.apply_batch(vec![(Some(doc), entry)]).await.unwrap();

        let after = store.get_oplog_after(&Timestamp::ZERO).await.unwrap();
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn query_documents_filters_by_predicate_and_paginates() {
        let store = MemoryStore::new();
        for i in 0..5u64 {
            let body = format!("{{\"age\":{}}}", 20 + i);
            let doc = Document::put("people", &i.to_string(), body.clone(), ts(i + 1, "A"));
            let entry = OplogEntry::put("people", &i.to_string(), body, ts(i + 1, "A"));
            store.apply_batch(vec![(Some(doc), entry)]).await.unwrap();
        }

        let results = store
            .query_documents("people", Some(&ge("age", 22)), 0, Some(2), Some(OrderBy::Key), true)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "2");
        assert_eq!(results[1].key, "3");
    }

    #[tokio::test]
    async fn query_documents_excludes_tombstones_from_predicate_matches() {
        let store = MemoryStore::new();
        let doc = Document::tombstone("c", "k", ts(1, "A"));
        let entry = OplogEntry::delete("c", "k", ts(1, "A"));
        store.apply_batch(vec![(Some(doc), entry)]).await.unwrap();

        let results = store.query_documents("c", Some(&eq("x", 1)), 0, None, None, true).await.unwrap();
        assert!(results.is_empty());

        let all = store.query_documents("c", None, 0, None, None, true).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn oplog_only_write_leaves_document_untouched() {
        let store = MemoryStore::new();
        let entry = OplogEntry::put("c", "k", "{\"v\":1}".into(), ts(1, "A"));
        store.apply_batch(vec![(None, entry)]).await.unwrap();

        assert!(store.get_document("c", "k").await.unwrap().is_none());
        let after = store.get_oplog_after(&Timestamp::ZERO).await.unwrap();
        assert_eq!(after.len(), 1);
    }
}
