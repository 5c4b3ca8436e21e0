use std::collections::HashMap;
use std::sync::Arc;

use super::{decode, encode, Document, DocumentBackend, Filter, PendingWrite, ReadStamp, StoreError};

/// Read set and buffered write set of one transaction attempt.
///
/// Reads always observe committed state; buffered writes become visible only
/// once the whole attempt commits.
pub struct Transaction {
    backend: Arc<dyn DocumentBackend>,
    reads: HashMap<(&'static str, String), Option<i64>>,
    writes: Vec<PendingWrite>,
}

impl Transaction {
    pub(super) fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self {
            backend,
            reads: HashMap::new(),
            writes: Vec::new(),
        }
    }

    pub async fn get<D: Document>(&mut self, key: &str) -> Result<Option<D>, StoreError> {
        let stored = self.backend.fetch(D::COLLECTION, key).await?;
        self.observe(D::COLLECTION, key, stored.as_ref().map(|doc| doc.version));
        stored.map(|doc| decode(doc.body)).transpose()
    }

    pub async fn query<D: Document>(&mut self, filter: &Filter) -> Result<Vec<D>, StoreError> {
        let stored = self.backend.query(D::COLLECTION, filter).await?;
        let mut docs = Vec::with_capacity(stored.len());
        for doc in stored {
            self.observe(D::COLLECTION, &doc.key, Some(doc.version));
            docs.push(decode(doc.body)?);
        }
        Ok(docs)
    }

    /// Buffers a write; a later write to the same document replaces it.
    pub fn put<D: Document>(&mut self, doc: &D) -> Result<(), StoreError> {
        let write = encode(doc)?;
        self.writes
            .retain(|w| !(w.collection == write.collection && w.key == write.key));
        self.writes.push(write);
        Ok(())
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    fn observe(&mut self, collection: &'static str, key: &str, version: Option<i64>) {
        // The first observation wins; a later differing version is caught at commit.
        self.reads
            .entry((collection, key.to_string()))
            .or_insert(version);
    }

    pub(super) async fn commit(self) -> Result<(), StoreError> {
        let reads: Vec<ReadStamp> = self
            .reads
            .into_iter()
            .map(|((collection, key), version)| ReadStamp {
                collection,
                key,
                version,
            })
            .collect();
        self.backend.commit(&reads, &self.writes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InventoryStore, MemoryBackend, RetryPolicy, TxOperation};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Counter {
        id: String,
        value: u32,
    }

    impl Document for Counter {
        const COLLECTION: &'static str = "counters";

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    fn counter(value: u32) -> Counter {
        Counter {
            id: "c".to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn test_commit_rejects_stale_read() {
        let backend: Arc<dyn DocumentBackend> = Arc::new(MemoryBackend::default());
        let store = InventoryStore::new(Arc::clone(&backend), RetryPolicy::default());
        store.put(&counter(1)).await.unwrap();

        let mut tx = Transaction::new(Arc::clone(&backend));
        let mut seen: Counter = tx.get("c").await.unwrap().unwrap();

        // Someone else commits in between.
        store.put(&counter(5)).await.unwrap();

        seen.value += 1;
        tx.put(&seen).unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::Conflict)));

        let current: Counter = store.get("c").await.unwrap().unwrap();
        assert_eq!(current.value, 5);
    }

    #[tokio::test]
    async fn test_absent_read_conflicts_with_concurrent_insert() {
        let backend: Arc<dyn DocumentBackend> = Arc::new(MemoryBackend::default());
        let store = InventoryStore::new(Arc::clone(&backend), RetryPolicy::default());

        let mut tx = Transaction::new(Arc::clone(&backend));
        let seen: Option<Counter> = tx.get("c").await.unwrap();
        assert!(seen.is_none());

        store.put(&counter(9)).await.unwrap();
        tx.put(&counter(1)).unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn test_last_buffered_write_wins() {
        let backend: Arc<dyn DocumentBackend> = Arc::new(MemoryBackend::default());
        let mut tx = Transaction::new(Arc::clone(&backend));
        tx.put(&counter(1)).unwrap();
        tx.put(&counter(2)).unwrap();
        assert_eq!(tx.pending_writes(), 1);
        tx.commit().await.unwrap();

        let store = InventoryStore::new(backend, RetryPolicy::default());
        let current: Counter = store.get("c").await.unwrap().unwrap();
        assert_eq!(current.value, 2);
    }

    /// Increments the counter, and on its first attempt lets a rival commit
    /// slip in between the read and the commit.
    struct IncrementWithRival {
        store: InventoryStore,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl TxOperation for IncrementWithRival {
        type Output = u32;
        type Error = StoreError;

        async fn run(&self, tx: &mut Transaction) -> Result<u32, StoreError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            let mut current: Counter = tx.get("c").await?.unwrap_or_else(|| counter(0));
            if attempt == 0 {
                self.store.put(&counter(current.value + 10)).await?;
            }
            current.value += 1;
            tx.put(&current)?;
            Ok(current.value)
        }
    }

    #[tokio::test]
    async fn test_run_reexecutes_whole_operation_on_conflict() {
        let store = InventoryStore::in_memory();
        store.put(&counter(0)).await.unwrap();

        let op = IncrementWithRival {
            store: store.clone(),
            attempts: AtomicU32::new(0),
        };
        let result = store.run(&op).await.unwrap();

        assert_eq!(op.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(result, 11);
        let current: Counter = store.get("c").await.unwrap().unwrap();
        assert_eq!(current.value, 11);
    }

    struct AlwaysContended {
        store: InventoryStore,
    }

    #[async_trait]
    impl TxOperation for AlwaysContended {
        type Output = ();
        type Error = StoreError;

        async fn run(&self, tx: &mut Transaction) -> Result<(), StoreError> {
            let current: Counter = tx.get("c").await?.unwrap_or_else(|| counter(0));
            self.store.put(&counter(current.value + 1)).await?;
            tx.put(&current)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_gives_up_after_budget() {
        let store = InventoryStore::new(
            Arc::new(MemoryBackend::default()),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        );
        let op = AlwaysContended {
            store: store.clone(),
        };
        let err = store.run(&op).await.unwrap_err();
        assert!(matches!(err, StoreError::ContentionExhausted(3)));
    }
}
