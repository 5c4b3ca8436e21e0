use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{DocumentBackend, Filter, PendingWrite, ReadStamp, StoreError, StoredDocument};

#[derive(Debug, Clone)]
struct Entry {
    version: i64,
    body: Value,
}

/// Process-local backend. The lock is held only for the duration of a single
/// fetch, scan or commit, never across an await point.
#[derive(Default)]
pub struct MemoryBackend {
    docs: Mutex<HashMap<(String, String), Entry>>,
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn fetch(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let docs = self.docs.lock();
        Ok(docs
            .get(&(collection.to_string(), key.to_string()))
            .map(|entry| StoredDocument {
                key: key.to_string(),
                version: entry.version,
                body: entry.body.clone(),
            }))
    }

    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let docs = self.docs.lock();
        let mut matched: Vec<StoredDocument> = docs
            .iter()
            .filter(|((c, _), entry)| c == collection && filter.matches(&entry.body))
            .map(|((_, key), entry)| StoredDocument {
                key: key.clone(),
                version: entry.version,
                body: entry.body.clone(),
            })
            .collect();
        matched.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(matched)
    }

    async fn commit(&self, reads: &[ReadStamp], writes: &[PendingWrite]) -> Result<(), StoreError> {
        let mut docs = self.docs.lock();

        for read in reads {
            let current = docs
                .get(&(read.collection.to_string(), read.key.clone()))
                .map(|entry| entry.version);
            if current != read.version {
                return Err(StoreError::Conflict);
            }
        }

        for write in writes {
            let slot = (write.collection.to_string(), write.key.clone());
            let version = docs.get(&slot).map_or(1, |entry| entry.version + 1);
            docs.insert(
                slot,
                Entry {
                    version,
                    body: write.body.clone(),
                },
            );
        }

        Ok(())
    }
}
