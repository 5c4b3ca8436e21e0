//! Optimistic multi-document transactions over a versioned document store.
//!
//! Every document carries a version that is bumped on each write. A
//! [`Transaction`] remembers the version of everything it reads and buffers
//! its writes; at commit the backend applies the write set only if none of
//! those versions moved. [`InventoryStore::run`] reruns the whole operation
//! from scratch when that check fails, so callers never observe a partial
//! write or the conflict itself.

mod memory;
mod postgres;
mod transaction;

pub use memory::MemoryBackend;
pub use postgres::PgBackend;
pub use transaction::Transaction;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A document in the read set was modified by another commit.
    #[error("concurrent modification detected")]
    Conflict,

    #[error("transaction aborted after {0} conflicting attempts")]
    ContentionExhausted(u32),

    #[error("document encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// A persisted entity living in one named collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn key(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub key: String,
    pub version: i64,
    pub body: Value,
}

/// The version a transaction observed for one document; `None` when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadStamp {
    pub collection: &'static str,
    pub key: String,
    pub version: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub collection: &'static str,
    pub key: String,
    pub body: Value,
}

/// Conjunction of equality predicates on top-level document fields.
#[derive(Debug, Clone, Default)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| body.get(field) == Some(expected))
    }

    /// JSON containment form, as used by `jsonb @>`.
    pub fn as_json(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

#[async_trait]
pub trait DocumentBackend: Send + Sync {
    async fn fetch(&self, collection: &str, key: &str)
        -> Result<Option<StoredDocument>, StoreError>;

    /// Matching documents ordered by key.
    async fn query(&self, collection: &str, filter: &Filter)
        -> Result<Vec<StoredDocument>, StoreError>;

    /// Applies `writes` atomically iff every stamp in `reads` is still current,
    /// otherwise returns [`StoreError::Conflict`] and applies nothing.
    async fn commit(&self, reads: &[ReadStamp], writes: &[PendingWrite])
        -> Result<(), StoreError>;
}

/// A unit of work executed inside [`InventoryStore::run`].
///
/// `run` may be invoked several times for one call, so it must not have
/// effects outside the transaction handle.
#[async_trait]
pub trait TxOperation: Send + Sync {
    type Output: Send;
    type Error: From<StoreError> + Send;

    async fn run(&self, tx: &mut Transaction) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(20),
        }
    }
}

#[derive(Clone)]
pub struct InventoryStore {
    backend: Arc<dyn DocumentBackend>,
    retry: RetryPolicy,
}

impl InventoryStore {
    pub fn new(backend: Arc<dyn DocumentBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()), RetryPolicy::default())
    }

    /// Runs `op` in a fresh transaction until it commits without conflict or
    /// the retry budget is spent. Errors returned by `op` are final.
    pub async fn run<Op: TxOperation>(&self, op: &Op) -> Result<Op::Output, Op::Error> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut tx = Transaction::new(Arc::clone(&self.backend));
            let output = op.run(&mut tx).await?;

            match tx.commit().await {
                Ok(()) => return Ok(output),
                Err(StoreError::Conflict) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transaction conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::Conflict) => {
                    tracing::warn!(attempt, "Transaction retry budget exhausted");
                    return Err(StoreError::ContentionExhausted(attempt).into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn get<D: Document>(&self, key: &str) -> Result<Option<D>, StoreError> {
        self.backend
            .fetch(D::COLLECTION, key)
            .await?
            .map(|doc| decode(doc.body))
            .transpose()
    }

    pub async fn query<D: Document>(&self, filter: &Filter) -> Result<Vec<D>, StoreError> {
        self.backend
            .query(D::COLLECTION, filter)
            .await?
            .into_iter()
            .map(|doc| decode(doc.body))
            .collect()
    }

    /// Unconditional single-document write.
    pub async fn put<D: Document>(&self, doc: &D) -> Result<(), StoreError> {
        self.put_all(std::slice::from_ref(doc)).await
    }

    /// Unconditional batch write, applied atomically.
    pub async fn put_all<D: Document>(&self, docs: &[D]) -> Result<(), StoreError> {
        let writes = docs
            .iter()
            .map(encode)
            .collect::<Result<Vec<_>, _>>()?;
        self.backend.commit(&[], &writes).await
    }
}

pub(crate) fn decode<D: DeserializeOwned>(body: Value) -> Result<D, StoreError> {
    Ok(serde_json::from_value(body)?)
}

pub(crate) fn encode<D: Document>(doc: &D) -> Result<PendingWrite, StoreError> {
    Ok(PendingWrite {
        collection: D::COLLECTION,
        key: doc.key(),
        body: serde_json::to_value(doc)?,
    })
}
