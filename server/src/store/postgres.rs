use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;

use super::{DocumentBackend, Filter, PendingWrite, ReadStamp, StoreError, StoredDocument};

/// Postgres SQLSTATEs that mean "another transaction got there first".
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Documents live in one `documents` table keyed by (collection, key).
/// The read set is re-validated under row locks before the write set is
/// applied, all inside one database transaction.
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        tracing::info!("Successfully connected to database");

        sqlx::migrate!().run(&pool).await?;

        tracing::info!("Migrations run successfully");

        Ok(Self { pool })
    }

    async fn try_commit(
        &self,
        reads: &[ReadStamp],
        writes: &[PendingWrite],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for read in reads {
            let current: Option<(i64,)> = sqlx::query_as(
                "SELECT version FROM documents WHERE collection = $1 AND key = $2 FOR UPDATE",
            )
            .bind(read.collection)
            .bind(&read.key)
            .fetch_optional(&mut *tx)
            .await?;

            if current.map(|(version,)| version) != read.version {
                tx.rollback().await?;
                return Err(StoreError::Conflict);
            }
        }

        for write in writes {
            let statement = match write_mode(reads, write) {
                WriteMode::Create => {
                    "INSERT INTO documents (collection, key, version, body) VALUES ($1, $2, 1, $3) \
                     ON CONFLICT (collection, key) DO NOTHING"
                }
                WriteMode::Upsert => {
                    "INSERT INTO documents (collection, key, version, body) VALUES ($1, $2, 1, $3) \
                     ON CONFLICT (collection, key) DO UPDATE \
                     SET body = EXCLUDED.body, version = documents.version + 1, updated_at = now()"
                }
            };
            let applied = sqlx::query(statement)
                .bind(write.collection)
                .bind(&write.key)
                .bind(Json(&write.body))
                .execute(&mut *tx)
                .await?
                .rows_affected();

            // Someone inserted the document after we saw it missing.
            if applied == 0 {
                tx.rollback().await?;
                return Err(StoreError::Conflict);
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// The transaction observed the document as absent; the row lock taken by
    /// `FOR UPDATE` does not cover a missing row, so the insert itself must
    /// refuse to clobber a concurrent one.
    Create,
    Upsert,
}

fn write_mode(reads: &[ReadStamp], write: &PendingWrite) -> WriteMode {
    let seen_absent = reads.iter().any(|read| {
        read.collection == write.collection && read.key == write.key && read.version.is_none()
    });
    if seen_absent {
        WriteMode::Create
    } else {
        WriteMode::Upsert
    }
}

#[async_trait]
impl DocumentBackend for PgBackend {
    async fn fetch(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let row: Option<(i64, Json<Value>)> =
            sqlx::query_as("SELECT version, body FROM documents WHERE collection = $1 AND key = $2")
                .bind(collection)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(version, Json(body))| StoredDocument {
            key: key.to_string(),
            version,
            body,
        }))
    }

    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let rows: Vec<(String, i64, Json<Value>)> = sqlx::query_as(
            "SELECT key, version, body FROM documents \
             WHERE collection = $1 AND body @> $2 ORDER BY key",
        )
        .bind(collection)
        .bind(Json(filter.as_json()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(key, version, Json(body))| StoredDocument { key, version, body })
            .collect())
    }

    async fn commit(&self, reads: &[ReadStamp], writes: &[PendingWrite]) -> Result<(), StoreError> {
        match self.try_commit(reads, writes).await {
            Err(StoreError::Database(sqlx::Error::Database(db_err)))
                if matches!(
                    db_err.code().as_deref(),
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
                ) =>
            {
                Err(StoreError::Conflict)
            }
            other => other,
        }
    }
}
