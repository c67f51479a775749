//! SQLite-backed metadata store.
//!
//! Maps each index slot to the document and chunk text it came from. Rows
//! are only ever appended, inside a transaction the
//! [`VectorStore`](crate::store::VectorStore) commits together with the
//! index file. The only deletion is [`MetadataStore::clear`], used when a
//! corrupt store is deliberately recreated.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use crate::error::StoreError;
use crate::models::{Chunk, MetadataRecord};

#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if missing) the metadata database and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                id INTEGER PRIMARY KEY,
                doc_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                chunk_text TEXT NOT NULL,
                ingested_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_metadata_doc_id ON metadata(doc_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metadata")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    /// Highest slot id plus one, or 0 when empty.
    pub async fn next_slot(&self) -> Result<u64, StoreError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM metadata")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.map(|m| m as u64 + 1).unwrap_or(0))
    }

    pub async fn document_count(&self) -> Result<usize, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT doc_id) FROM metadata")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Insert one record per chunk with consecutive slot ids starting at
    /// `start_slot`, in chunk order.
    pub async fn append(
        tx: &mut Transaction<'static, Sqlite>,
        start_slot: u64,
        doc_id: &str,
        chunks: &[Chunk],
        ingested_at: i64,
    ) -> Result<(), StoreError> {
        for (i, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO metadata (id, doc_id, chunk_index, chunk_text, ingested_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind((start_slot + i as u64) as i64)
            .bind(doc_id)
            .bind(chunk.ordinal as i64)
            .bind(&chunk.text)
            .bind(ingested_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Fetch records for the given slots, keyed by slot id.
    pub async fn get_many(&self, slots: &[u64]) -> Result<HashMap<u64, MetadataRecord>, StoreError> {
        if slots.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; slots.len()].join(", ");
        let sql = format!(
            "SELECT id, doc_id, chunk_index, chunk_text, ingested_at FROM metadata WHERE id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for slot in slots {
            query = query.bind(*slot as i64);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            out.insert(
                id as u64,
                MetadataRecord {
                    slot_id: id as u64,
                    doc_id: row.get("doc_id"),
                    chunk_index: row.get("chunk_index"),
                    chunk_text: row.get("chunk_text"),
                    ingested_at: row.get("ingested_at"),
                },
            );
        }
        Ok(out)
    }

    /// Every slot id in ascending order. Used by consistency checks.
    pub async fn slot_ids(&self) -> Result<Vec<u64>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM metadata ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(|i| i as u64).collect())
    }

    /// Distinct document ids with at least one stored chunk.
    pub async fn doc_ids(&self) -> Result<HashSet<String>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT DISTINCT doc_id FROM metadata")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// Delete every record. Only used when recreating a corrupt store.
    pub async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM metadata")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
