//! Persisted [`VectorStore`] backed by SQLite.
//!
//! Chunks of every collection live in one `chunks` table, scoped by the
//! `collection` column. Embeddings are stored as little-endian `f32` BLOBs
//! and ranked in process; the `source` filter is pushed into SQL.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, embed_query, vec_to_blob, Embedder};
use crate::migrate;
use crate::models::{ChunkMetadata, DocumentChunk};

use super::{rank, CollectionStats, DistanceMetric, SearchFilter, SearchHit, VectorStore, ADD_BATCH_SIZE};

pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
    embedder: Arc<dyn Embedder>,
    metric: DistanceMetric,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and its schema.
    pub async fn open(
        path: &Path,
        collection: impl Into<String>,
        embedder: Arc<dyn Embedder>,
        metric: DistanceMetric,
    ) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;

        Ok(Self {
            pool,
            collection: collection.into(),
            embedder,
            metric,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn name(&self) -> &str {
        &self.collection
    }

    async fn add(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut added = 0;

        for batch in chunks.chunks(ADD_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                anyhow::bail!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                );
            }

            let mut tx = self.pool.begin().await?;
            for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO chunks
                        (id, collection, source, chunk_index, total_chunks, file_path, text, hash, model, dims, embedding, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&chunk.id)
                .bind(&self.collection)
                .bind(&chunk.source)
                .bind(chunk.chunk_index as i64)
                .bind(chunk.total_chunks as i64)
                .bind(&chunk.file_path)
                .bind(&chunk.text)
                .bind(&chunk.hash)
                .bind(self.embedder.model_name())
                .bind(vector.len() as i64)
                .bind(vec_to_blob(vector))
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            added += batch.len();
        }

        Ok(added)
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let source = filter.and_then(|f| f.source.as_deref());
        let rows = match source {
            Some(source) => {
                sqlx::query(
                    "SELECT text, source, chunk_index, total_chunks, file_path, embedding \
                     FROM chunks WHERE collection = ? AND source = ? ORDER BY rowid",
                )
                .bind(&self.collection)
                .bind(source)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT text, source, chunk_index, total_chunks, file_path, embedding \
                     FROM chunks WHERE collection = ? ORDER BY rowid",
                )
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?
            }
        };
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;

        let candidates = rows.iter().map(|row| {
            let chunk_index: i64 = row.get("chunk_index");
            let total_chunks: i64 = row.get("total_chunks");
            let blob: Vec<u8> = row.get("embedding");
            (
                row.get::<String, _>("text"),
                ChunkMetadata {
                    source: row.get("source"),
                    chunk_index: chunk_index as usize,
                    total_chunks: total_chunks as usize,
                    file_path: row.get("file_path"),
                },
                blob_to_vec(&blob),
            )
        });

        Ok(rank(&query_vec, candidates, self.metric, k))
    }

    async fn stats(&self) -> Result<CollectionStats> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;

        Ok(CollectionStats {
            name: self.collection.clone(),
            count: count as usize,
        })
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
