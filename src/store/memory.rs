//! In-memory [`VectorStore`] for process-lifetime indexes and tests.
//!
//! Uses a `Vec` behind `std::sync::RwLock`. Search is brute force over all
//! stored vectors.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::{embed_query, Embedder};
use crate::models::DocumentChunk;

use super::{rank, CollectionStats, DistanceMetric, SearchFilter, SearchHit, VectorStore, ADD_BATCH_SIZE};

struct StoredChunk {
    chunk: DocumentChunk,
    vector: Vec<f32>,
}

pub struct MemoryStore {
    name: String,
    embedder: Arc<dyn Embedder>,
    metric: DistanceMetric,
    chunks: RwLock<Vec<StoredChunk>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, embedder: Arc<dyn Embedder>, metric: DistanceMetric) -> Self {
        Self {
            name: name.into(),
            embedder,
            metric,
            chunks: RwLock::new(Vec::new()),
        }
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("in-memory vector store lock poisoned")
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, chunks: &[DocumentChunk]) -> Result<usize> {
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

            {
                let mut stored = self.chunks.write().map_err(|_| poisoned())?;
                for (chunk, vector) in batch.iter().zip(vectors) {
                    stored.push(StoredChunk {
                        chunk: chunk.clone(),
                        vector,
                    });
                }
            }
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
        if k == 0 || self.chunks.read().map_err(|_| poisoned())?.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;

        let stored = self.chunks.read().map_err(|_| poisoned())?;
        let candidates = stored
            .iter()
            .filter(|sc| filter.map_or(true, |f| f.matches(&sc.chunk.metadata())))
            .map(|sc| (sc.chunk.text.clone(), sc.chunk.metadata(), sc.vector.clone()));

        Ok(rank(&query_vec, candidates, self.metric, k))
    }

    async fn stats(&self) -> Result<CollectionStats> {
        let stored = self.chunks.read().map_err(|_| poisoned())?;
        Ok(CollectionStats {
            name: self.name.clone(),
            count: stored.len(),
        })
    }

    async fn clear(&self) -> Result<()> {
        self.chunks.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}
