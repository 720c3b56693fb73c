//! Similarity search over an indexed chunk collection.
//!
//! The [`VectorStore`] trait is the only view the retriever has of the
//! index: add chunks, search by text with an optional metadata filter,
//! report statistics, clear. Implementations embed text themselves through an
//! [`Embedder`](crate::embedding::Embedder).
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`MemoryStore`] | process-lifetime index, tests |
//! | [`SqliteStore`] | persisted collection |
//!
//! Distances follow the inverse-similarity convention: lower is closer.
//! Results are always returned in non-decreasing distance order.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;

use crate::embedding::{cosine_similarity, squared_l2};
use crate::models::{ChunkMetadata, RetrievalResult};

/// Chunks are embedded and inserted in groups of this size.
pub const ADD_BATCH_SIZE: usize = 100;

/// Metadata equality filter applied before ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub source: Option<String>,
}

impl SearchFilter {
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
        }
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        match &self.source {
            Some(source) => metadata.source == *source,
            None => true,
        }
    }
}

/// A stored chunk matched by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f64,
}

impl From<SearchHit> for RetrievalResult {
    fn from(hit: SearchHit) -> Self {
        RetrievalResult {
            text: hit.text,
            source: hit.metadata.source,
            chunk_index: Some(hit.metadata.chunk_index),
            distance: hit.distance,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectionStats {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    L2,
    /// `1 - cosine_similarity`, in `[0, 2]`.
    Cosine,
}

impl DistanceMetric {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "l2" => Ok(DistanceMetric::L2),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => bail!("Unknown distance metric: '{}'", other),
        }
    }

    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::L2 => squared_l2(a, b) as f64,
            DistanceMetric::Cosine => (1.0 - cosine_similarity(a, b)) as f64,
        }
    }
}

/// Storage and k-nearest-neighbour search over embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Embed and store chunks. Returns the number stored.
    async fn add(&self, chunks: &[crate::models::DocumentChunk]) -> Result<usize>;

    /// Return up to `k` chunks closest to `query`, nearest first.
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>>;

    async fn stats(&self) -> Result<CollectionStats>;

    /// Remove every chunk in the collection.
    async fn clear(&self) -> Result<()>;
}

/// Rank candidates by distance to `query_vec` and keep the `k` nearest.
///
/// The sort is stable, so equal distances keep insertion order.
pub(crate) fn rank(
    query_vec: &[f32],
    candidates: impl IntoIterator<Item = (String, ChunkMetadata, Vec<f32>)>,
    metric: DistanceMetric,
    k: usize,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .map(|(text, metadata, vector)| SearchHit {
            distance: metric.distance(query_vec, &vector),
            text,
            metadata,
        })
        .collect();
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
    });
    hits.truncate(k);
    hits
}
