//! Relevance-filtered retrieval and context assembly.
//!
//! The retriever over-fetches `2 * top_k` candidates from the
//! [`VectorStore`], keeps those under the relevance threshold (all of them
//! when the threshold is `>= 1.0`), stops at `top_k`, and formats the kept
//! chunks into a character-budgeted context block with citation headers:
//!
//! ```text
//! --- Source 1: handbook.pdf (Section 3) ---
//! chunk text
//!
//! --- Source 2: faq.pdf (Section 0) ---
//! chunk text
//! ```
//!
//! Kept results are never reordered; the store already returns them nearest
//! first.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::RagError;
use crate::models::RetrievalResult;
use crate::store::{SearchFilter, VectorStore};

/// Returned by [`format_context`] when there is nothing to show.
pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found in the documents.";

/// Per-call overrides of the configured retrieval defaults.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub top_k: Option<usize>,
    pub relevance_threshold: Option<f64>,
    pub max_context_length: Option<usize>,
    pub source_filter: Option<String>,
}

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, config: &RetrievalConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Up to `top_k` results, nearest first, that pass the threshold.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        relevance_threshold: f64,
        source_filter: Option<&str>,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let filter = source_filter.map(SearchFilter::source);
        let hits = self
            .store
            .search(query, top_k * 2, filter.as_ref())
            .await
            .map_err(RagError::Upstream)?;
        let candidates = hits.len();

        let accept_all = relevance_threshold >= 1.0;
        let mut results = Vec::with_capacity(top_k);
        for hit in hits {
            if accept_all || hit.distance < relevance_threshold {
                results.push(RetrievalResult::from(hit));
                if results.len() >= top_k {
                    break;
                }
            }
        }

        tracing::debug!(
            candidates,
            kept = results.len(),
            top_k,
            relevance_threshold,
            "retrieved chunks"
        );
        Ok(results)
    }

    /// Retrieve with the configured defaults (overridable per call) and
    /// format the kept results.
    pub async fn retrieve_and_format(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<(Vec<RetrievalResult>, String), RagError> {
        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let threshold = options
            .relevance_threshold
            .unwrap_or(self.config.relevance_threshold);
        let budget = options
            .max_context_length
            .unwrap_or(self.config.max_context_length);

        let results = self
            .retrieve(query, top_k, threshold, options.source_filter.as_deref())
            .await?;
        let context = format_context(&results, budget);
        Ok((results, context))
    }

    /// Distinct source names relevant to `query`, in first-seen order.
    pub async fn relevant_sources(&self, query: &str, top_k: usize) -> Result<Vec<String>, RagError> {
        let results = self
            .retrieve(query, top_k, self.config.relevance_threshold, None)
            .await?;
        Ok(distinct_sources(&results))
    }
}

/// Source names of `results`, deduplicated, keeping first occurrence order.
pub fn distinct_sources(results: &[RetrievalResult]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for r in results {
        if !sources.iter().any(|s| s == &r.source) {
            sources.push(r.source.clone());
        }
    }
    sources
}

fn format_entry(ordinal: usize, result: &RetrievalResult) -> String {
    match result.chunk_index {
        Some(section) => format!(
            "--- Source {}: {} (Section {}) ---\n{}\n",
            ordinal,
            result.source,
            section,
            result.text.trim()
        ),
        None => format!(
            "--- Source {}: {} ---\n{}\n",
            ordinal,
            result.source,
            result.text.trim()
        ),
    }
}

/// Assemble the context block within `max_context_length` characters.
///
/// The first entry is always included, even when it alone is over budget.
/// Later entries are added only while the total, joining newlines included,
/// stays within budget.
pub fn format_context(results: &[RetrievalResult], max_context_length: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total = 0usize;

    for (i, result) in results.iter().enumerate() {
        let entry = format_entry(i + 1, result);
        let separator = if parts.is_empty() { 0 } else { 1 };
        let len = entry.chars().count() + separator;
        if !parts.is_empty() && total + len > max_context_length {
            break;
        }
        total += len;
        parts.push(entry);
    }

    if parts.is_empty() {
        return NO_RELEVANT_INFORMATION.to_string();
    }
    parts.join("\n")
}
