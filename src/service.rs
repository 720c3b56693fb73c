//! The process-wide service object.
//!
//! [`RagService`] owns the configured collaborators (vector store, session
//! store, retriever, completion provider) and is built once at startup,
//! then shared as `Arc<RagService>` by the CLI and the HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::agent::Agent;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::RagError;
use crate::ingest::{self, IngestReport};
use crate::llm::{create_completion_provider, CompletionProvider};
use crate::retriever::Retriever;
use crate::session::SessionStore;
use crate::store::{DistanceMetric, MemoryStore, SqliteStore, VectorStore};

/// Snapshot reported by `ragent stats` and `GET /api/stats`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceStats {
    pub active_sessions: usize,
    pub indexed_chunks: usize,
    pub collection: String,
    pub model: String,
    pub temperature: f32,
    pub chunk_size: usize,
    pub top_k: usize,
}

pub struct RagService {
    config: Config,
    store: Arc<dyn VectorStore>,
    agent: Agent,
}

impl RagService {
    /// Build every collaborator from configuration.
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let metric = DistanceMetric::parse(&config.store.distance)?;

        let store: Arc<dyn VectorStore> = match config.store.backend.as_str() {
            "memory" => Arc::new(MemoryStore::new(
                config.store.collection.clone(),
                embedder,
                metric,
            )),
            _ => Arc::new(
                SqliteStore::open(
                    &config.store.path,
                    config.store.collection.clone(),
                    embedder,
                    metric,
                )
                .await?,
            ),
        };

        let llm = create_completion_provider(&config.llm)?;
        Ok(Self::new(config, store, llm))
    }

    /// Assemble a service from explicit collaborators.
    pub fn new(config: Config, store: Arc<dyn VectorStore>, llm: Arc<dyn CompletionProvider>) -> Self {
        let sessions = Arc::new(SessionStore::new(
            Duration::from_secs(config.session.timeout_secs),
            config.session.max_history,
        ));
        let retriever = Arc::new(Retriever::new(store.clone(), &config.retrieval));
        let agent = Agent::new(sessions, retriever, llm, &config.llm);

        Self {
            config,
            store,
            agent,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// Index the documents directory if the collection is empty.
    pub async fn initialize_index(&self) -> Result<Option<IngestReport>, RagError> {
        ingest::initialize_index(
            self.store.as_ref(),
            &self.config.documents.dir,
            &self.config.chunking,
        )
        .await
    }

    /// Rebuild the collection from the documents directory.
    pub async fn reindex(&self) -> Result<IngestReport, RagError> {
        ingest::reindex(
            self.store.as_ref(),
            &self.config.documents.dir,
            &self.config.chunking,
        )
        .await
    }

    pub async fn stats(&self) -> Result<ServiceStats, RagError> {
        let collection = self.store.stats().await.map_err(RagError::Upstream)?;
        Ok(ServiceStats {
            active_sessions: self.agent.active_sessions_count(),
            indexed_chunks: collection.count,
            collection: collection.name,
            model: self.config.llm.model.clone(),
            temperature: self.config.llm.temperature,
            chunk_size: self.config.chunking.chunk_size,
            top_k: self.config.retrieval.top_k,
        })
    }

    /// Periodically evict expired sessions. Reads already treat expired
    /// sessions as absent; this only reclaims memory.
    pub fn spawn_session_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.agent.cleanup_sessions();
            }
        })
    }
}
