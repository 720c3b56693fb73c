//! Error taxonomy for the retrieval and session core.
//!
//! Collaborators (embedding, vector store, completion) speak `anyhow`; the
//! core wraps their failures in [`RagError::Upstream`] and never retries.

use std::path::PathBuf;

use thiserror::Error;

use crate::extract::ExtractError;

#[derive(Debug, Error)]
pub enum RagError {
    /// The session id is unknown or its sliding window has elapsed.
    #[error("session {0} not found or expired")]
    SessionNotFound(String),

    #[error(transparent)]
    Ingestion(#[from] IngestError),

    /// Search, embedding or completion failure, propagated unchanged.
    #[error("upstream failure: {0:#}")]
    Upstream(#[source] anyhow::Error),
}

impl RagError {
    pub fn upstream(err: impl Into<anyhow::Error>) -> Self {
        RagError::Upstream(err.into())
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no PDF files found in {}", .0.display())]
    NoDocuments(PathBuf),

    /// PDFs exist but none of them produced any text.
    #[error("no readable PDF content in {}", .0.display())]
    NoReadableDocuments(PathBuf),

    #[error("failed to extract {}: {source}", .path.display())]
    Extract {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
