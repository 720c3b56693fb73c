//! Ingestion pipeline: PDF directory → text → chunks → vector store.
//!
//! Only files directly inside the documents directory whose extension is
//! `pdf` (any case) are considered, in file-name order. A file that fails to
//! extract is logged and skipped; the batch continues. A directory without
//! any PDF is an [`IngestError::NoDocuments`]; one whose PDFs yield no text
//! at all is an [`IngestError::NoReadableDocuments`].

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::chunk::chunk_document;
use crate::config::ChunkingConfig;
use crate::error::{IngestError, RagError};
use crate::extract::extract_pdf_file;
use crate::models::DocumentChunk;
use crate::store::VectorStore;

/// Outcome of indexing a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files_found: usize,
    pub files_indexed: usize,
    pub files_failed: usize,
    pub chunks_indexed: usize,
}

/// Extract and chunk one PDF. The chunks' `source` is the file name.
pub fn process_pdf_file(path: &Path, config: &ChunkingConfig) -> Result<Vec<DocumentChunk>, IngestError> {
    let text = extract_pdf_file(path).map_err(|source| IngestError::Extract {
        path: path.to_path_buf(),
        source,
    })?;

    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    Ok(chunk_document(
        &source,
        &path.display().to_string(),
        &text,
        config,
    ))
}

/// PDF files directly inside `dir`, sorted by name.
pub fn find_pdfs(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !dir.is_dir() {
        return Err(IngestError::NoDocuments(dir.to_path_buf()));
    }

    let mut pdfs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_pdf = entry
            .path()
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if is_pdf {
            pdfs.push(entry.into_path());
        }
    }

    if pdfs.is_empty() {
        return Err(IngestError::NoDocuments(dir.to_path_buf()));
    }
    pdfs.sort();
    Ok(pdfs)
}

struct Processed {
    chunks: Vec<DocumentChunk>,
    report: IngestReport,
}

fn process_files(dir: &Path, config: &ChunkingConfig) -> Result<Processed, IngestError> {
    let pdfs = find_pdfs(dir)?;
    let mut report = IngestReport {
        files_found: pdfs.len(),
        ..Default::default()
    };
    let mut chunks = Vec::new();

    for path in &pdfs {
        match process_pdf_file(path, config) {
            Ok(file_chunks) => {
                tracing::info!(
                    file = %path.display(),
                    chunks = file_chunks.len(),
                    "processed PDF"
                );
                report.files_indexed += 1;
                chunks.extend(file_chunks);
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping PDF");
                report.files_failed += 1;
            }
        }
    }

    if chunks.is_empty() {
        tracing::warn!(
            dir = %dir.display(),
            failed = report.files_failed,
            "no readable PDF content"
        );
        return Err(IngestError::NoReadableDocuments(dir.to_path_buf()));
    }

    report.chunks_indexed = chunks.len();
    Ok(Processed { chunks, report })
}

/// Chunks of every readable PDF in `dir`.
pub fn process_directory(dir: &Path, config: &ChunkingConfig) -> Result<Vec<DocumentChunk>, IngestError> {
    Ok(process_files(dir, config)?.chunks)
}

async fn process_files_blocking(dir: &Path, config: &ChunkingConfig) -> Result<Processed, RagError> {
    let dir = dir.to_path_buf();
    let config = config.clone();
    let processed = tokio::task::spawn_blocking(move || process_files(&dir, &config))
        .await
        .map_err(RagError::upstream)??;
    Ok(processed)
}

async fn store_chunks(store: &dyn VectorStore, processed: Processed) -> Result<IngestReport, RagError> {
    let Processed { chunks, mut report } = processed;
    report.chunks_indexed = store.add(&chunks).await.map_err(RagError::Upstream)?;
    tracing::info!(
        collection = store.name(),
        files = report.files_indexed,
        failed = report.files_failed,
        chunks = report.chunks_indexed,
        "indexed documents"
    );
    Ok(report)
}

/// Process `dir` and add its chunks to `store`.
pub async fn index_directory(
    store: &dyn VectorStore,
    dir: &Path,
    config: &ChunkingConfig,
) -> Result<IngestReport, RagError> {
    let processed = process_files_blocking(dir, config).await?;
    store_chunks(store, processed).await
}

/// Index `dir` only if the collection is empty.
///
/// Returns `None` when the existing index was kept or there is nothing
/// readable to index yet.
pub async fn initialize_index(
    store: &dyn VectorStore,
    dir: &Path,
    config: &ChunkingConfig,
) -> Result<Option<IngestReport>, RagError> {
    let stats = store.stats().await.map_err(RagError::Upstream)?;
    if stats.count > 0 {
        tracing::info!(
            collection = %stats.name,
            chunks = stats.count,
            "using existing index"
        );
        return Ok(None);
    }

    match index_directory(store, dir, config).await {
        Ok(report) => Ok(Some(report)),
        Err(RagError::Ingestion(
            IngestError::NoDocuments(empty) | IngestError::NoReadableDocuments(empty),
        )) => {
            tracing::warn!(dir = %empty.display(), "nothing to index");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Replace the collection's contents with the chunks of `dir`.
///
/// Extraction runs before the collection is cleared, so a directory with no
/// PDFs, or none that can be read, fails without touching the existing index.
pub async fn reindex(
    store: &dyn VectorStore,
    dir: &Path,
    config: &ChunkingConfig,
) -> Result<IngestReport, RagError> {
    let processed = process_files_blocking(dir, config).await?;
    store.clear().await.map_err(RagError::Upstream)?;
    tracing::info!(collection = store.name(), "cleared collection");
    store_chunks(store, processed).await
}
