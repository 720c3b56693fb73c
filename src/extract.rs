//! PDF text extraction.
//!
//! Turns a PDF file (or its bytes) into plain UTF-8 text. Failures are
//! returned, never panicked on; the ingestion pipeline logs and skips them.
//! A panic inside the PDF parser on a malformed file is caught and reported
//! as [`ExtractError::Pdf`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

/// Extract the text of every page of a PDF file, in page order.
pub fn extract_pdf_file(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    extract_pdf_bytes(&bytes)
}

/// Extract text from an in-memory PDF.
pub fn extract_pdf_bytes(bytes: &[u8]) -> Result<String, ExtractError> {
    catch_panics(|| {
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
    })
}

fn catch_panics<F>(extract: F) -> Result<String, ExtractError>
where
    F: FnOnce() -> Result<String, ExtractError>,
{
    panic::catch_unwind(AssertUnwindSafe(extract)).unwrap_or_else(|payload| {
        Err(ExtractError::Pdf(format!(
            "parser panicked: {}",
            panic_message(&*payload)
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
