//! Overlapping, sentence-aware text chunker.
//!
//! Splits extracted document text into windows of `chunk_size` characters
//! that overlap by `chunk_overlap` characters. A window that ends before the
//! end of the text is shortened to the last `.` or `\n` it contains, as long
//! as that delimiter sits at or beyond half of the window, so chunks rarely
//! cut a sentence in two without becoming pathologically short.
//!
//! # Algorithm
//!
//! 1. Take `chunk_size` characters starting at `start`.
//! 2. If the window ends before the text does, find the last `.` or `\n`
//!    in it; when that offset is `>= chunk_size / 2`, cut the window right
//!    after the delimiter.
//! 3. Trim the window and keep it if non-empty.
//! 4. Stop once a window reaches the end of the text; otherwise continue at
//!    `window_end - chunk_overlap` (or `window_end` if that would not move
//!    forward).
//!
//! Sizes are measured in Unicode scalar values, never bytes.
//!
//! # Example
//!
//! ```rust
//! use rag_agent::chunk::split_text;
//!
//! let chunks = split_text("One sentence. Another one.", 500, 100);
//! assert_eq!(chunks, vec!["One sentence. Another one.".to_string()]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::DocumentChunk;

/// Split text into overlapping chunks.
///
/// Requires `chunk_size > chunk_overlap`; the config loader enforces this.
/// An overlap that is not smaller than the size is clamped so the walk
/// still terminates.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size - 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = (start + chunk_size).min(len);

        if end < len {
            if let Some(break_point) = last_break(&chars[start..end]) {
                if break_point * 2 >= chunk_size {
                    end = start + break_point + 1;
                }
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= len {
            break;
        }

        let next = end.saturating_sub(chunk_overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Offset of the last sentence terminator (`.`) or newline in the window.
fn last_break(window: &[char]) -> Option<usize> {
    window.iter().rposition(|&c| c == '.' || c == '\n')
}

/// Chunk a document's text and attach positional metadata.
///
/// Returns chunks with contiguous indices `0..total_chunks`. Each chunk's
/// `hash` is the SHA-256 of its text.
pub fn chunk_document(
    source: &str,
    file_path: &str,
    text: &str,
    config: &ChunkingConfig,
) -> Vec<DocumentChunk> {
    let pieces = split_text(text, config.chunk_size, config.chunk_overlap);
    let total = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| make_chunk(source, file_path, index, total, piece))
        .collect()
}

/// Create a single [`DocumentChunk`] with a UUID and SHA-256 content hash.
fn make_chunk(
    source: &str,
    file_path: &str,
    index: usize,
    total: usize,
    text: String,
) -> DocumentChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    DocumentChunk {
        id: Uuid::new_v4().to_string(),
        text,
        source: source.to_string(),
        chunk_index: index,
        total_chunks: total,
        file_path: file_path.to_string(),
        hash,
    }
}
