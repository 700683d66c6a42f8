//! Boundary-aware overlapping text chunker.
//!
//! Splits extracted document text into chunks of at most `chunk_size`
//! characters, preferring to cut after a paragraph break and then after a
//! sentence ending, as long as the cut lands past the chunk midpoint.
//! Consecutive chunks overlap by up to `chunk_overlap` characters.
//!
//! All offsets are counted in `char`s so multi-byte text is never split
//! inside a code point.

use serde::{Deserialize, Serialize};

const PARAGRAPH_BREAK: [char; 2] = ['\n', '\n'];

/// Checked in order; the first marker with an acceptable match wins.
const SENTENCE_MARKERS: [&str; 6] = [". ", "! ", "? ", ".\n", "!\n", "?\n"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// A chunk tagged with its position among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split `text` into ordered, trimmed, non-empty chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let chunk_size = self.config.chunk_size.max(1);
        let overlap = self.config.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let mut end = (start + chunk_size).min(total);
            if end < total {
                if let Some(boundary) = find_boundary(&chars, start, end, chunk_size) {
                    end = boundary;
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= total {
                break;
            }
            start = (start + 1).max(end.saturating_sub(overlap));
        }

        chunks
    }

    /// Chunk `text` and tag each piece with `document_id`, its index and the
    /// sibling count from this pass.
    pub fn chunk_document(&self, document_id: &str, text: &str) -> Vec<DocumentChunk> {
        let texts = self.chunk(text);
        let total_chunks = texts.len();
        texts
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| DocumentChunk {
                document_id: document_id.to_string(),
                chunk_index,
                total_chunks,
                text,
            })
            .collect()
    }
}

/// Pick a cut point in `(start + chunk_size / 2, end]`, or `None` to keep
/// the hard `end`.
fn find_boundary(chars: &[char], start: usize, end: usize, chunk_size: usize) -> Option<usize> {
    let midpoint = start + chunk_size / 2;
    let window = &chars[start..end];

    if let Some(pos) = rfind(window, &PARAGRAPH_BREAK) {
        if start + pos > midpoint {
            return Some(start + pos + PARAGRAPH_BREAK.len());
        }
    }

    for marker in SENTENCE_MARKERS {
        let needle: Vec<char> = marker.chars().collect();
        if let Some(pos) = rfind(window, &needle) {
            if start + pos > midpoint {
                return Some(start + pos + needle.len());
            }
        }
    }

    None
}

/// Start index of the last occurrence of `needle` fully inside `haystack`.
fn rfind(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| haystack[i..i + needle.len()] == *needle)
}
