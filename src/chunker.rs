//! Recursive character chunker.
//!
//! Splits document text into segments bounded by `chunk_size` characters,
//! preferring the earliest separator in the priority list (paragraph break,
//! line break, sentence end, space, character boundary) that yields pieces
//! within the limit. Adjacent chunks overlap by `chunk_overlap` characters so
//! context survives chunk boundaries. Chunks whose trimmed length is 20
//! characters or less are discarded as noise.
//!
//! Chunking is deterministic: identical input and parameters always produce
//! the identical chunk sequence. All lengths are counted in characters, not
//! bytes.

use serde_json::{Map, Value};
use std::collections::VecDeque;

use crate::models::Chunk;

/// Separator priority: earliest entry that appears in the text wins; the
/// empty string means a hard split at character boundaries.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Chunks at or below this trimmed length are dropped.
const MIN_CHUNK_CHARS: usize = 20;

/// Splits text into bounded, overlapping chunks.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split text into chunk strings. Empty or whitespace-only input yields
    /// an empty sequence, not an error.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_recursive(text, &SEPARATORS)
            .into_iter()
            .filter(|c| c.trim().chars().count() > MIN_CHUNK_CHARS)
            .collect()
    }

    /// Chunk text and wrap each chunk with `chunk_index` and `total_chunks`
    /// merged into a copy of `base_metadata`.
    pub fn chunk_with_metadata(
        &self,
        text: &str,
        base_metadata: &Map<String, Value>,
    ) -> Vec<Chunk> {
        let pieces = self.chunk_text(text);
        let total = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(i, content)| {
                let mut metadata = base_metadata.clone();
                metadata.insert("chunk_index".to_string(), Value::from(i as u64));
                metadata.insert("total_chunks".to_string(), Value::from(total as u64));
                Chunk { content, metadata }
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        // Pick the earliest separator present in the text; "" always matches.
        let mut separator = *separators.last().unwrap_or(&"");
        let mut remaining: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() || text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut pending: Vec<String> = Vec::new();
        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                pending.push(piece);
            } else {
                if !pending.is_empty() {
                    final_chunks.extend(self.merge_pieces(&pending));
                    pending.clear();
                }
                if remaining.is_empty() {
                    final_chunks.push(piece);
                } else {
                    final_chunks.extend(self.split_recursive(&piece, remaining));
                }
            }
        }
        if !pending.is_empty() {
            final_chunks.extend(self.merge_pieces(&pending));
        }

        final_chunks
    }

    /// Greedily merge small pieces into chunks of at most `chunk_size`
    /// characters, carrying `chunk_overlap` trailing characters into the
    /// next chunk.
    fn merge_pieces(&self, pieces: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let piece_len = char_len(piece);
            if total + piece_len > self.chunk_size && !window.is_empty() {
                let chunk = join_trimmed(&window);
                if !chunk.is_empty() {
                    chunks.push(chunk);
                }
                while total > self.chunk_overlap
                    || (total + piece_len > self.chunk_size && total > 0)
                {
                    let front = match window.pop_front() {
                        Some(f) => f,
                        None => break,
                    };
                    total -= char_len(front);
                }
            }
            window.push_back(piece.as_str());
            total += piece_len;
        }

        let chunk = join_trimmed(&window);
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join_trimmed(window: &VecDeque<&str>) -> String {
    let joined: String = window.iter().copied().collect();
    joined.trim().to_string()
}

/// Split on a separator, keeping each occurrence attached to the start of
/// the following piece. An empty separator splits into single characters.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut boundaries = vec![0usize];
    let mut from = 0usize;
    while let Some(rel) = text[from..].find(separator) {
        let pos = from + rel;
        if pos != 0 {
            boundaries.push(pos);
        }
        from = pos + separator.len();
        if from >= text.len() {
            break;
        }
    }
    boundaries.push(text.len());

    boundaries
        .windows(2)
        .map(|w| text[w[0]..w[1]].to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
