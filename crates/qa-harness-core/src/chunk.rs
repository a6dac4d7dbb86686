//! Boundary-aware text chunker with overlap.
//!
//! Splits normalized document text into [`Chunk`]s of at most `chunk_size`
//! characters. Consecutive chunks of the same document share exactly
//! `chunk_overlap` characters, so dropping the overlap prefix of every chunk
//! after the first and concatenating reproduces the original text.
//!
//! # Algorithm
//!
//! 1. Skip documents whose text is empty or whitespace-only.
//! 2. If the remaining text fits in `chunk_size`, emit it and stop.
//! 3. Otherwise look inside the `chunk_size` window for the last
//!    paragraph break (`\n\n`), then line break, sentence end (`. `), then
//!    space, and cut right after it.
//! 4. Fall back to a hard cut at the window end when no boundary leaves
//!    room for forward progress.
//! 5. Start the next window `chunk_overlap` characters before the cut.
//!
//! Sizes are counted in Unicode scalar values, never bytes.
//!
//! # Example
//!
//! ```rust
//! use qa_harness_core::chunk::{chunk_text, ChunkingParams};
//!
//! let params = ChunkingParams::new(800, 100).unwrap();
//! let chunks = chunk_text("doc.md", "Hello world.\n\nSecond paragraph.", &params, 0);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use anyhow::{bail, Result};

use crate::models::{Chunk, Document};

/// Natural boundaries in priority order. A hard cut is the implicit last resort.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Validated chunking parameters (character counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkingParams {
    /// # Errors
    ///
    /// Fails when `chunk_size` is zero or `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 100,
        }
    }
}

/// Result of chunking a batch of documents.
#[derive(Debug, Clone, Default)]
pub struct ChunkOutput {
    pub chunks: Vec<Chunk>,
    /// Source ids of documents dropped for having no text.
    pub skipped: Vec<String>,
}

impl ChunkOutput {
    /// Sorted distinct source ids that produced at least one chunk.
    pub fn chunked_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.chunks.iter().map(|c| c.source_id.clone()).collect();
        sources.sort();
        sources.dedup();
        sources
    }
}

/// Chunk an ordered list of documents, numbering chunks from `first_ordinal`.
///
/// Overlap never crosses a document boundary. Blank documents are listed in
/// [`ChunkOutput::skipped`] instead of producing chunks.
pub fn chunk_documents(
    documents: &[Document],
    params: &ChunkingParams,
    first_ordinal: usize,
) -> ChunkOutput {
    let mut out = ChunkOutput::default();
    for doc in documents {
        if doc.is_blank() {
            out.skipped.push(doc.source_id.clone());
            continue;
        }
        let next = first_ordinal + out.chunks.len();
        out.chunks
            .extend(chunk_text(&doc.source_id, &doc.text, params, next));
    }
    out
}

/// Split a single document's text into chunks numbered from `first_ordinal`.
///
/// Returns an empty vector for blank text.
pub fn chunk_text(
    source_id: &str,
    text: &str,
    params: &ChunkingParams,
    first_ordinal: usize,
) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    // Byte offset of every char, plus the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = if total - start <= params.chunk_size {
            total
        } else {
            split_point(text, &bounds, start, params)
        };
        chunks.push(Chunk {
            source_id: source_id.to_string(),
            ordinal: first_ordinal + chunks.len(),
            text: text[bounds[start]..bounds[end]].to_string(),
        });
        if end == total {
            break;
        }
        start = end - params.chunk_overlap;
    }
    chunks
}

/// Pick the cut (char index, exclusive) for the window starting at `start`.
fn split_point(text: &str, bounds: &[usize], start: usize, params: &ChunkingParams) -> usize {
    let limit = start + params.chunk_size;
    // The next window starts at `end - overlap` and must move forward.
    let min_end = start + params.chunk_overlap + 1;
    let window = &text[bounds[start]..bounds[limit]];

    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let end_byte = bounds[start] + pos + sep.len();
            let end = bounds.binary_search(&end_byte).unwrap_or_else(|i| i);
            if end >= min_end {
                return end;
            }
        }
    }
    limit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(size: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams::new(size, overlap).unwrap()
    }

    fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&c.text);
            } else {
                out.extend(c.text.chars().skip(overlap));
            }
        }
        out
    }

    fn sample_text() -> String {
        (0..40)
            .map(|i| {
                format!(
                    "Paragraph {} covers the checkout flow. Users enter a discount code.\nThe total updates.",
                    i
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn params_reject_invalid_values() {
        assert!(ChunkingParams::new(0, 0).is_err());
        assert!(ChunkingParams::new(100, 100).is_err());
        assert!(ChunkingParams::new(100, 150).is_err());
        assert!(ChunkingParams::new(100, 99).is_ok());
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", &params(800, 100), 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn blank_text_yields_nothing() {
        assert!(chunk_text("doc1", "", &params(800, 100), 0).is_empty());
        assert!(chunk_text("doc1", " \n\n\t", &params(800, 100), 0).is_empty());
    }

    #[test]
    fn chunks_respect_size_and_reconstruct() {
        let text = sample_text();
        for (size, overlap) in [(50, 0), (50, 10), (120, 30), (200, 199), (7, 3), (1, 0)] {
            let chunks = chunk_text("doc", &text, &params(size, overlap), 0);
            for c in &chunks {
                assert!(
                    c.text.chars().count() <= size,
                    "chunk longer than {}: {:?}",
                    size,
                    c.text
                );
                assert!(!c.text.is_empty());
            }
            assert_eq!(reconstruct(&chunks, overlap), text, "size={} overlap={}", size, overlap);
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap() {
        let text = sample_text();
        let chunks = chunk_text("doc", &text, &params(120, 25), 0);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let tail: String = prev[prev.len() - 25..].iter().collect();
            let head: String = pair[1].text.chars().take(25).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let text = "aaaa\n\nbbbb cccc";
        let chunks = chunk_text("doc", text, &params(10, 0), 0);
        assert_eq!(chunks[0].text, "aaaa\n\n");
        assert_eq!(chunks[1].text, "bbbb cccc");
    }

    #[test]
    fn falls_back_to_word_boundary_then_hard_cut() {
        let chunks = chunk_text("doc", "alpha beta gamma", &params(8, 0), 0);
        assert_eq!(chunks[0].text, "alpha ");

        let chunks = chunk_text("doc", "abcdefghijkl", &params(5, 0), 0);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcde", "fghij", "kl"]);
    }

    #[test]
    fn multibyte_text_counts_chars() {
        let text = "héllo wörld ünïcode ✓✓✓ façade";
        let chunks = chunk_text("doc", text, &params(6, 2), 0);
        for c in &chunks {
            assert!(c.text.chars().count() <= 6);
        }
        assert_eq!(reconstruct(&chunks, 2), text);
    }

    #[test]
    fn ordinals_are_global_and_overlap_stays_within_documents() {
        let docs = vec![
            Document::new("a.md", "Checkout allows discount codes"),
            Document::new("empty.txt", "   "),
            Document::new("b.md", "Errors show in red banner"),
        ];
        let out = chunk_documents(&docs, &params(800, 100), 0);
        assert_eq!(out.chunks.len(), 2);
        assert_eq!(out.chunks[0].ordinal, 0);
        assert_eq!(out.chunks[1].ordinal, 1);
        assert_eq!(out.chunks[1].text, "Errors show in red banner");
        assert_eq!(out.skipped, vec!["empty.txt".to_string()]);
        assert_eq!(out.chunked_sources(), vec!["a.md", "b.md"]);
    }

    #[test]
    fn first_ordinal_offsets_numbering() {
        let docs = vec![Document::new("a.md", "one two three four five six")];
        let out = chunk_documents(&docs, &params(10, 2), 7);
        for (i, c) in out.chunks.iter().enumerate() {
            assert_eq!(c.ordinal, 7 + i);
        }
    }

    #[test]
    fn deterministic() {
        let text = sample_text();
        let c1 = chunk_text("doc", &text, &params(90, 15), 0);
        let c2 = chunk_text("doc", &text, &params(90, 15), 0);
        assert_eq!(c1, c2);
    }
}
