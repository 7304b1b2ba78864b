//! Page-aware recursive text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of at most
//! `chunk_size` characters with `chunk_overlap` characters carried over
//! between neighbours. Splitting prefers coarse boundaries first
//! (blank-line runs, exam headings, sentence ends) and falls back to finer
//! ones only for pieces that are still too long.
//!
//! # Algorithm
//!
//! 1. For each page, find the first separator in [`SEPARATORS`] that occurs
//!    in the text and cut the text at every occurrence of it.
//! 2. Pieces still longer than `chunk_size` are split again with the
//!    remaining separators; with none left they are hard-split on char
//!    boundaries.
//! 3. Pieces are merged greedily into windows of at most `chunk_size`
//!    chars. When a window is flushed, pieces are dropped from its front
//!    until at most `chunk_overlap` chars remain, and those seed the next
//!    window.
//!
//! Chunk indices are contiguous across the whole document. Pages are
//! 1-based. When the extractor could not see page breaks, the page is
//! estimated as `chunk_index / 3 + 1`.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::chunk::{split_text, ChunkingParams};
//!
//! let pieces = split_text("Hello world.\n\nSecond paragraph.", &ChunkingParams::default());
//! assert_eq!(pieces.len(), 1);
//! ```

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

use crate::models::{Chunk, Document};

/// Separators tried in order, coarsest first.
pub const SEPARATORS: &[&str] = &[
    "\n\n\n", "\n\n", "題目", "問題", "。\n", "\n", "。", "！", "？", ";", ":", "，", " ",
];

/// Page estimate used when the extractor reports no page breaks.
pub const ESTIMATED_CHUNKS_PER_PAGE: usize = 3;

/// Window sizes for [`split_text`], measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 500,
        }
    }
}

/// Text produced by an extractor, one entry per page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub pages: Vec<String>,
    /// `false` when the source format gave no page boundaries and all text
    /// sits in a single entry.
    pub paginated: bool,
}

impl ExtractedText {
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            pages: vec![text.into()],
            paginated: false,
        }
    }

    /// Build from text that marks page breaks with form feeds (`\x0c`).
    /// Text without any form feed is unpaginated.
    pub fn from_form_feeds(text: &str) -> Self {
        if text.contains('\x0c') {
            Self {
                pages: text.split('\x0c').map(str::to_string).collect(),
                paginated: true,
            }
        } else {
            Self::single(text)
        }
    }

    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|p| p.chars().count()).sum()
    }
}

/// Split one document's extracted text into page-tagged chunks.
///
/// Returns no chunks for blank input.
pub fn chunk_document(doc: &Document, text: &ExtractedText, params: &ChunkingParams) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index = 0usize;

    for (page_idx, page_text) in text.pages.iter().enumerate() {
        for piece in split_text(page_text, params) {
            let page = if text.paginated {
                page_idx as u32 + 1
            } else {
                (index / ESTIMATED_CHUNKS_PER_PAGE) as u32 + 1
            };
            chunks.push(make_chunk(doc, index, Some(page), piece));
            index += 1;
        }
    }

    chunks
}

/// Split raw text into overlapping windows. Blank input yields nothing.
pub fn split_text(text: &str, params: &ChunkingParams) -> Vec<String> {
    let size = params.chunk_size.max(1);
    let overlap = params.chunk_overlap.min(size.saturating_sub(1));
    if text.trim().is_empty() {
        return Vec::new();
    }
    let pieces = split_recursive(text, SEPARATORS, size);
    merge_pieces(pieces, size, overlap)
}

fn split_recursive(text: &str, separators: &[&str], size: usize) -> Vec<String> {
    if char_len(text) <= size {
        return vec![text.to_string()];
    }
    let Some(pos) = separators.iter().position(|sep| text.contains(sep)) else {
        return hard_split(text, size);
    };
    let rest = &separators[pos + 1..];

    let mut out = Vec::new();
    for piece in split_on(text, separators[pos]) {
        if char_len(piece) <= size {
            out.push(piece.to_string());
        } else {
            out.extend(split_recursive(piece, rest, size));
        }
    }
    out
}

/// Separators that open a new section rather than close one.
const LEADING_SEPARATORS: &[&str] = &["題目", "問題"];

/// Split `text` on `sep`, keeping the separator. Headings lead the piece
/// that follows them; every other separator closes the piece before it.
fn split_on<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    if !LEADING_SEPARATORS.contains(&sep) {
        return text.split_inclusive(sep).collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            pieces.push(&text[start..idx]);
            start = idx;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn hard_split(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

fn merge_pieces(pieces: Vec<String>, size: usize, overlap: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut window: VecDeque<(String, usize)> = VecDeque::new();
    let mut window_len = 0usize;

    for piece in pieces {
        let len = char_len(&piece);
        if window_len + len > size && !window.is_empty() {
            flush(&window, &mut out);
            while window_len > overlap || (window_len + len > size && window_len > 0) {
                match window.pop_front() {
                    Some((_, dropped)) => window_len -= dropped,
                    None => break,
                }
            }
        }
        window_len += len;
        window.push_back((piece, len));
    }
    if !window.is_empty() {
        flush(&window, &mut out);
    }
    out
}

fn flush(window: &VecDeque<(String, usize)>, out: &mut Vec<String>) {
    let joined: String = window.iter().map(|(p, _)| p.as_str()).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Hex-encoded SHA-256 of a chunk's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(doc: &Document, index: usize, page: Option<u32>, text: String) -> Chunk {
    Chunk {
        id: Chunk::chunk_id(&doc.id, index),
        document_id: doc.id.clone(),
        filename: doc.filename.clone(),
        content_type: doc.content_type.clone(),
        page,
        chunk_index: index,
        hash: content_hash(&text),
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;
    use chrono::Utc;

    fn doc() -> Document {
        Document {
            id: "doc1".into(),
            filename: "notes.txt".into(),
            content_type: "text/plain".into(),
            file_path: "/tmp/notes.txt".into(),
            size_bytes: 0,
            status: DocumentStatus::Processing,
            chunk_count: 0,
            error: None,
            upload_time: Utc::now(),
        }
    }

    fn small(size: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let pieces = split_text("Hello, world!", &ChunkingParams::default());
        assert_eq!(pieces, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        assert!(split_text("  \n\n ", &ChunkingParams::default()).is_empty());
        let chunks = chunk_document(&doc(), &ExtractedText::single(""), &ChunkingParams::default());
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_windows_respect_size() {
        let text = (0..40)
            .map(|i| format!("Sentence number {} is here.", i))
            .collect::<Vec<_>>()
            .join("\n");
        let pieces = split_text(&text, &small(100, 20));
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.chars().count() <= 100, "piece too long: {}", p.len());
        }
    }

    #[test]
    fn test_neighbours_overlap() {
        let text = (0..30)
            .map(|i| format!("line{:02}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let pieces = split_text(&text, &small(40, 15));
        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            let tail_line = pair[0].lines().last().unwrap();
            assert!(
                pair[1].contains(tail_line),
                "expected overlap of {:?} into {:?}",
                tail_line,
                pair[1]
            );
        }
    }

    #[test]
    fn test_cjk_splits_on_full_stop() {
        let sentence = "這是一個測試句子。";
        let text = sentence.repeat(30);
        let pieces = split_text(&text, &small(50, 0));
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.chars().count() <= 50);
            assert!(p.ends_with('。'));
        }
    }

    #[test]
    fn test_unbroken_text_is_hard_split() {
        let text = "x".repeat(250);
        let pieces = split_text(&text, &small(100, 0));
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[2].len(), 50);
    }

    #[test]
    fn test_exam_heading_leads_piece() {
        let text = format!("題目一 {}題目二 {}", "甲".repeat(30), "乙".repeat(30));
        let pieces = split_text(&text, &small(40, 0));
        assert_eq!(pieces.len(), 2);
        assert!(pieces[1].starts_with("題目二"));
    }

    #[test]
    fn test_form_feed_pages_are_numbered() {
        let text = ExtractedText::from_form_feeds("first page text\x0csecond page text");
        let chunks = chunk_document(&doc(), &text, &ChunkingParams::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[1].page, Some(2));
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].id, "doc1_chunk_1");
        assert_eq!(chunks[1].filename, "notes.txt");
    }

    #[test]
    fn test_unpaginated_pages_are_estimated() {
        let text = (0..10)
            .map(|i| format!("Paragraph {} {}", i, "word ".repeat(10)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document(&doc(), &ExtractedText::single(text), &small(60, 0));
        assert!(chunks.len() >= 4);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[2].page, Some(1));
        assert_eq!(chunks[3].page, Some(2));
    }

    #[test]
    fn test_plain_text_without_form_feeds_gets_estimated_pages() {
        let raw = (0..12)
            .map(|i| format!("Paragraph {} {}", i, "word ".repeat(10)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let text = ExtractedText::from_form_feeds(&raw);
        assert!(!text.paginated);
        let chunks = chunk_document(&doc(), &text, &small(60, 0));
        assert!(chunks.len() >= 7);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[2].page, Some(1));
        assert_eq!(chunks[3].page, Some(2));
        assert_eq!(chunks[6].page, Some(3));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document(&doc(), &ExtractedText::single(text), &small(60, 10));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = ExtractedText::single("Alpha\n\nBeta\n\nGamma\n\nDelta");
        let c1 = chunk_document(&doc(), &text, &small(12, 4));
        let c2 = chunk_document(&doc(), &text, &small(12, 4));
        assert_eq!(c1, c2);
        assert_eq!(c1[0].hash, content_hash(&c1[0].text));
    }
}
