//! Recursive character chunker.
//!
//! Splits page text into [`Chunk`]s of at most `chunk_size` characters, with
//! up to `chunk_overlap` characters carried over from the previous chunk.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from `["\n\n", "\n", " ", ""]` that occurs in
//!    the text (`""` always matches and means "cut between characters").
//! 2. Cut the text before every occurrence of that separator, so each piece
//!    starts with the separator it was cut at.
//! 3. Pieces shorter than `chunk_size` are greedily merged into chunks; when
//!    the next piece would overflow, the chunk is emitted and pieces are
//!    dropped from its front until at most `chunk_overlap` characters remain.
//! 4. Pieces that are too long on their own are split again with the
//!    remaining, lower-priority separators.
//!
//! Emitted chunks are whitespace-trimmed and never empty. Lengths are in
//! characters, not bytes.
//!
//! Chunking runs page by page, so every chunk belongs to exactly one page
//! and inherits that page's file name and page number.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, PageRecord};

/// Separators in priority order: paragraph, line, word, character.
pub const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Chunk every page, numbering chunks contiguously across the corpus.
pub fn chunk_pages(pages: &[PageRecord], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for page in pages {
        for text in split_text(&page.text, config.chunk_size, config.chunk_overlap) {
            chunks.push(make_chunk(chunks.len(), page, text));
        }
    }
    chunks
}

/// Split text into overlapping segments of at most `chunk_size` characters.
///
/// Empty or whitespace-only input yields no segments.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    split_recursive(text, &SEPARATORS, chunk_size, chunk_overlap)
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let mut separator = "";
    let mut fallback: &[&str] = &[];
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            break;
        }
        if text.contains(sep) {
            separator = sep;
            fallback = &separators[i + 1..];
            break;
        }
    }

    let mut chunks = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in split_keep_separator(text, separator) {
        if char_len(piece) < chunk_size {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            chunks.extend(merge_pieces(&fitting, chunk_size, chunk_overlap));
            fitting.clear();
        }

        if fallback.is_empty() {
            chunks.push(piece.to_string());
        } else {
            chunks.extend(split_recursive(piece, fallback, chunk_size, chunk_overlap));
        }
    }

    if !fitting.is_empty() {
        chunks.extend(merge_pieces(&fitting, chunk_size, chunk_overlap));
    }

    chunks
}

/// Cut `text` before each occurrence of `separator`. An empty separator cuts
/// between every character. Empty pieces are dropped.
fn split_keep_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(&text[start..pos]);
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedily merge small pieces into chunks with trailing overlap.
fn merge_pieces(pieces: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);

        if total + len > chunk_size && !window.is_empty() {
            if let Some(chunk) = join_window(&window) {
                chunks.push(chunk);
            }
            while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                match window.pop_front() {
                    Some((_, dropped)) => total -= dropped,
                    None => break,
                }
            }
        }

        window.push_back((piece, len));
        total += len;
    }

    if let Some(chunk) = join_window(&window) {
        chunks.push(chunk);
    }

    chunks
}

fn join_window(window: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = window.iter().map(|(p, _)| *p).collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Create a single [`Chunk`] with a SHA-256 content hash.
fn make_chunk(ordinal: usize, page: &PageRecord, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        ordinal,
        source: page.source.clone(),
        page: page.page,
        text,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(source: &str, page: u32, text: &str) -> PageRecord {
        PageRecord {
            source: source.to_string(),
            page,
            text: text.to_string(),
        }
    }

    fn numbered_words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 1000, 200);
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(split_text("", 1000, 200).is_empty());
        assert!(split_text("  \n\n \n ", 1000, 200).is_empty());
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let text = "aaaa aaaa aaaa\n\nbbbb bbbb bbbb";
        let chunks = split_text(text, 20, 5);
        assert_eq!(chunks, vec!["aaaa aaaa aaaa", "bbbb bbbb bbbb"]);
    }

    #[test]
    fn test_falls_back_to_lines_inside_long_paragraph() {
        let text = "line one here\nline two here\n\nshort";
        let chunks = split_text(text, 16, 0);
        assert_eq!(chunks, vec!["line one here", "line two here", "short"]);
    }

    #[test]
    fn test_hard_cut_without_separators() {
        let text = "x".repeat(25);
        let chunks = split_text(&text, 10, 0);
        let lens: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn test_chunks_respect_size_bound() {
        let text = numbered_words(400);
        for (size, overlap) in [(50, 20), (100, 0), (33, 10)] {
            for c in split_text(&text, size, overlap) {
                assert!(c.chars().count() <= size, "chunk too long: {:?}", c);
            }
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = numbered_words(200);
        let chunks = split_text(&text, 50, 20);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let first_word = pair[1].split_whitespace().next().unwrap();
            assert!(
                pair[0].split_whitespace().any(|w| w == first_word),
                "no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_chunks_cover_all_words() {
        let text = numbered_words(300);
        let chunks = split_text(&text, 60, 25);

        let mut rebuilt: Vec<&str> = Vec::new();
        for chunk in &chunks {
            let words: Vec<&str> = chunk.split_whitespace().collect();
            let shared = (0..=words.len().min(rebuilt.len()))
                .rev()
                .find(|&k| rebuilt[rebuilt.len() - k..] == words[..k])
                .unwrap_or(0);
            rebuilt.extend_from_slice(&words[shared..]);
        }

        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hällo wörld      │\n└──────────────────┘";
        let chunks = split_text(text, 7, 2);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.chars().count() <= 7);
        }
    }

    #[test]
    fn test_chunk_pages_preserves_metadata() {
        let pages = vec![
            page("cv.pdf", 1, "Skills: Python, Go."),
            page("cv.pdf", 2, "Certified: AWS, 2023."),
            page("cert.pdf", 4, &numbered_words(60)),
        ];
        let chunks = chunk_pages(
            &pages,
            &ChunkingConfig {
                chunk_size: 80,
                chunk_overlap: 10,
            },
        );

        assert_eq!(chunks[0].source, "cv.pdf");
        assert_eq!(chunks[0].page, 1);
        assert_eq!(chunks[1].text, "Certified: AWS, 2023.");
        assert_eq!(chunks[1].page, 2);
        assert!(chunks.len() > 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i);
            let origin = pages
                .iter()
                .find(|p| p.source == c.source && p.page == c.page)
                .expect("chunk points at a real page");
            assert!(origin.text.contains(&c.text));
        }
    }

    #[test]
    fn test_deterministic() {
        let pages = vec![page("a.pdf", 1, "Alpha\n\nBeta\n\nGamma\n\nDelta")];
        let cfg = ChunkingConfig {
            chunk_size: 12,
            chunk_overlap: 4,
        };
        let c1 = chunk_pages(&pages, &cfg);
        let c2 = chunk_pages(&pages, &cfg);
        assert_eq!(c1, c2);
    }
}
