//! Fixed-window text chunker.
//!
//! Splits a document's extracted text into non-overlapping windows of
//! `chunk_chars` characters. Windows are counted in `char`s, never bytes, so
//! multi-byte text is never split inside a code point.
//!
//! Each chunk carries a fresh UUID and an approximate token count (the number
//! of whitespace-separated words).

use uuid::Uuid;

use crate::models::DocumentChunk;

/// Split text into contiguous chunks with indices starting at 0.
/// Empty text yields no chunks.
pub fn chunk_text(
    document_id: &str,
    project_id: &str,
    text: &str,
    chunk_chars: usize,
) -> Vec<DocumentChunk> {
    let chunk_chars = chunk_chars.max(1);
    let chars: Vec<char> = text.chars().collect();

    chars
        .chunks(chunk_chars)
        .enumerate()
        .map(|(index, window)| {
            let content: String = window.iter().collect();
            make_chunk(document_id, project_id, index as i64, content)
        })
        .collect()
}

/// Approximate token count: whitespace-separated words.
pub fn approx_tokens(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

fn make_chunk(document_id: &str, project_id: &str, index: i64, content: String) -> DocumentChunk {
    DocumentChunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        project_id: project_id.to_string(),
        chunk_index: index,
        token_count: approx_tokens(&content),
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "p1", "Hello, world!", 500);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].token_count, 2);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_text("doc1", "p1", "", 500).is_empty());
    }

    #[test]
    fn test_windows_are_fixed_and_non_overlapping() {
        let text = "a".repeat(1200);
        let chunks = chunk_text("doc1", "p1", &text, 500);
        let lens: Vec<usize> = chunks.iter().map(|c| c.content.len()).collect();
        assert_eq!(lens, vec![500, 500, 200]);
        let rejoined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("doc1", "p1", &text, 37);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert_eq!(c.document_id, "doc1");
            assert_eq!(c.project_id, "p1");
        }
    }

    #[test]
    fn test_multibyte_text_split_on_char_boundaries() {
        let text = "héllo wörld ünïcode";
        let chunks = chunk_text("doc1", "p1", text, 4);
        assert_eq!(chunks[0].content, "héll");
        let rejoined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(rejoined, text);
    }
}
