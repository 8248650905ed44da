//! Overlapping character-window chunker.
//!
//! Splits extracted text into windows of at most `chunk_size` characters.
//! Each window ends at the latest "natural" boundary it contains, tried in
//! this order:
//!
//! 1. paragraph break (`\n\n`)
//! 2. line break (`\n`)
//! 3. sentence end (`. `, `! `, `? `)
//! 4. any whitespace
//! 5. hard cut at `chunk_size`
//!
//! The next window starts exactly `chunk_overlap` characters before the
//! previous one ended, so dropping the first `chunk_overlap` characters of
//! every chunk but the first and concatenating reconstructs the input.
//!
//! Lengths are measured in Unicode scalar values, never bytes, so a window
//! boundary can never split a multi-byte character.

use crate::config::ChunkingConfig;
use crate::error::{ConciergeError, Result};
use crate::models::{chunk_id, ChunkRecord};

const SENTENCE_ENDS: [&str; 3] = [". ", "! ", "? "];

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ConciergeError::InvalidChunking(format!(
                "overlap ({}) must be smaller than a non-zero chunk size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into overlapping chunks. Empty or whitespace-only input
    /// yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Byte offset of every char boundary, including the end of text.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = bounds.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let limit = (start + self.chunk_size).min(total);
            let end = if limit < total {
                self.cut_point(&text[bounds[start]..bounds[limit]], start, limit)
            } else {
                limit
            };
            chunks.push(text[bounds[start]..bounds[end]].to_string());
            if end >= total {
                break;
            }
            start = end - self.chunk_overlap;
        }
        chunks
    }

    /// Char offset at which the window `[start, limit)` should end.
    ///
    /// A boundary is only taken if the chunk stays longer than the overlap;
    /// otherwise the next window would not advance.
    fn cut_point(&self, window: &str, start: usize, limit: usize) -> usize {
        let min_end = start + self.chunk_overlap;
        let after = |byte_pos: usize| start + window[..byte_pos].chars().count();

        for seps in [&["\n\n"][..], &["\n"][..], &SENTENCE_ENDS[..]] {
            let best = seps
                .iter()
                .filter_map(|sep| window.rfind(sep).map(|p| after(p + sep.len())))
                .max();
            if let Some(cut) = best.filter(|&c| c > min_end) {
                return cut;
            }
        }

        if let Some((p, c)) = window.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            let cut = after(p + c.len_utf8());
            if cut > min_end {
                return cut;
            }
        }

        limit
    }

    /// Split a document's text into records carrying `"{doc_id}_{index}"` ids.
    pub fn chunk_document(&self, doc_id: &str, text: &str) -> Vec<ChunkRecord> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| ChunkRecord {
                chunk_id: chunk_id(doc_id, index),
                index,
                text,
            })
            .collect()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(chunks: &[String], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(c);
            } else {
                out.extend(c.chars().skip(overlap));
            }
        }
        out
    }

    fn sample_text() -> String {
        let mut text = String::new();
        for p in 0..12 {
            for s in 0..9 {
                text.push_str(&format!("Paragraph {} sentence {} talks about ducks. ", p, s));
            }
            text.push_str("\n\n");
        }
        text
    }

    #[test]
    fn empty_and_whitespace_yield_nothing() {
        let chunker = Chunker::default();
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("  \n\t \n").is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = Chunker::default().split("Hello, world!");
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn invalid_parameters_rejected() {
        assert!(matches!(
            Chunker::new(100, 100),
            Err(ConciergeError::InvalidChunking(_))
        ));
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(100, 99).is_ok());
    }

    #[test]
    fn chunks_respect_size_and_reconstruct() {
        let text = sample_text();
        let chunker = Chunker::default();
        let chunks = chunker.split(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 1000);
        }
        assert_eq!(reconstruct(&chunks, 200), text);
    }

    #[test]
    fn neighbours_share_exact_overlap() {
        let text = sample_text();
        let chunks = Chunker::new(300, 50).unwrap().split(&text);
        for pair in chunks.windows(2) {
            let tail: String = {
                let chars: Vec<char> = pair[0].chars().collect();
                chars[chars.len() - 50..].iter().collect()
            };
            let head: String = pair[1].chars().take(50).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b ".repeat(60));
        let chunks = Chunker::new(100, 10).unwrap().split(&text);
        assert!(chunks[0].ends_with("\n\n"));
        assert_eq!(chunks[0].chars().count(), 62);
    }

    #[test]
    fn hard_cut_without_whitespace() {
        let text = "x".repeat(250);
        let chunks = Chunker::new(100, 20).unwrap().split(&text);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(reconstruct(&chunks, 20), text);
    }

    #[test]
    fn multibyte_text_never_splits_a_char() {
        let text = "日本語のテキスト。".repeat(80);
        let chunks = Chunker::new(50, 10).unwrap().split(&text);
        for c in &chunks {
            assert!(c.chars().count() <= 50);
        }
        assert_eq!(reconstruct(&chunks, 10), text);
    }

    #[test]
    fn deterministic_output() {
        let text = sample_text();
        let chunker = Chunker::new(400, 80).unwrap();
        assert_eq!(chunker.split(&text), chunker.split(&text));
    }

    #[test]
    fn document_records_have_derived_ids() {
        let records = Chunker::new(100, 10)
            .unwrap()
            .chunk_document("doc", &"word ".repeat(60));
        assert!(records.len() > 1);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.index, i);
            assert_eq!(r.chunk_id, format!("doc_{}", i));
        }
    }
}
