//! Deterministic recursive character chunking.
//!
//! Text is split preferring the coarsest separator that occurs: paragraph
//! break, line break, space, and finally fixed grapheme windows. Pieces are
//! merged back into chunks no longer than `max_size`, with consecutive
//! chunks sharing up to `overlap` trailing context. Sizes are measured in
//! grapheme clusters so a window never lands inside a combining sequence.

use std::collections::VecDeque;

use unicode_segmentation::UnicodeSegmentation;

use crate::config::ConfigError;
use crate::types::{Chunk, ChunkRecord, ParsedDocument};

/// Separator priority before the grapheme-window fallback.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

fn grapheme_len(text: &str) -> usize {
    text.graphemes(true).count()
}

/// Splits document text into bounded, overlapping chunks.
///
/// Deterministic for a fixed `(max_size, overlap)`: the same input always
/// yields the same sequence of chunks.
#[derive(Clone, Debug)]
pub struct TextChunker {
    max_size: usize,
    overlap: usize,
}

impl TextChunker {
    /// Chunker with `max_size`/`overlap` measured in grapheme clusters.
    ///
    /// `overlap` must be strictly smaller than `max_size` so every window
    /// makes forward progress.
    pub fn new(max_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if max_size == 0 || overlap >= max_size {
            return Err(ConfigError::InvalidChunkGeometry { max_size, overlap });
        }
        Ok(Self { max_size, overlap })
    }

    /// Chunks every parsed record of one source document.
    ///
    /// `chunk_id`s are 1-based and run monotonically across all records of
    /// the document, in emission order.
    pub fn chunk_document(&self, records: &[ParsedDocument]) -> Vec<Chunk> {
        let mut next_id = 0u32;
        records
            .iter()
            .flat_map(|record| self.chunk_record(record, &mut next_id))
            .collect()
    }

    /// Chunks a single parsed record, copying its metadata into every chunk
    /// and continuing the id sequence from `next_id`.
    pub fn chunk_record(&self, document: &ParsedDocument, next_id: &mut u32) -> Vec<Chunk> {
        self.split_text(&document.text)
            .into_iter()
            .map(|text| {
                *next_id += 1;
                Chunk::unembedded(ChunkRecord {
                    text,
                    source: document.source.clone(),
                    locator: document.locator,
                    kind: document.kind,
                    chunk_id: *next_id,
                })
            })
            .collect()
    }

    /// Splits raw text into chunk strings.
    ///
    /// Empty or whitespace-only input yields an empty sequence, not an
    /// error.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if grapheme_len(text) <= self.max_size {
            return vec![text.to_string()];
        }
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let Some((sep, rest)) = separators.split_first() else {
            return self.grapheme_windows(text);
        };
        if !text.contains(sep) {
            return if grapheme_len(text) <= self.max_size {
                vec![text.to_string()]
            } else {
                self.split_with(text, rest)
            };
        }

        let mut output = Vec::new();
        let mut run: Vec<String> = Vec::new();
        for piece in text.split(sep).filter(|piece| !piece.is_empty()) {
            if grapheme_len(piece) <= self.max_size {
                run.push(piece.to_string());
            } else {
                // an oversized piece breaks the overlap chain: flush what we
                // have, then split the piece with the finer separators
                self.merge_run(&mut output, &mut run, sep);
                output.extend(self.split_with(piece, rest));
            }
        }
        self.merge_run(&mut output, &mut run, sep);
        output
    }

    /// Greedily joins same-level pieces into chunks of at most `max_size`,
    /// retaining a tail of pieces totalling at most `overlap` as shared
    /// context for the next chunk.
    fn merge_run(&self, output: &mut Vec<String>, run: &mut Vec<String>, sep: &str) {
        if run.is_empty() {
            return;
        }
        let sep_len = grapheme_len(sep);
        let mut window: VecDeque<(String, usize)> = VecDeque::new();
        let mut window_len = 0usize;

        for piece in run.drain(..) {
            let piece_len = grapheme_len(&piece);
            let projected = if window.is_empty() {
                piece_len
            } else {
                window_len + sep_len + piece_len
            };
            if projected > self.max_size && !window.is_empty() {
                push_joined(output, &window, sep);
                while !window.is_empty()
                    && (window_len > self.overlap
                        || window_len + sep_len + piece_len > self.max_size)
                {
                    if let Some((_, dropped_len)) = window.pop_front() {
                        window_len -= dropped_len;
                        if !window.is_empty() {
                            window_len -= sep_len;
                        }
                    }
                }
            }
            window_len = if window.is_empty() {
                piece_len
            } else {
                window_len + sep_len + piece_len
            };
            window.push_back((piece, piece_len));
        }
        push_joined(output, &window, sep);
    }

    /// Fixed windows over grapheme clusters, stepping by
    /// `max_size - overlap` so consecutive windows share exactly `overlap`
    /// clusters.
    fn grapheme_windows(&self, text: &str) -> Vec<String> {
        let graphemes: Vec<&str> = text.graphemes(true).collect();
        if graphemes.len() <= self.max_size {
            return vec![text.to_string()];
        }
        let mut out = Vec::new();
        let mut start = 0usize;
        loop {
            let end = usize::min(start + self.max_size, graphemes.len());
            out.push(graphemes[start..end].concat());
            if end == graphemes.len() {
                break;
            }
            start = end - self.overlap;
        }
        out
    }
}

fn push_joined(output: &mut Vec<String>, window: &VecDeque<(String, usize)>, sep: &str) {
    if window.is_empty() {
        return;
    }
    let joined = window
        .iter()
        .map(|(piece, _)| piece.as_str())
        .collect::<Vec<_>>()
        .join(sep);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        output.push(trimmed.to_string());
    }
}
