//! Core data model for the ingestion-to-retrieval pipeline.
//!
//! Everything that flows between the pipeline stages is a typed record:
//! parsed pages/sections come in as [`ParsedDocument`], the chunker turns
//! them into [`Chunk`]s, and the store persists one [`ChunkRecord`] per
//! vector row. Embedding presence is modeled as the [`EmbeddingState`] sum
//! type rather than an optional field checked at runtime.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

/// Origin of a parsed document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pdf,
    Web,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Pdf => f.write_str("pdf"),
            SourceKind::Web => f.write_str("web"),
        }
    }
}

/// One record emitted by the (external) document parser, before chunking.
///
/// PDF parsing yields one record per non-empty page (`locator` is the
/// 1-based page number); web parsing yields one record per extracted
/// section (`locator` is the 1-based section index).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub text: String,
    /// File path or URL identifying the source document.
    pub source: String,
    /// Page number (PDF) or section index (web), 1-based.
    pub locator: u32,
    pub kind: SourceKind,
}

impl ParsedDocument {
    /// Record for one page of a PDF file.
    pub fn pdf(path: impl AsRef<Path>, page: u32, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: path.as_ref().display().to_string(),
            locator: page,
            kind: SourceKind::Pdf,
        }
    }

    /// Record for one section of a web page.
    pub fn web(url: &Url, section: u32, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: url.to_string(),
            locator: section,
            kind: SourceKind::Web,
        }
    }
}

/// Metadata record persisted at the same position as its vector.
///
/// Carries no embedding and no lookup key: the row index in the vector
/// index is the only correlation between a record and its vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    pub source: String,
    pub locator: u32,
    pub kind: SourceKind,
    /// 1-based sequence number within the chunks of one source document.
    pub chunk_id: u32,
}

/// Embedding attachment state of a chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum EmbeddingState {
    Unembedded,
    Embedded(Vec<f32>),
}

impl EmbeddingState {
    /// Returns the vector if one is attached.
    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            EmbeddingState::Unembedded => None,
            EmbeddingState::Embedded(vector) => Some(vector),
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, EmbeddingState::Embedded(_))
    }
}

/// A bounded segment of a source document flowing through the pipeline.
///
/// Created unembedded by the chunker, mutated once to attach its embedding,
/// then moved by value into the vector store. There is no per-chunk update
/// or delete once stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub record: ChunkRecord,
    pub embedding: EmbeddingState,
}

impl Chunk {
    /// A freshly chunked segment with no embedding yet.
    pub fn unembedded(record: ChunkRecord) -> Self {
        Self {
            record,
            embedding: EmbeddingState::Unembedded,
        }
    }

    /// Attaches the embedding produced for this chunk's text.
    pub fn attach_embedding(&mut self, vector: Vec<f32>) {
        self.embedding = EmbeddingState::Embedded(vector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&SourceKind::Pdf).unwrap(), "\"pdf\"");
        assert_eq!(serde_json::to_string(&SourceKind::Web).unwrap(), "\"web\"");
    }

    #[test]
    fn chunk_record_round_trips_through_json() {
        let record = ChunkRecord {
            text: "chunk body".to_string(),
            source: "docs/handbook.pdf".to_string(),
            locator: 3,
            kind: SourceKind::Pdf,
            chunk_id: 7,
        };
        let json = serde_json::to_string(&record).unwrap();
        let parsed: ChunkRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }

    #[test]
    fn parsed_document_constructors_normalize_sources() {
        let pdf = ParsedDocument::pdf("docs/handbook.pdf", 2, "page text");
        assert_eq!(pdf.source, "docs/handbook.pdf");
        assert_eq!(pdf.locator, 2);
        assert_eq!(pdf.kind, SourceKind::Pdf);

        let url = Url::parse("https://example.com/guide").unwrap();
        let web = ParsedDocument::web(&url, 1, "section text");
        assert_eq!(web.source, "https://example.com/guide");
        assert_eq!(web.kind, SourceKind::Web);
    }

    #[test]
    fn embedding_attaches_once() {
        let mut chunk = Chunk::unembedded(ChunkRecord {
            text: "t".to_string(),
            source: "s".to_string(),
            locator: 1,
            kind: SourceKind::Web,
            chunk_id: 1,
        });
        assert!(!chunk.embedding.is_embedded());
        chunk.attach_embedding(vec![0.5, 0.5]);
        assert_eq!(chunk.embedding.as_vector(), Some(&[0.5, 0.5][..]));
    }
}
