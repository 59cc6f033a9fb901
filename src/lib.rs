//! docloom: document ingestion-to-retrieval pipeline.
//!
//! Parsed documents are cleaned, chunked, embedded in resilient batches,
//! and appended to a persistent flat vector index whose metadata list is
//! kept positionally aligned with the vector rows.
//!
//! ```text
//! Parsed pages/sections ──► ingestion::clean_text ──► chunking::TextChunker
//!                                                          │
//!                              ordered chunks ◄────────────┘
//!                                    │
//!             embeddings::BatchEmbedder (bisects oversized batches,
//!                                    │   degrades unembeddable texts)
//!                                    ▼
//!             stores::FlatVectorStore::add ──► snapshot save
//!                                                (vectors.bin + chunks.json)
//!
//! query text ──► embeddings ──► FlatVectorStore::search ──► (ChunkRecord, score)
//! ```
//!
//! The write path is driven by [`ingestion::IngestionPipeline`]; the store
//! and the embedding seam are usable on their own. PDF/HTML parsing, HTTP
//! surfaces, and answer generation are external collaborators that consume
//! this crate's `ingest`/`search` interface.

pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod ingestion;
pub mod stores;
pub mod types;

pub use chunking::TextChunker;
pub use config::{ConfigError, PipelineConfig};
pub use embeddings::{
    BatchEmbedder, DegradePolicy, DegradeReason, EmbedError, EmbedOutcome, EmbeddingProvider,
    MistralConfig, MistralEmbedder, MockEmbeddingProvider,
};
pub use ingestion::{
    IngestError, IngestReport, IngestionPipeline, PersistOutcome, QueryError, clean_text,
};
pub use stores::{FlatVectorStore, StoreError};
pub use types::{Chunk, ChunkRecord, EmbeddingState, ParsedDocument, SourceKind};
