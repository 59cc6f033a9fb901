//! Ingestion orchestration: clean → chunk → embed → index → persist.
//!
//! [`IngestionPipeline`] runs the full write path for one parsed document
//! at a time and snapshots the whole store after every successful ingest.
//! Stages abort early on empty extraction or empty chunking, before any
//! store mutation, so prior persisted state is never at risk. The read
//! path ([`IngestionPipeline::search_text`]) embeds the raw query and
//! delegates to the store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::chunking::TextChunker;
use crate::config::{ConfigError, PipelineConfig};
use crate::embeddings::{BatchEmbedder, EmbedError, EmbedOutcome, EmbeddingProvider};
use crate::stores::{FlatVectorStore, StoreError};
use crate::types::{ChunkRecord, ParsedDocument};

static WHITESPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Collapses whitespace runs to single spaces and trims the ends.
///
/// Applied to every parsed record before chunking, mirroring the cleanup
/// parsers typically need for PDF text extraction.
pub fn clean_text(raw: &str) -> String {
    WHITESPACE_RUNS.replace_all(raw.trim(), " ").into_owned()
}

/// Why an ingest aborted before (or at) the store.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no text extracted from {source}")]
    EmptyExtraction { source: String },

    #[error("no chunks produced from {source}")]
    EmptyChunking { source: String },

    /// Only under [`crate::embeddings::DegradePolicy::Fail`].
    #[error("unembeddable chunk in {source}: {reason}")]
    UnembeddableChunk { source: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Faults on the query path.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query embedding failed: {0}")]
    Embed(#[from] EmbedError),

    /// The provider degraded the query text; searching with the zero
    /// vector would score 0.0 against everything and return arbitrary
    /// rows, so this is an error instead.
    #[error("query text could not be embedded: {0}")]
    DegradedQuery(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of the post-ingest snapshot save.
///
/// A failed save is non-fatal: the new rows are present in memory and the
/// next successful save will include them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved(PathBuf),
    Failed(String),
}

impl PersistOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, PersistOutcome::Saved(_))
    }
}

/// Summary of one document's trip through the pipeline.
#[derive(Clone, Debug)]
pub struct IngestReport {
    pub source: String,
    /// Parser records that survived cleaning.
    pub parsed_records: usize,
    pub chunk_count: usize,
    /// Chunks stored with a zero vector because they could not be embedded.
    pub degraded_chunks: usize,
    pub rows_added: usize,
    /// Store size after this ingest.
    pub total_rows: usize,
    pub persistence: PersistOutcome,
}

/// Sequences the per-document write path and exposes the query surface.
///
/// One pipeline owns one store instance; calls are sequential (the
/// single-writer assumption of [`FlatVectorStore`] is enforced by `&mut`).
pub struct IngestionPipeline {
    chunker: TextChunker,
    embedder: BatchEmbedder,
    store: FlatVectorStore,
    store_dir: PathBuf,
}

impl IngestionPipeline {
    /// Builds a pipeline, loading an existing snapshot from
    /// `config.store_dir` when a usable one is present.
    ///
    /// A missing, unreadable, or wrong-dimension snapshot is reported and
    /// replaced with a fresh empty store; it is not an error.
    pub async fn open(
        config: PipelineConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if provider.dimension() != config.dimension {
            return Err(ConfigError::ProviderDimension {
                provider: provider.dimension(),
                configured: config.dimension,
            });
        }

        let chunker = TextChunker::new(config.max_chunk_chars, config.overlap_chars)?;
        let embedder = BatchEmbedder::new(provider, config.batch_size, config.degrade_policy);
        let store = match FlatVectorStore::load(&config.store_dir).await {
            Ok(store) if store.dimension() == config.dimension => {
                info!(rows = store.len(), "loaded existing vector store");
                store
            }
            Ok(store) => {
                warn!(
                    snapshot_dimension = store.dimension(),
                    configured = config.dimension,
                    "snapshot dimension differs from configuration, starting empty"
                );
                FlatVectorStore::new(config.dimension)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    path = %config.store_dir.display(),
                    "no usable snapshot, starting with an empty store"
                );
                FlatVectorStore::new(config.dimension)
            }
        };

        Ok(Self {
            chunker,
            embedder,
            store,
            store_dir: config.store_dir,
        })
    }

    /// Runs the full pipeline for one parsed document.
    ///
    /// `records` is the ordered parser output for a single source document
    /// (one record per PDF page or web section). Empty extraction or empty
    /// chunking aborts the remaining stages for this document; nothing has
    /// been added or saved at that point.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn ingest(&mut self, records: Vec<ParsedDocument>) -> Result<IngestReport, IngestError> {
        let source = records
            .first()
            .map(|record| record.source.clone())
            .unwrap_or_default();

        let cleaned: Vec<ParsedDocument> = records
            .into_iter()
            .map(|mut record| {
                record.text = clean_text(&record.text);
                record
            })
            .filter(|record| !record.text.is_empty())
            .collect();
        if cleaned.is_empty() {
            return Err(IngestError::EmptyExtraction { source });
        }

        let chunks = self.chunker.chunk_document(&cleaned);
        if chunks.is_empty() {
            return Err(IngestError::EmptyChunking { source });
        }
        info!(chunks = chunks.len(), %source, "chunked document");

        let texts: Vec<String> = chunks
            .iter()
            .map(|chunk| chunk.record.text.clone())
            .collect();
        let outcomes = self
            .embedder
            .embed_texts(&texts)
            .await
            .map_err(|err| IngestError::UnembeddableChunk {
                source: source.clone(),
                reason: err.to_string(),
            })?;

        let dimension = self.store.dimension();
        let mut degraded_chunks = 0usize;
        let mut embedded = Vec::with_capacity(chunks.len());
        for (mut chunk, outcome) in chunks.into_iter().zip(outcomes) {
            if outcome.is_degraded() {
                degraded_chunks += 1;
            }
            chunk.attach_embedding(outcome.into_vector(dimension));
            embedded.push(chunk);
        }
        if degraded_chunks > 0 {
            warn!(degraded_chunks, %source, "chunks stored with zero vectors");
        }

        let chunk_count = embedded.len();
        let rows_added = self.store.add(embedded)?;
        let persistence = match self.store.save(&self.store_dir).await {
            Ok(()) => PersistOutcome::Saved(self.store_dir.clone()),
            Err(err) => {
                warn!(error = %err, "snapshot save failed, in-memory store unaffected");
                PersistOutcome::Failed(err.to_string())
            }
        };

        Ok(IngestReport {
            source,
            parsed_records: cleaned.len(),
            chunk_count,
            degraded_chunks,
            rows_added,
            total_rows: self.store.len(),
            persistence,
        })
    }

    /// Embeds `query` and searches the store.
    #[instrument(skip(self, query))]
    pub async fn search_text(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(ChunkRecord, f32)>, QueryError> {
        let texts = [query.to_string()];
        let outcomes = self.embedder.embed_texts(&texts).await?;
        match outcomes.into_iter().next() {
            Some(EmbedOutcome::Embedded(vector)) => Ok(self.store.search(&vector, k)?),
            Some(EmbedOutcome::Degraded(reason)) => {
                Err(QueryError::DegradedQuery(reason.to_string()))
            }
            None => Err(QueryError::DegradedQuery(
                "provider returned no embedding".to_string(),
            )),
        }
    }

    /// Searches with an already-embedded query vector.
    pub fn search_vector(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(ChunkRecord, f32)>, StoreError> {
        self.store.search(query, k)
    }

    pub fn store(&self) -> &FlatVectorStore {
        &self.store
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }
}
