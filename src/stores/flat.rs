//! Append-only flat inner-product index with positional metadata and
//! checksummed snapshot persistence.
//!
//! # Snapshot layout
//!
//! `save` writes two files into the snapshot directory:
//!
//! ```text
//! vectors.bin   magic "DLVI" | version u32 | metric u8 | dims u32
//!               | rows u64 | payload crc32 u32 | rows × dims f32, LE
//! chunks.json   {"rows": n, "checksum": crc32, "chunks": [ChunkRecord...]}
//! ```
//!
//! Correlation between the files is purely positional: row *i* of the
//! payload and record *i* of `chunks` describe the same chunk. Both files
//! carry the row count and the payload checksum, and `load` refuses any
//! pair that disagrees, so a torn or mixed snapshot can never be installed
//! as a store.

use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::types::{Chunk, ChunkRecord, EmbeddingState};

/// File holding the binary vector rows.
pub const INDEX_FILE: &str = "vectors.bin";
/// File holding the ordered chunk metadata records.
pub const METADATA_FILE: &str = "chunks.json";

const MAGIC: [u8; 4] = *b"DLVI";
const FORMAT_VERSION: u32 = 1;
const METRIC_INNER_PRODUCT: u8 = 1;
// magic + version + metric + dims + rows + crc
const HEADER_LEN: usize = 4 + 4 + 1 + 4 + 8 + 4;

/// Faults at the store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector at batch position {position} has dimension {actual}, store expects {expected}")]
    DimensionMismatch {
        position: usize,
        expected: usize,
        actual: usize,
    },

    #[error("chunk {chunk_id} from {source} has no embedding attached")]
    MissingEmbedding { source: String, chunk_id: u32 },

    #[error("query has dimension {actual}, store expects {expected}")]
    QueryDimension { expected: usize, actual: usize },

    #[error("snapshot is corrupt: {0}")]
    CorruptSnapshot(String),

    #[error("metadata encoding failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Flat inner-product vector index with a positionally parallel metadata
/// list.
///
/// Every stored vector has the same fixed dimension, and `add` validates a
/// whole batch before touching either array, so the index and the metadata
/// list can never disagree about length or alignment.
///
/// Not internally synchronized: callers must serialize `add`/`save`/`load`
/// against one instance (single-writer assumption). `search` borrows
/// immutably and may run concurrently with other reads.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatVectorStore {
    dimension: usize,
    /// Row-major vector data, `records.len() * dimension` values.
    vectors: Vec<f32>,
    records: Vec<ChunkRecord>,
}

#[derive(Serialize, Deserialize)]
struct MetadataSnapshot {
    rows: u64,
    checksum: u32,
    chunks: Vec<ChunkRecord>,
}

impl FlatVectorStore {
    /// Empty store for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a batch of embedded chunks, all-or-nothing.
    ///
    /// Every chunk is validated (embedding present, correct dimension)
    /// before anything is appended; one bad chunk rejects the whole batch
    /// and leaves the store untouched. Returns the number of rows added.
    pub fn add(&mut self, chunks: Vec<Chunk>) -> Result<usize, StoreError> {
        for (position, chunk) in chunks.iter().enumerate() {
            match &chunk.embedding {
                EmbeddingState::Unembedded => {
                    return Err(StoreError::MissingEmbedding {
                        source: chunk.record.source.clone(),
                        chunk_id: chunk.record.chunk_id,
                    });
                }
                EmbeddingState::Embedded(vector) if vector.len() != self.dimension => {
                    return Err(StoreError::DimensionMismatch {
                        position,
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
                EmbeddingState::Embedded(_) => {}
            }
        }

        let added = chunks.len();
        for chunk in chunks {
            let Chunk { record, embedding } = chunk;
            if let EmbeddingState::Embedded(vector) = embedding {
                self.vectors.extend_from_slice(&vector);
                self.records.push(record);
            }
        }
        debug!(added, total = self.records.len(), "appended batch to store");
        Ok(added)
    }

    /// Up to `k` results by descending inner product, ties broken by
    /// ascending insertion position.
    ///
    /// Callers wanting cosine similarity pre-normalize their vectors. An
    /// empty store returns an empty vec for any query and any `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(ChunkRecord, f32)>, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::QueryDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .map(|row| row.iter().zip(query).map(|(a, b)| a * b).sum::<f32>())
            .enumerate()
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(row, score)| (self.records[row].clone(), score))
            .collect())
    }

    /// Serializes the store under `directory`, creating it if absent.
    ///
    /// Each file is written to a temporary sibling and renamed into place,
    /// so a failure mid-write never replaces the previous snapshot with a
    /// partial one. In-memory state is unaffected either way.
    #[instrument(skip(self), fields(rows = self.len()))]
    pub async fn save(&self, directory: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(directory).await?;

        let payload = self.encode_rows();
        let checksum = crc32fast::hash(&payload);

        let mut index_bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        index_bytes.extend_from_slice(&MAGIC);
        index_bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        index_bytes.push(METRIC_INNER_PRODUCT);
        index_bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        index_bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        index_bytes.extend_from_slice(&checksum.to_le_bytes());
        index_bytes.extend_from_slice(&payload);

        let snapshot = MetadataSnapshot {
            rows: self.len() as u64,
            checksum,
            chunks: self.records.clone(),
        };
        let metadata_bytes = serde_json::to_vec(&snapshot)?;

        write_atomic(directory, INDEX_FILE, &index_bytes).await?;
        write_atomic(directory, METADATA_FILE, &metadata_bytes).await?;
        info!(path = %directory.display(), rows = self.len(), "saved vector store snapshot");
        Ok(())
    }

    /// Reconstructs a store from a snapshot directory.
    ///
    /// Fails without side effects on a missing file, a corrupt header or
    /// payload, or any disagreement between the two files; callers keep
    /// whatever store they already have.
    #[instrument]
    pub async fn load(directory: &Path) -> Result<Self, StoreError> {
        let index_bytes = fs::read(directory.join(INDEX_FILE)).await?;
        let metadata_bytes = fs::read(directory.join(METADATA_FILE)).await?;

        let header = IndexHeader::decode(&index_bytes)?;
        let payload = &index_bytes[HEADER_LEN..];
        header.check_payload(payload)?;

        let snapshot: MetadataSnapshot = serde_json::from_slice(&metadata_bytes)?;
        if snapshot.rows != header.rows {
            return Err(StoreError::CorruptSnapshot(format!(
                "index holds {} rows but metadata lists {}",
                header.rows, snapshot.rows
            )));
        }
        if snapshot.checksum != header.checksum {
            return Err(StoreError::CorruptSnapshot(
                "vector checksum disagrees between index and metadata files".to_string(),
            ));
        }
        if snapshot.chunks.len() as u64 != header.rows {
            return Err(StoreError::CorruptSnapshot(format!(
                "metadata declares {} rows but carries {} records",
                snapshot.rows,
                snapshot.chunks.len()
            )));
        }

        let mut vectors = Vec::with_capacity(payload.len() / 4);
        for bytes in payload.chunks_exact(4) {
            vectors.push(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
        }

        info!(
            path = %directory.display(),
            rows = header.rows,
            dimension = header.dimension,
            "loaded vector store snapshot"
        );
        Ok(Self {
            dimension: header.dimension,
            vectors,
            records: snapshot.chunks,
        })
    }

    fn encode_rows(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.vectors.len() * 4);
        for value in &self.vectors {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        payload
    }
}

struct IndexHeader {
    dimension: usize,
    rows: u64,
    checksum: u32,
}

impl IndexHeader {
    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < HEADER_LEN {
            return Err(StoreError::CorruptSnapshot(
                "index file shorter than its header".to_string(),
            ));
        }
        if bytes[0..4] != MAGIC {
            return Err(StoreError::CorruptSnapshot(
                "index file has wrong magic bytes".to_string(),
            ));
        }
        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(StoreError::CorruptSnapshot(format!(
                "unsupported index format version {version}"
            )));
        }
        let metric = bytes[8];
        if metric != METRIC_INNER_PRODUCT {
            return Err(StoreError::CorruptSnapshot(format!(
                "unsupported similarity metric {metric}"
            )));
        }
        let dimension = read_u32(&bytes[9..13]) as usize;
        if dimension == 0 {
            return Err(StoreError::CorruptSnapshot(
                "index declares dimension 0".to_string(),
            ));
        }
        let rows = read_u64(&bytes[13..21]);
        let checksum = read_u32(&bytes[21..25]);
        Ok(Self {
            dimension,
            rows,
            checksum,
        })
    }

    fn check_payload(&self, payload: &[u8]) -> Result<(), StoreError> {
        let expected = self
            .rows
            .checked_mul(self.dimension as u64)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                StoreError::CorruptSnapshot("declared row count overflows".to_string())
            })?;
        if payload.len() as u64 != expected {
            return Err(StoreError::CorruptSnapshot(format!(
                "payload holds {} bytes, header implies {expected}",
                payload.len()
            )));
        }
        if crc32fast::hash(payload) != self.checksum {
            return Err(StoreError::CorruptSnapshot(
                "payload checksum mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

async fn write_atomic(directory: &Path, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = directory.join(format!("{name}.tmp"));
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, directory.join(name)).await?;
    Ok(())
}
