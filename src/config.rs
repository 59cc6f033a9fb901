//! Pipeline configuration with environment overrides.
//!
//! Defaults mirror the intended corpus scale (single user, batch uploads):
//! 1024-dimension embeddings, 500/50 chunk geometry, 50-text embedding
//! batches. `.env` files are honored through `dotenvy`.

use std::path::PathBuf;

use thiserror::Error;

use crate::embeddings::DegradePolicy;

pub const DEFAULT_DIMENSION: usize = 1024;
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 500;
pub const DEFAULT_OVERLAP_CHARS: usize = 50;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_STORE_DIR: &str = "data/vector_store";

/// Configuration problems caught before the pipeline starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chunk overlap ({overlap}) must be smaller than max chunk size ({max_size})")]
    InvalidChunkGeometry { max_size: usize, overlap: usize },

    #[error("embedding batch size must be at least 1")]
    ZeroBatchSize,

    #[error("embedding dimension must be at least 1")]
    ZeroDimension,

    #[error("provider produces {provider}-dimension vectors but the store is configured for {configured}")]
    ProviderDimension { provider: usize, configured: usize },

    #[error("environment variable {name} is not set")]
    MissingEnv { name: &'static str },

    #[error("environment variable {name} is not a valid {expected}: {value:?}")]
    InvalidEnv {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Tunables for the ingestion pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Directory holding the persisted snapshot (`vectors.bin` + `chunks.json`).
    pub store_dir: PathBuf,
    /// Fixed dimension of every stored vector.
    pub dimension: usize,
    /// Maximum chunk size in grapheme clusters.
    pub max_chunk_chars: usize,
    /// Context shared between consecutive chunks, in grapheme clusters.
    pub overlap_chars: usize,
    /// Number of texts per initial embedding request.
    pub batch_size: usize,
    /// What to do when a single text cannot be embedded.
    pub degrade_policy: DegradePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            dimension: DEFAULT_DIMENSION,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
            batch_size: DEFAULT_BATCH_SIZE,
            degrade_policy: DegradePolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `DOCLOOM_STORE_DIR` and `EMBED_BATCH_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("DOCLOOM_STORE_DIR") {
            config.store_dir = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var("EMBED_BATCH_SIZE") {
            config.batch_size = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "EMBED_BATCH_SIZE",
                expected: "positive integer",
                value: raw,
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == 0 {
            return Err(ConfigError::ZeroDimension);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_chunk_chars == 0 || self.overlap_chars >= self.max_chunk_chars {
            return Err(ConfigError::InvalidChunkGeometry {
                max_size: self.max_chunk_chars,
                overlap: self.overlap_chars,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    #[must_use]
    pub fn with_chunking(mut self, max_chunk_chars: usize, overlap_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars;
        self.overlap_chars = overlap_chars;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_degrade_policy(mut self, policy: DegradePolicy) -> Self {
        self.degrade_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let config = PipelineConfig::default().with_chunking(10, 10);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunkGeometry {
                max_size: 10,
                overlap: 10
            })
        ));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = PipelineConfig::default().with_batch_size(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroBatchSize)));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let config = PipelineConfig::default().with_dimension(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDimension)));
    }
}
