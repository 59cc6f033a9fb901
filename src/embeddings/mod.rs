//! Embedding provider seam and resilient batch embedding.
//!
//! [`EmbeddingProvider`] is the only dynamic boundary in the pipeline:
//! the [`BatchEmbedder`] drives any implementation through the same
//! oversized-request bisection policy. [`MistralEmbedder`] talks to the
//! hosted Mistral API; [`MockEmbeddingProvider`] is a deterministic
//! in-process stand-in exported for downstream tests.

pub mod batcher;
pub mod mistral;

pub use batcher::{BatchEmbedder, DegradePolicy, DegradeReason, EmbedOutcome};
pub use mistral::{MistralConfig, MistralEmbedder};

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;

/// Failure modes reported by an embedding provider.
///
/// The batcher's retry policy depends on this distinction being observable:
/// oversized requests are bisected down to single texts, anything else
/// degrades the enclosing batch without retry.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The request exceeds the provider's size/token limit.
    #[error("embedding request exceeds provider limits: {0}")]
    OversizedRequest(String),

    /// Any other provider fault (network, auth, rate limit, bad payload).
    #[error("embedding provider failure: {0}")]
    Provider(String),
}

/// Ordered batch embedding: one fixed-dimension vector per input text, in
/// input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Fixed dimension of every vector this provider returns.
    fn dimension(&self) -> usize;
}

/// Deterministic in-process provider for tests and offline development.
///
/// Each text hashes to a unit-norm vector, so identical texts always embed
/// identically and a text queried verbatim scores 1.0 against its own
/// chunk. A per-request character budget simulates the provider's token
/// limit; an outage message simulates generic provider failure.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
    char_budget: Option<usize>,
    outage: Option<String>,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            char_budget: None,
            outage: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Requests whose total character count exceeds `budget` fail with
    /// [`EmbedError::OversizedRequest`].
    #[must_use]
    pub fn with_char_budget(mut self, budget: usize) -> Self {
        self.char_budget = Some(budget);
        self
    }

    /// Every request fails with [`EmbedError::Provider`] carrying `message`.
    #[must_use]
    pub fn with_outage(mut self, message: impl Into<String>) -> Self {
        self.outage = Some(message.into());
        self
    }

    /// Number of `embed` calls observed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        // FNV-1a over the text bytes picks two components
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let mut vector = vec![0.0f32; self.dimension];
        let i = (hash % self.dimension as u64) as usize;
        let j = ((hash >> 32) % self.dimension as u64) as usize;
        vector[i] += 1.0;
        vector[j] += 0.5;
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        for value in &mut vector {
            *value /= norm;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = &self.outage {
            return Err(EmbedError::Provider(message.clone()));
        }
        if let Some(budget) = self.char_budget {
            let total: usize = texts.iter().map(|text| text.chars().count()).sum();
            if total > budget {
                return Err(EmbedError::OversizedRequest(format!(
                    "{total} characters exceeds budget of {budget}"
                )));
            }
        }
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_is_deterministic_and_unit_norm() {
        let provider = MockEmbeddingProvider::new(16);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let first = provider.embed(&texts).await.unwrap();
        let second = provider.embed(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 2);
        for vector in &first {
            assert_eq!(vector.len(), 16);
            let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
        assert_ne!(first[0], first[1]);
    }

    #[tokio::test]
    async fn mock_enforces_char_budget() {
        let provider = MockEmbeddingProvider::new(8).with_char_budget(10);
        let oversized = vec!["aaaaaa".to_string(), "bbbbbb".to_string()];
        assert!(matches!(
            provider.embed(&oversized).await,
            Err(EmbedError::OversizedRequest(_))
        ));
        let fits = vec!["aaaaaa".to_string()];
        assert!(provider.embed(&fits).await.is_ok());
    }

    #[tokio::test]
    async fn mock_outage_reports_generic_failure() {
        let provider = MockEmbeddingProvider::new(8).with_outage("rate limited");
        let texts = vec!["a".to_string()];
        assert!(matches!(
            provider.embed(&texts).await,
            Err(EmbedError::Provider(message)) if message == "rate limited"
        ));
    }
}
