//! Fixed-size batching with oversized-request bisection.
//!
//! The batcher partitions texts into batches and sends each to the provider
//! once. An oversized batch is bisected at its midpoint and the halves are
//! embedded left-then-right, preserving total order; recursion depth is
//! bounded by log2 of the batch size. A single text that still trips the
//! limit degrades according to [`DegradePolicy`]. Any non-size provider
//! error degrades the whole enclosing batch without retry.

use std::fmt;
use std::sync::Arc;

use tracing::{instrument, warn};

use super::{EmbedError, EmbeddingProvider};

/// What to do when a single text cannot be embedded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DegradePolicy {
    /// Substitute a zero vector and continue with the rest of the document.
    #[default]
    ZeroFill,
    /// Abort the enclosing document instead of storing a zero vector.
    Fail,
}

/// Why a text ended up without a real embedding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DegradeReason {
    /// The text alone exceeds the provider's request limit.
    OversizedText,
    /// The enclosing batch failed with a non-size provider error.
    ProviderFailure(String),
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::OversizedText => f.write_str("text exceeds provider limits"),
            DegradeReason::ProviderFailure(message) => {
                write!(f, "provider failure: {message}")
            }
        }
    }
}

/// Per-text embedding result.
///
/// Degraded entries stay observable to callers instead of silently turning
/// into zeros; [`EmbedOutcome::into_vector`] materializes them as zero
/// vectors at attach time.
#[derive(Clone, Debug, PartialEq)]
pub enum EmbedOutcome {
    Embedded(Vec<f32>),
    Degraded(DegradeReason),
}

impl EmbedOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, EmbedOutcome::Degraded(_))
    }

    /// The embedded vector, or a zero vector of `dimension` for degraded
    /// entries.
    pub fn into_vector(self, dimension: usize) -> Vec<f32> {
        match self {
            EmbedOutcome::Embedded(vector) => vector,
            EmbedOutcome::Degraded(_) => vec![0.0; dimension],
        }
    }
}

/// Resilient ordered embedding over any [`EmbeddingProvider`].
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    policy: DegradePolicy,
}

impl BatchEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        policy: DegradePolicy,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embeds `texts` in order, returning exactly one outcome per input.
    ///
    /// The only error path is [`DegradePolicy::Fail`] meeting a single text
    /// that exceeds the provider limit; every other fault is a tagged
    /// [`EmbedOutcome::Degraded`] entry.
    #[instrument(skip(self, texts), fields(texts = texts.len()))]
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<EmbedOutcome>, EmbedError> {
        let mut outcomes = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            self.embed_batch(batch, &mut outcomes).await?;
        }
        debug_assert_eq!(outcomes.len(), texts.len());
        Ok(outcomes)
    }

    /// Work-stack bisection. Halves are pushed right-then-left so segments
    /// pop in left-to-right order and outcomes land in input order; each
    /// split halves the segment, so the stack never holds more than
    /// log2(batch) + 1 entries.
    async fn embed_batch(
        &self,
        batch: &[String],
        outcomes: &mut Vec<EmbedOutcome>,
    ) -> Result<(), EmbedError> {
        let mut stack: Vec<&[String]> = vec![batch];
        while let Some(segment) = stack.pop() {
            match self.provider.embed(segment).await {
                Ok(vectors) if vectors.len() == segment.len() => {
                    outcomes.extend(vectors.into_iter().map(EmbedOutcome::Embedded));
                }
                Ok(vectors) => {
                    let reason = DegradeReason::ProviderFailure(format!(
                        "expected {} vectors, got {}",
                        segment.len(),
                        vectors.len()
                    ));
                    warn!(%reason, "provider returned a mismatched vector count, degrading segment");
                    outcomes
                        .extend(segment.iter().map(|_| EmbedOutcome::Degraded(reason.clone())));
                }
                Err(EmbedError::OversizedRequest(_)) if segment.len() > 1 => {
                    let (left, right) = segment.split_at(segment.len() / 2);
                    stack.push(right);
                    stack.push(left);
                }
                Err(EmbedError::OversizedRequest(reason)) => match self.policy {
                    DegradePolicy::ZeroFill => {
                        warn!(%reason, "single text exceeds provider limits, storing zero vector");
                        outcomes.push(EmbedOutcome::Degraded(DegradeReason::OversizedText));
                    }
                    DegradePolicy::Fail => return Err(EmbedError::OversizedRequest(reason)),
                },
                Err(EmbedError::Provider(reason)) => {
                    warn!(%reason, texts = segment.len(), "provider failure, degrading batch");
                    outcomes.extend(segment.iter().map(|_| {
                        EmbedOutcome::Degraded(DegradeReason::ProviderFailure(reason.clone()))
                    }));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;

    const DIM: usize = 8;

    fn texts(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|label| label.to_string()).collect()
    }

    #[tokio::test]
    async fn returns_one_outcome_per_text_in_order() {
        let provider = Arc::new(MockEmbeddingProvider::new(DIM));
        let embedder = BatchEmbedder::new(provider.clone(), 3, DegradePolicy::ZeroFill);
        let input = texts(&["a", "b", "c", "d", "e", "f", "g"]);

        let outcomes = embedder.embed_texts(&input).await.unwrap();

        assert_eq!(outcomes.len(), input.len());
        for (text, outcome) in input.iter().zip(&outcomes) {
            let expected = provider
                .embed(std::slice::from_ref(text))
                .await
                .unwrap()
                .remove(0);
            assert_eq!(outcome, &EmbedOutcome::Embedded(expected));
        }
    }

    #[tokio::test]
    async fn bisection_preserves_order_under_size_pressure() {
        // budget fits at most two of these four-char texts per request
        let provider = Arc::new(MockEmbeddingProvider::new(DIM).with_char_budget(9));
        let embedder = BatchEmbedder::new(provider.clone(), 8, DegradePolicy::ZeroFill);
        let input = texts(&["aaaa", "bbbb", "cccc", "dddd", "eeee", "ffff", "gggg", "hhhh"]);

        let outcomes = embedder.embed_texts(&input).await.unwrap();

        assert_eq!(outcomes.len(), input.len());
        assert!(outcomes.iter().all(|o| !o.is_degraded()));
        for (text, outcome) in input.iter().zip(&outcomes) {
            let expected = provider
                .embed(std::slice::from_ref(text))
                .await
                .unwrap()
                .remove(0);
            assert_eq!(outcome, &EmbedOutcome::Embedded(expected));
        }
        // the initial oversized call plus the recursive halves
        assert!(provider.calls() > 4);
    }

    #[tokio::test]
    async fn splits_down_to_single_texts_rather_than_zero_filling() {
        // budget of 5 admits only one four-char text per request
        let provider = Arc::new(MockEmbeddingProvider::new(DIM).with_char_budget(5));
        let embedder = BatchEmbedder::new(provider, 4, DegradePolicy::ZeroFill);
        let input = texts(&["aaaa", "bbbb", "cccc"]);

        let outcomes = embedder.embed_texts(&input).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| !o.is_degraded()));
    }

    #[tokio::test]
    async fn oversized_single_text_degrades_under_zero_fill() {
        let provider = Arc::new(MockEmbeddingProvider::new(DIM).with_char_budget(5));
        let embedder = BatchEmbedder::new(provider, 4, DegradePolicy::ZeroFill);
        let input = texts(&["tiny", "this text is far beyond the budget", "also"]);

        let outcomes = embedder.embed_texts(&input).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[0].is_degraded());
        assert_eq!(
            outcomes[1],
            EmbedOutcome::Degraded(DegradeReason::OversizedText)
        );
        assert!(!outcomes[2].is_degraded());
        assert_eq!(outcomes[1].clone().into_vector(DIM), vec![0.0; DIM]);
    }

    #[tokio::test]
    async fn oversized_single_text_errors_under_fail_policy() {
        let provider = Arc::new(MockEmbeddingProvider::new(DIM).with_char_budget(5));
        let embedder = BatchEmbedder::new(provider, 4, DegradePolicy::Fail);
        let input = texts(&["tiny", "this text is far beyond the budget"]);

        let result = embedder.embed_texts(&input).await;

        assert!(matches!(result, Err(EmbedError::OversizedRequest(_))));
    }

    #[tokio::test]
    async fn generic_failure_degrades_the_whole_batch_without_retry() {
        let provider = Arc::new(MockEmbeddingProvider::new(DIM).with_outage("upstream 500"));
        let embedder = BatchEmbedder::new(provider.clone(), 2, DegradePolicy::ZeroFill);
        let input = texts(&["a", "b", "c"]);

        let outcomes = embedder.embed_texts(&input).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        for outcome in &outcomes {
            assert!(matches!(
                outcome,
                EmbedOutcome::Degraded(DegradeReason::ProviderFailure(message))
                    if message == "upstream 500"
            ));
        }
        // one call per initial batch, no retries and no bisection
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let provider = Arc::new(MockEmbeddingProvider::new(DIM));
        let embedder = BatchEmbedder::new(provider.clone(), 4, DegradePolicy::ZeroFill);
        let outcomes = embedder.embed_texts(&[]).await.unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(provider.calls(), 0);
    }
}
