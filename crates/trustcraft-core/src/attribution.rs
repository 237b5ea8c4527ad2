//! Leave-one-in evidence attribution ("GenAI-SHAP").
//!
//! Each chunk is scored on its own and compared with the no-evidence
//! baseline: `attribution_i = score([c_i]) - score([])`. This is a
//! single-feature approximation of Shapley values. The entries are not an
//! additive decomposition of any total effect and are not normalised to one.

use std::slice;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tracing::warn;

use crate::error::AttributionError;
use crate::scorer::SupportScorer;
use crate::types::{AttributionVector, ChunkAttribution};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct AttributionEngine {
    scorer: Arc<dyn SupportScorer>,
    max_concurrency: usize,
}

impl AttributionEngine {
    pub fn new(scorer: Arc<dyn SupportScorer>) -> Self {
        Self {
            scorer,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Upper bound on per-chunk score calls in flight (the baseline call is
    /// issued alongside them).
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    /// One entry per chunk, in the order given.
    ///
    /// A failing chunk gets the neutral value `0.0` marked unavailable. A
    /// failing baseline fails the whole attribution.
    pub async fn attribute(&self, chunks: &[String], answer: &str) -> Result<AttributionVector, AttributionError> {
        if chunks.is_empty() {
            return Ok(AttributionVector::empty());
        }

        let shared_answer: Arc<str> = Arc::from(answer);
        let per_chunk = stream::iter(chunks.to_vec().into_iter().enumerate())
            .map(|(index, chunk)| {
                let scorer = self.scorer.clone();
                let answer = shared_answer.clone();
                async move { (index, scorer.score(slice::from_ref(&chunk), &answer).await) }
            })
            .buffered(self.max_concurrency)
            .collect::<Vec<_>>();

        let baseline = async { self.scorer.score(&[], answer).await.map_err(AttributionError::Unavailable) };
        // A failed baseline drops the chunk stream, cancelling calls still in flight.
        let (baseline, scores) = futures::try_join!(baseline, per_chunk.map(Ok::<_, AttributionError>))?;

        let mut entries: Vec<Option<ChunkAttribution>> = vec![None; chunks.len()];
        for (index, result) in scores {
            entries[index] = Some(match result {
                Ok(score) => ChunkAttribution::measured(index, score - baseline),
                Err(err) => {
                    warn!(chunk = index, error = %err, "chunk score unavailable, using neutral attribution");
                    ChunkAttribution::unavailable(index, err.to_string())
                }
            });
        }

        let entries = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.unwrap_or_else(|| ChunkAttribution::unavailable(index, "not scored")))
            .collect();

        Ok(AttributionVector {
            baseline: Some(baseline),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{generator_from_fn, ScoringProvider};
    use crate::scorers::embedding::EmbeddingScorer;
    use crate::testing::{LookupEmbedder, ScriptedGenerator};
    use crate::types::AttributionStatus;

    /// Scores a chunk by its length, after a delay that shrinks with length
    /// so later chunks tend to finish first.
    struct LengthScorer {
        calls: AtomicUsize,
        fail_baseline: bool,
    }

    impl LengthScorer {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), fail_baseline: false }
        }
    }

    #[async_trait]
    impl SupportScorer for LengthScorer {
        fn name(&self) -> &'static str {
            "length"
        }

        async fn score(&self, evidence: &[String], _answer: &str) -> Result<f64, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match evidence.first() {
                None if self.fail_baseline => Err(ProviderError::Timeout(Duration::from_secs(1))),
                None => Ok(0.5),
                Some(chunk) => {
                    tokio::time::sleep(Duration::from_millis(50 / chunk.len() as u64)).await;
                    Ok(chunk.len() as f64)
                }
            }
        }
    }

    fn chunks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_chunks_make_no_calls() {
        let scorer = Arc::new(LengthScorer::new());
        let engine = AttributionEngine::new(scorer.clone());
        let v = engine.attribute(&[], "answer").await.unwrap();
        assert!(v.is_empty());
        assert_eq!(v.baseline, None);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn vector_preserves_chunk_order() {
        let scorer = Arc::new(LengthScorer::new());
        let engine = AttributionEngine::new(scorer.clone()).max_concurrency(8);
        let input = chunks(&["a", "abcd", "ab", "abcdefgh", "abc"]);

        let v = engine.attribute(&input, "answer").await.unwrap();
        assert_eq!(v.len(), input.len());
        assert_eq!(v.values(), vec![0.5, 3.5, 1.5, 7.5, 2.5]);
        for (i, e) in v.entries.iter().enumerate() {
            assert_eq!(e.index, i);
        }
        assert_eq!(scorer.calls.load(Ordering::SeqCst), input.len() + 1);
    }

    #[tokio::test]
    async fn baseline_failure_is_fatal() {
        let scorer = Arc::new(LengthScorer { calls: AtomicUsize::new(0), fail_baseline: true });
        let engine = AttributionEngine::new(scorer);
        let err = engine.attribute(&chunks(&["a"]), "answer").await.unwrap_err();
        assert!(matches!(err, AttributionError::Unavailable(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn baseline_failure_stops_chunk_calls() {
        let scorer = Arc::new(LengthScorer { calls: AtomicUsize::new(0), fail_baseline: true });
        let engine = AttributionEngine::new(scorer.clone()).max_concurrency(2);
        let input = chunks(&["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]);

        assert!(engine.attribute(&input, "answer").await.is_err());
        // at most the baseline plus one window of chunk calls
        assert!(scorer.calls.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_timeout_is_isolated() {
        let generator = generator_from_fn(|system, _user| {
            let stalls = system.contains("stalled feed");
            let reply = if system.contains("supports yes") { "yes" } else { "no" };
            Box::pin(async move {
                if stalls {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok(reply.to_string())
            })
        });
        let embedder = Arc::new(
            LookupEmbedder::new(vec![0.5, 0.5])
                .entry("yes", vec![1.0, 0.0])
                .entry("no", vec![0.0, 1.0]),
        );
        let provider = ScoringProvider::new(generator, embedder).with_timeout(Duration::from_millis(50));
        let engine = AttributionEngine::new(Arc::new(EmbeddingScorer::new(provider)));

        let v = engine
            .attribute(&chunks(&["supports yes", "stalled feed", "irrelevant"]), "yes")
            .await
            .unwrap();

        assert_eq!(v.len(), 3);
        assert_eq!(v.baseline, Some(0.0));
        assert!(v.entries[0].is_measured());
        assert_eq!(v.entries[0].value, 1.0);
        match &v.entries[1].status {
            AttributionStatus::Unavailable { reason } => assert!(reason.contains("50ms"), "{reason}"),
            other => panic!("expected unavailable, got {other:?}"),
        }
        assert_eq!(v.entries[1].value, 0.0);
        assert!(v.entries[2].is_measured());
    }

    #[tokio::test]
    async fn chunk_failure_is_isolated() {
        let generator = Arc::new(
            ScriptedGenerator::new("no")
                .rule("supports yes", "yes")
                .fail_on("flaky"),
        );
        let embedder = Arc::new(
            LookupEmbedder::new(vec![0.5, 0.5])
                .entry("yes", vec![1.0, 0.0])
                .entry("no", vec![0.0, 1.0]),
        );
        let scorer = EmbeddingScorer::new(ScoringProvider::new(generator, embedder));
        let engine = AttributionEngine::new(Arc::new(scorer));

        let v = engine
            .attribute(&chunks(&["supports yes", "flaky source", "irrelevant"]), "yes")
            .await
            .unwrap();

        assert_eq!(v.values(), vec![1.0, 0.0, 0.0]);
        assert!(v.entries[0].is_measured());
        assert!(matches!(v.entries[1].status, AttributionStatus::Unavailable { .. }));
        assert!(v.entries[2].is_measured());
        assert_eq!(v.unavailable_count(), 1);
    }

    #[tokio::test]
    async fn yes_no_scenario() {
        let generator = Arc::new(ScriptedGenerator::new("no").rule("supports yes", "yes"));
        let embedder = Arc::new(
            LookupEmbedder::new(vec![0.5, 0.5])
                .entry("yes", vec![1.0, 0.0])
                .entry("no", vec![0.0, 1.0]),
        );
        let engine = AttributionEngine::new(Arc::new(EmbeddingScorer::new(ScoringProvider::new(
            generator.clone(),
            embedder,
        ))));

        let v = engine.attribute(&chunks(&["supports yes", "irrelevant"]), "yes").await.unwrap();
        assert_eq!(v.baseline, Some(0.0));
        assert_eq!(v.values(), vec![1.0, 0.0]);
        assert_eq!(generator.calls(), 3);
    }
}
