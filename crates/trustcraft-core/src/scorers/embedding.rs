use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::ScoringProvider;
use crate::scorer::{constrained_prompt, SupportScorer, REGENERATE_INSTRUCTION};

/// Regenerates the answer from the evidence alone and returns the cosine
/// similarity between its embedding and the agent answer's embedding.
pub struct EmbeddingScorer {
    provider: ScoringProvider,
}

impl EmbeddingScorer {
    pub fn new(provider: ScoringProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SupportScorer for EmbeddingScorer {
    fn name(&self) -> &'static str {
        "embedding_cosine"
    }

    async fn score(&self, evidence: &[String], answer: &str) -> Result<f64, ProviderError> {
        let prompt = constrained_prompt(evidence);
        let regenerated = self.provider.generate(&prompt, REGENERATE_INSTRUCTION).await?;
        tracing::trace!(chunks = evidence.len(), %regenerated, "regenerated answer");

        let (a_vec, r_vec) = futures::try_join!(
            self.provider.embed(answer),
            self.provider.embed(&regenerated)
        )?;

        if a_vec.len() != r_vec.len() {
            return Err(ProviderError::MalformedResponse(format!(
                "embedding dimensions differ: {} vs {}",
                a_vec.len(),
                r_vec.len()
            )));
        }

        Ok(cosine_similarity(&a_vec, &r_vec))
    }
}

/// `dot(a, b) / (|a| * |b|)`, or `0.0` when either side is empty, zero-norm,
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (a_val, b_val) in a.iter().zip(b.iter()) {
        let x = *a_val as f64;
        let y = *b_val as f64;

        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
