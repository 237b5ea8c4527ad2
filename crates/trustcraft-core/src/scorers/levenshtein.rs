use async_trait::async_trait;
use strsim::normalized_levenshtein;

use crate::error::ProviderError;
use crate::provider::ScoringProvider;
use crate::scorer::{constrained_prompt, SupportScorer, REGENERATE_INSTRUCTION};

/// Like [`super::embedding::EmbeddingScorer`] but compares the regenerated
/// answer with normalised edit distance instead of embeddings, so only the
/// generator is called. Scores fall in `[0, 1]`.
pub struct LevenshteinScorer {
    provider: ScoringProvider,
}

impl LevenshteinScorer {
    pub fn new(provider: ScoringProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SupportScorer for LevenshteinScorer {
    fn name(&self) -> &'static str {
        "levenshtein"
    }

    async fn score(&self, evidence: &[String], answer: &str) -> Result<f64, ProviderError> {
        let prompt = constrained_prompt(evidence);
        let regenerated = self.provider.generate(&prompt, REGENERATE_INSTRUCTION).await?;
        Ok(normalized_levenshtein(&normalize(answer), &normalize(&regenerated)))
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
