use async_trait::async_trait;

use crate::error::ProviderError;

/// Reply the generator is told to give when the evidence does not back an answer.
pub const NOT_SUPPORTED: &str = "NOT SUPPORTED";

/// Evidence placeholder used for the baseline prompt.
pub const NO_EVIDENCE: &str = "NO EVIDENCE PROVIDED";

/// User turn sent alongside every constrained prompt.
pub const REGENERATE_INSTRUCTION: &str = "Generate the best supported answer.";

/// Measures how well `evidence` alone reproduces `answer`.
///
/// An empty evidence slice is the baseline call.
#[async_trait]
pub trait SupportScorer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn score(&self, evidence: &[String], answer: &str) -> Result<f64, ProviderError>;
}

/// System prompt that restricts the generator to `evidence`.
pub fn constrained_prompt(evidence: &[String]) -> String {
    let evidence_text = if evidence.is_empty() {
        NO_EVIDENCE.to_string()
    } else {
        evidence.join("\n")
    };

    format!(
        "Answer using strictly ONLY the evidence below. \
         Do not infer, generalize, or rely on outside knowledge. \
         If the evidence does not support an answer, respond with '{NOT_SUPPORTED}'.\n\n\
         Evidence:\n{evidence_text}"
    )
}
