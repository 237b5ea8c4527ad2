//! Deterministic stand-ins for the external providers, and assertions for
//! evaluation results. Meant for `#[tokio::test]` functions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::{Embedder, Generator};
use crate::types::{EvalResult, MetricsResult};

pub use crate::retrieval::StaticRetriever;

enum Reply {
    Text(String),
    Fail,
}

/// Generator that answers by looking for trigger substrings in the system
/// prompt. The first matching rule wins; otherwise the default reply is used.
pub struct ScriptedGenerator {
    rules: Vec<(String, Reply)>,
    default: String,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default: default.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rule(mut self, trigger: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((trigger.into(), Reply::Text(reply.into())));
        self
    }

    /// Fail with `ProviderError::Unavailable` when `trigger` is in the prompt.
    pub fn fail_on(mut self, trigger: impl Into<String>) -> Self {
        self.rules.push((trigger.into(), Reply::Fail));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, system: &str, _user: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.rules.iter().find(|(trigger, _)| system.contains(trigger.as_str())) {
            Some((_, Reply::Text(reply))) => Ok(reply.clone()),
            Some((trigger, Reply::Fail)) => Err(ProviderError::Unavailable(format!("scripted failure on '{trigger}'"))),
            None => Ok(self.default.clone()),
        }
    }
}

/// Embedder backed by an exact-text lookup table.
pub struct LookupEmbedder {
    table: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    calls: AtomicUsize,
}

impl LookupEmbedder {
    pub fn new(fallback: Vec<f32>) -> Self {
        Self {
            table: HashMap::new(),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn entry(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.table.insert(text.into(), vector);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for LookupEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.table.get(text.trim()).cloned().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Assert that every case produced metrics.
pub fn assert_all_scored(result: &EvalResult) -> Result<()> {
    if result.summary.scored != result.summary.total {
        anyhow::bail!(
            "Evaluation failed: {}/{} cases scored\n{}",
            result.summary.scored,
            result.summary.total,
            result.summary_table()
        );
    }
    Ok(())
}

/// Assert the overall score (mean of the percentage metrics) meets a threshold.
pub fn assert_overall_score(result: &EvalResult, min_overall: f64) -> Result<()> {
    if result.summary.overall_score < min_overall {
        anyhow::bail!(
            "Evaluation failed: overall score {:.1} is below threshold {:.1}\n{}",
            result.summary.overall_score,
            min_overall,
            result.summary_table()
        );
    }
    Ok(())
}

/// Assert one averaged metric meets a threshold.
///
/// ```ignore
/// assert_metric_at_least(&result, "faithfulness", |m| m.faithfulness, 0.5)?;
/// ```
pub fn assert_metric_at_least(
    result: &EvalResult,
    name: &str,
    metric: fn(&MetricsResult) -> f64,
    min: f64,
) -> Result<()> {
    let value = metric(&result.summary.averages);
    if value < min {
        anyhow::bail!(
            "Evaluation failed: average {} {:.3} is below threshold {:.3}\n{}",
            name,
            value,
            min,
            result.summary_table()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_generator_first_rule_wins() {
        let g = ScriptedGenerator::new("default")
            .rule("alpha", "A")
            .fail_on("beta")
            .rule("alpha beta", "never");

        assert_eq!(g.generate("has alpha beta", "").await.unwrap(), "A");
        assert!(g.generate("only beta", "").await.is_err());
        assert_eq!(g.generate("nothing", "").await.unwrap(), "default");
        assert_eq!(g.calls(), 3);
    }

    #[tokio::test]
    async fn lookup_embedder_trims_and_falls_back() {
        let e = LookupEmbedder::new(vec![0.5, 0.5]).entry("yes", vec![1.0, 0.0]);
        assert_eq!(e.embed(" yes\n").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(e.embed("other").await.unwrap(), vec![0.5, 0.5]);
    }
}
