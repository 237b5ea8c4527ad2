use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::attribution::{AttributionEngine, DEFAULT_MAX_CONCURRENCY};
use crate::intercept::{ScoringMode, DEFAULT_SCORE_TIMEOUT};
use crate::metrics::MetricsConfig;
use crate::pipeline::ScoringPipeline;
use crate::provider::ScoringProvider;
use crate::providers::openai::OpenAiCompatClient;
use crate::retrieval::HttpRetriever;
use crate::scorer::SupportScorer;
use crate::scorers::{embedding::EmbeddingScorer, levenshtein::LevenshteinScorer};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default)]
    pub agent: Option<AgentConfig>,
    #[serde(default)]
    pub data: Option<DataConfig>,
    pub provider: ProviderConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub attribution: AttributionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub intercept: InterceptConfig,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_concurrency() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum AgentConfig {
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default = "default_answer_field")]
        answer_field: String,
    },
}

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_answer_field() -> String {
    crate::runner::DEFAULT_ANSWER_FIELD.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Explicit key, normally set from the command line rather than the file.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    #[default]
    Embedding,
    Lexical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    #[serde(default)]
    pub scorer: ScorerKind,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            scorer: ScorerKind::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptConfig {
    #[serde(default = "default_routes")]
    pub routes: Vec<String>,
    #[serde(default)]
    pub mode: ScoringMode,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default = "default_score_timeout_ms")]
    pub score_timeout_ms: u64,
}

fn default_routes() -> Vec<String> {
    vec!["/chatbot".to_string()]
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_score_timeout_ms() -> u64 {
    DEFAULT_SCORE_TIMEOUT.as_millis() as u64
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            routes: default_routes(),
            mode: ScoringMode::default(),
            listen: default_listen(),
            upstream: None,
            score_timeout_ms: default_score_timeout_ms(),
        }
    }
}

impl EvalConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).context("Invalid evaluation config")
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("In {:?}", path))
    }
}

impl ProviderConfig {
    /// Build the provider client. The key comes from `api_key`, else from the
    /// `api_key_env` variable; endpoints without auth work without either.
    pub fn build(&self) -> Result<ScoringProvider> {
        let timeout = Duration::from_millis(self.timeout_ms);
        let mut client = OpenAiCompatClient::new(&self.base_url, &self.chat_model, &self.embedding_model)
            .request_timeout(timeout)?;
        if let Some(key) = self.api_key.clone().or_else(|| std::env::var(&self.api_key_env).ok()) {
            client = client.api_key(key);
        }
        if let Some(dimensions) = self.dimensions {
            client = client.dimensions(dimensions);
        }
        let client = Arc::new(client);
        Ok(ScoringProvider::new(client.clone(), client).with_timeout(timeout))
    }
}

impl EvalConfig {
    /// Wire provider, scorer, engine and retriever into a pipeline.
    pub fn build_pipeline(&self) -> Result<ScoringPipeline> {
        let provider = self.provider.build()?;
        let scorer: Arc<dyn SupportScorer> = match self.attribution.scorer {
            ScorerKind::Embedding => Arc::new(EmbeddingScorer::new(provider)),
            ScorerKind::Lexical => Arc::new(LevenshteinScorer::new(provider)),
        };
        let engine = AttributionEngine::new(scorer).max_concurrency(self.attribution.max_concurrency);
        let retriever =
            HttpRetriever::new(&self.retrieval.url).request_timeout(Duration::from_millis(self.retrieval.timeout_ms))?;
        Ok(ScoringPipeline::new(Arc::new(retriever), engine).metrics_config(self.metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
provider:
  base_url: http://localhost:8080/v1
  chat_model: gpt-4o-mini
  embedding_model: text-embedding-3-large
retrieval:
  url: http://127.0.0.1:8448/retrieve_chunks
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = EvalConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.provider.timeout_ms, 30_000);
        assert_eq!(config.provider.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.attribution.scorer, ScorerKind::Embedding);
        assert_eq!(config.attribution.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.metrics, MetricsConfig::default());
        assert_eq!(config.intercept.routes, vec!["/chatbot"]);
        assert_eq!(config.intercept.mode, ScoringMode::Detached);
        assert_eq!(config.retrieval.timeout_ms, 30_000);
        assert_eq!(config.intercept.score_timeout_ms, 120_000);
        assert!(config.agent.is_none());
    }

    #[test]
    fn full_config() {
        let yaml = format!(
            "{MINIMAL}{}",
            r#"
agent:
  type: http
  url: http://127.0.0.1:8448/response
  answer_field: message
data:
  path: prompts.jsonl
attribution:
  scorer: lexical
  max_concurrency: 2
metrics:
  recall_top_k: 5
intercept:
  routes: ["/chatbot", "/agents/*/chat"]
  mode: inline
  upstream: http://127.0.0.1:8448
  score_timeout_ms: 5000
concurrency: 2
"#
        );
        let config = EvalConfig::from_yaml_str(&yaml).unwrap();
        let Some(AgentConfig::Http { method, answer_field, .. }) = &config.agent else {
            panic!("expected http agent");
        };
        assert_eq!(method, "POST");
        assert_eq!(answer_field, "message");
        assert_eq!(config.attribution.scorer, ScorerKind::Lexical);
        assert_eq!(config.metrics.recall_top_k, 5);
        assert_eq!(config.metrics.precision_threshold, 0.05);
        assert_eq!(config.intercept.mode, ScoringMode::Inline);
        assert_eq!(config.intercept.routes.len(), 2);
        assert_eq!(config.intercept.score_timeout_ms, 5_000);
    }

    #[test]
    fn missing_provider_is_rejected() {
        assert!(EvalConfig::from_yaml_str("retrieval:\n  url: http://x\n").is_err());
    }

    #[test]
    fn pipeline_builds_without_network() {
        let config = EvalConfig::from_yaml_str(MINIMAL).unwrap();
        assert!(config.build_pipeline().is_ok());
    }
}
