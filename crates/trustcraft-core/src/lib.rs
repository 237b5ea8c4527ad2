//! trustcraft-core: ground-truth-free scoring for retrieval-backed agents.
//!
//! An answer is scored by asking how much each retrieved chunk contributes to
//! regenerating it (leave-one-out attribution), then condensing those
//! contributions into quality metrics. Use [`Eval`] for batch runs over a
//! prompt set, or [`InterceptState::attach`] to score a live axum agent.
//! See `examples/simple.rs` for a quickstart.

pub mod attribution;
pub mod config;
pub mod datasource;
pub mod error;
pub mod intercept;
pub mod metrics;
pub mod pipeline;
pub mod provider;
pub mod report;
pub mod retrieval;
pub mod runner;
pub mod scorer;
pub mod sink;
pub mod task;
pub mod testing;
pub mod types;

pub mod providers {
    pub mod openai;
}

pub mod scorers {
    pub mod embedding;
    pub mod levenshtein;
}

pub use attribution::AttributionEngine;
pub use config::EvalConfig;
pub use datasource::{DataSource, JsonlDataSource, VecDataSource};
pub use error::{AttributionError, PipelineError, ProviderError};
pub use intercept::{InterceptState, RoutePatterns, ScoringMode};
pub use metrics::{aggregate, MetricsConfig};
pub use pipeline::ScoringPipeline;
pub use provider::{embedder_from_fn, generator_from_fn, Embedder, Generator, ScoringProvider};
pub use providers::openai::OpenAiCompatClient;
pub use retrieval::{HttpRetriever, Retriever, StaticRetriever};
pub use runner::{Eval, EvalBuilder};
pub use scorer::SupportScorer;
pub use scorers::{
    embedding::{cosine_similarity, EmbeddingScorer},
    levenshtein::LevenshteinScorer,
};
#[cfg(feature = "persistence")]
pub use sink::StoreSink;
pub use sink::{ChannelSink, FanoutSink, MetricsSink, TracingSink};
pub use task::{from_async_fn, HttpAgent, Task};
pub use types::{
    AnswerEvaluation, AttributionStatus, AttributionVector, CaseResult, ChunkAttribution, EvalPrompt, EvalResult,
    EvalSummary, MetricsResult, Observation, ObservationOutcome,
};
