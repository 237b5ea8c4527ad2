use std::sync::Arc;

use tracing::debug;

use crate::attribution::AttributionEngine;
use crate::error::PipelineError;
use crate::metrics::{aggregate, MetricsConfig};
use crate::retrieval::Retriever;
use crate::types::{AnswerEvaluation, AttributionVector, MetricsResult};

/// Retrieval → attribution → metrics for a single answer.
#[derive(Clone)]
pub struct ScoringPipeline {
    retriever: Arc<dyn Retriever>,
    engine: AttributionEngine,
    metrics: MetricsConfig,
}

impl ScoringPipeline {
    pub fn new(retriever: Arc<dyn Retriever>, engine: AttributionEngine) -> Self {
        Self {
            retriever,
            engine,
            metrics: MetricsConfig::default(),
        }
    }

    pub fn metrics_config(mut self, config: MetricsConfig) -> Self {
        self.metrics = config;
        self
    }

    pub async fn evaluate(&self, answer: &str) -> Result<AnswerEvaluation, PipelineError> {
        let chunks = self
            .retriever
            .retrieve_chunks(answer)
            .await
            .map_err(PipelineError::Retrieval)?;

        if chunks.is_empty() {
            debug!("no evidence retrieved, reporting zeroed metrics");
            return Ok(AnswerEvaluation {
                answer: answer.to_string(),
                chunks,
                attribution: AttributionVector::empty(),
                metrics: MetricsResult::zeroed(),
            });
        }

        let attribution = self.engine.attribute(&chunks, answer).await?;
        let metrics = aggregate(&attribution.values(), &self.metrics);
        debug!(
            chunks = chunks.len(),
            unavailable = attribution.unavailable_count(),
            faithfulness = metrics.faithfulness,
            "answer scored"
        );

        Ok(AnswerEvaluation {
            answer: answer.to_string(),
            chunks,
            attribution,
            metrics,
        })
    }
}
