use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::{Observation, ObservationOutcome};

/// Destination for scoring results produced off the request path.
///
/// Recording never fails from the caller's point of view; sinks log their
/// own delivery problems.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, observation: Observation);
}

/// Emits one structured log event per observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl MetricsSink for TracingSink {
    async fn record(&self, observation: Observation) {
        let route = observation.route.as_deref().unwrap_or("-");
        match &observation.outcome {
            ObservationOutcome::Scored { evaluation } => {
                let m = evaluation.metrics.rounded();
                info!(
                    key = %observation.key,
                    route,
                    chunks = evaluation.chunks.len(),
                    faithfulness = m.faithfulness,
                    context_precision = m.context_precision,
                    context_recall = m.context_recall,
                    robustness = m.robustness,
                    biasness = m.biasness,
                    resilience = m.resilience,
                    accuracy = m.accuracy,
                    "answer metrics"
                );
            }
            ObservationOutcome::Failed { error } => {
                warn!(key = %observation.key, route, %error, "answer could not be scored");
            }
        }
    }
}

/// Forwards observations over a tokio channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Observation>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Observation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MetricsSink for ChannelSink {
    async fn record(&self, observation: Observation) {
        if self.tx.send(observation).is_err() {
            warn!("metrics channel closed, observation dropped");
        }
    }
}

/// Records to every inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl MetricsSink for FanoutSink {
    async fn record(&self, observation: Observation) {
        for sink in &self.sinks {
            sink.record(observation.clone()).await;
        }
    }
}

#[cfg(feature = "persistence")]
pub use store_sink::StoreSink;

#[cfg(feature = "persistence")]
mod store_sink {
    use super::*;
    use trustcraft_store::Store;

    /// Persists observations to the SQLite store.
    #[derive(Clone)]
    pub struct StoreSink {
        store: Arc<Store>,
    }

    impl StoreSink {
        pub fn new(store: Arc<Store>) -> Self {
            Self { store }
        }
    }

    #[async_trait]
    impl MetricsSink for StoreSink {
        async fn record(&self, observation: Observation) {
            let store = self.store.clone();
            let saved = tokio::task::spawn_blocking(move || store.save_observation(&observation)).await;
            match saved {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %err, "failed to persist observation"),
                Err(err) => warn!(error = %err, "observation writer task failed"),
            }
        }
    }
}
