use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::datasource::DataSource;
use crate::pipeline::ScoringPipeline;
use crate::sink::MetricsSink;
use crate::task::Task;
use crate::types::{CaseResult, EvalPrompt, EvalResult, Observation};

pub const DEFAULT_ANSWER_FIELD: &str = "response";

pub struct EvalBuilder {
	data_source: Option<Arc<dyn DataSource>>,
	agent: Option<Arc<dyn Task>>,
	pipeline: Option<Arc<ScoringPipeline>>,
	sink: Option<Arc<dyn MetricsSink>>,
	answer_field: String,
	concurrency: usize,
}

impl EvalBuilder {
	pub fn new() -> Self {
		Self {
			data_source: None,
			agent: None,
			pipeline: None,
			sink: None,
			answer_field: DEFAULT_ANSWER_FIELD.to_string(),
			concurrency: 8,
		}
	}

	pub fn data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
		self.data_source = Some(data_source);
		self
	}

	pub fn agent(mut self, agent: Arc<dyn Task>) -> Self {
		self.agent = Some(agent);
		self
	}

	pub fn pipeline(mut self, pipeline: Arc<ScoringPipeline>) -> Self {
		self.pipeline = Some(pipeline);
		self
	}

	/// Every case's outcome is also recorded here, keyed by case id.
	pub fn sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
		self.sink = Some(sink);
		self
	}

	/// Field holding the answer text when the agent replies with an object.
	pub fn answer_field(mut self, field: impl Into<String>) -> Self {
		self.answer_field = field.into();
		self
	}

	pub fn concurrency(mut self, n: usize) -> Self {
		self.concurrency = n.max(1);
		self
	}

	pub fn build(self) -> Result<Eval> {
		Ok(Eval {
			data_source: self.data_source.ok_or_else(|| anyhow::anyhow!("data_source must be set"))?,
			agent: self.agent.ok_or_else(|| anyhow::anyhow!("agent must be set"))?,
			pipeline: self.pipeline.ok_or_else(|| anyhow::anyhow!("pipeline must be set"))?,
			sink: self.sink,
			answer_field: Arc::from(self.answer_field),
			concurrency: self.concurrency,
		})
	}
}

impl Default for EvalBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Batch evaluation: send each prompt to the agent, score each answer, and
/// average the metrics.
pub struct Eval {
	data_source: Arc<dyn DataSource>,
	agent: Arc<dyn Task>,
	pipeline: Arc<ScoringPipeline>,
	sink: Option<Arc<dyn MetricsSink>>,
	answer_field: Arc<str>,
	concurrency: usize,
}

impl Eval {
	pub fn builder() -> EvalBuilder {
		EvalBuilder::new()
	}

	pub async fn run(&self) -> Result<EvalResult> {
		let cases = self.data_source.load().await?;
		info!(cases = cases.len(), concurrency = self.concurrency, "starting evaluation");
		let results = self.run_cases(cases).await;
		let summary = EvalResult::summarize(&results);
		info!(
			scored = summary.scored,
			failed = summary.failed,
			overall = summary.overall_score,
			"evaluation finished"
		);
		Ok(EvalResult { cases: results, summary })
	}

	async fn run_cases(&self, cases: Vec<EvalPrompt>) -> Vec<CaseResult> {
		let stream = stream::iter(cases.into_iter().enumerate()).map(|(idx, case)| {
			let agent = self.agent.clone();
			let pipeline = self.pipeline.clone();
			let sink = self.sink.clone();
			let answer_field = self.answer_field.clone();
			async move {
				let key = case.id.clone().unwrap_or_else(|| idx.to_string());
				let result = run_case(case, agent.as_ref(), &pipeline, &answer_field).await;
				if let Some(sink) = sink {
					let observation = match (&result.evaluation, &result.error) {
						(Some(evaluation), _) => Observation::scored(key, evaluation.clone()),
						(None, error) => Observation::failed(key, error.clone().unwrap_or_default()),
					};
					sink.record(observation).await;
				}
				result
			}
		});

		// `buffered` keeps results in input order.
		stream.buffered(self.concurrency).collect().await
	}
}

async fn run_case(case: EvalPrompt, agent: &dyn Task, pipeline: &ScoringPipeline, answer_field: &str) -> CaseResult {
	let output = match agent.run(&json!(case.prompt)).await {
		Ok(output) => output,
		Err(err) => {
			warn!(id = ?case.id, error = %err, "agent call failed");
			return CaseResult {
				case,
				answer: None,
				error: Some(err.to_string()),
				evaluation: None,
			};
		}
	};

	let Some(answer) = extract_answer(&output, answer_field) else {
		return CaseResult {
			case,
			answer: None,
			error: Some(format!("agent reply has no string '{answer_field}' field")),
			evaluation: None,
		};
	};

	match pipeline.evaluate(&answer).await {
		Ok(evaluation) => CaseResult {
			case,
			answer: Some(answer),
			error: None,
			evaluation: Some(evaluation),
		},
		Err(err) => {
			warn!(id = ?case.id, error = %err, "scoring failed");
			CaseResult {
				case,
				answer: Some(answer),
				error: Some(err.to_string()),
				evaluation: None,
			}
		}
	}
}

/// A string reply is the answer itself; an object reply carries it in `field`.
pub fn extract_answer(output: &Value, field: &str) -> Option<String> {
	match output {
		Value::String(s) => Some(s.clone()),
		Value::Object(map) => map.get(field).and_then(|v| v.as_str()).map(str::to_owned),
		_ => None,
	}
}
