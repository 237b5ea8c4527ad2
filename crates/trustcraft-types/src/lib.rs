use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabled::{Table, Tabled};

/// Named quality scores derived from one attribution vector.
///
/// Ratio metrics (`faithfulness`, `context_precision`, `context_recall`) keep
/// their natural scale; the rest are percentages on `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
	pub faithfulness: f64,
	pub context_precision: f64,
	pub context_recall: f64,
	pub robustness: f64,
	pub biasness: f64,
	pub resilience: f64,
	pub accuracy: f64,
}

impl MetricsResult {
	/// Result reported when retrieval found nothing to attribute against.
	pub fn zeroed() -> Self {
		Self {
			faithfulness: 0.0,
			context_precision: 0.0,
			context_recall: 0.0,
			robustness: 0.0,
			biasness: 0.0,
			resilience: 0.0,
			accuracy: 0.0,
		}
	}

	/// Mean of the four percentage metrics.
	pub fn overall_score(&self) -> f64 {
		(self.robustness + self.biasness + self.resilience + self.accuracy) / 4.0
	}

	/// Field-wise mean. `None` for an empty slice.
	pub fn mean(results: &[MetricsResult]) -> Option<MetricsResult> {
		if results.is_empty() {
			return None;
		}
		let n = results.len() as f64;
		let avg = |f: fn(&MetricsResult) -> f64| results.iter().map(f).sum::<f64>() / n;
		Some(MetricsResult {
			faithfulness: avg(|m| m.faithfulness),
			context_precision: avg(|m| m.context_precision),
			context_recall: avg(|m| m.context_recall),
			robustness: avg(|m| m.robustness),
			biasness: avg(|m| m.biasness),
			resilience: avg(|m| m.resilience),
			accuracy: avg(|m| m.accuracy),
		})
	}

	/// Presentation copy: ratios to 3 decimals, percentages to 1.
	pub fn rounded(&self) -> MetricsResult {
		MetricsResult {
			faithfulness: round_to(self.faithfulness, 3),
			context_precision: round_to(self.context_precision, 3),
			context_recall: round_to(self.context_recall, 3),
			robustness: round_to(self.robustness, 1),
			biasness: round_to(self.biasness, 1),
			resilience: round_to(self.resilience, 1),
			accuracy: round_to(self.accuracy, 1),
		}
	}
}

fn round_to(value: f64, decimals: i32) -> f64 {
	let factor = 10f64.powi(decimals);
	(value * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttributionStatus {
	Measured,
	/// The chunk's score call failed; its value is the neutral fallback `0.0`.
	Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkAttribution {
	/// Position of the chunk in the retrieved sequence.
	pub index: usize,
	pub value: f64,
	pub status: AttributionStatus,
}

impl ChunkAttribution {
	pub fn measured(index: usize, value: f64) -> Self {
		Self { index, value, status: AttributionStatus::Measured }
	}

	pub fn unavailable(index: usize, reason: impl Into<String>) -> Self {
		Self {
			index,
			value: 0.0,
			status: AttributionStatus::Unavailable { reason: reason.into() },
		}
	}

	pub fn is_measured(&self) -> bool {
		matches!(self.status, AttributionStatus::Measured)
	}
}

/// Per-chunk attribution in retrieval order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributionVector {
	/// Support score with no evidence. `None` when there were no chunks.
	pub baseline: Option<f64>,
	pub entries: Vec<ChunkAttribution>,
}

impl AttributionVector {
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn values(&self) -> Vec<f64> {
		self.entries.iter().map(|e| e.value).collect()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn unavailable_count(&self) -> usize {
		self.entries.iter().filter(|e| !e.is_measured()).count()
	}
}

/// Everything computed for one agent answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerEvaluation {
	pub answer: String,
	pub chunks: Vec<String>,
	pub attribution: AttributionVector,
	pub metrics: MetricsResult,
}

/// One generated evaluation prompt sent to the agent under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalPrompt {
	pub id: Option<String>,
	pub prompt: String,
	/// Quality dimension the prompt was drafted for (accuracy, bias, ...).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dimension: Option<String>,
}

impl EvalPrompt {
	pub fn new(prompt: impl Into<String>) -> Self {
		Self { id: None, prompt: prompt.into(), dimension: None }
	}

	pub fn with_id(id: impl Into<String>, prompt: impl Into<String>) -> Self {
		Self { id: Some(id.into()), prompt: prompt.into(), dimension: None }
	}

	pub fn dimension(mut self, dimension: impl Into<String>) -> Self {
		self.dimension = Some(dimension.into());
		self
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
	pub case: EvalPrompt,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub answer: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub evaluation: Option<AnswerEvaluation>,
}

impl CaseResult {
	pub fn metrics(&self) -> Option<&MetricsResult> {
		self.evaluation.as_ref().map(|e| &e.metrics)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
	pub total: usize,
	pub scored: usize,
	pub failed: usize,
	pub averages: MetricsResult,
	pub overall_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
	pub cases: Vec<CaseResult>,
	pub summary: EvalSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct SummaryRow {
	id: String,
	prompt: String,
	faithfulness: String,
	precision: String,
	recall: String,
	robustness: String,
	biasness: String,
	resilience: String,
	accuracy: String,
}

impl EvalResult {
	pub fn summarize(cases: &[CaseResult]) -> EvalSummary {
		let total = cases.len();
		let scored: Vec<MetricsResult> = cases.iter().filter_map(|c| c.metrics().copied()).collect();
		let averages = MetricsResult::mean(&scored).unwrap_or_else(MetricsResult::zeroed);
		let overall_score = if scored.is_empty() { 0.0 } else { averages.overall_score() };

		EvalSummary {
			total,
			scored: scored.len(),
			failed: total - scored.len(),
			averages,
			overall_score,
		}
	}

	pub fn summary_table(&self) -> String {
		let rows: Vec<SummaryRow> = self.cases.iter().map(|cr| {
			let id = cr.case.id.clone().unwrap_or_else(|| "-".to_string());
			let prompt = truncate(cr.case.prompt.clone(), 48);
			match cr.metrics() {
				Some(m) => {
					let m = m.rounded();
					SummaryRow {
						id,
						prompt,
						faithfulness: format!("{:.3}", m.faithfulness),
						precision: format!("{:.3}", m.context_precision),
						recall: format!("{:.3}", m.context_recall),
						robustness: format!("{:.1}", m.robustness),
						biasness: format!("{:.1}", m.biasness),
						resilience: format!("{:.1}", m.resilience),
						accuracy: format!("{:.1}", m.accuracy),
					}
				}
				None => {
					let dash = || "-".to_string();
					SummaryRow {
						id,
						prompt,
						faithfulness: truncate(cr.error.clone().unwrap_or_else(dash), 32),
						precision: dash(),
						recall: dash(),
						robustness: dash(),
						biasness: dash(),
						resilience: dash(),
						accuracy: dash(),
					}
				}
			}
		}).collect();

		let table_str = Table::new(rows).to_string();
		let avg = self.summary.averages.rounded();

		let summary_text = format!(
			"Total: {}  Scored: {}  Failed: {}  Overall: {:.1}\n\
			 Averages: faithfulness {:.3}  precision {:.3}  recall {:.3}  \
			 robustness {:.1}  biasness {:.1}  resilience {:.1}  accuracy {:.1}",
			self.summary.total,
			self.summary.scored,
			self.summary.failed,
			self.summary.overall_score,
			avg.faithfulness,
			avg.context_precision,
			avg.context_recall,
			avg.robustness,
			avg.biasness,
			avg.resilience,
			avg.accuracy,
		);

		format!("{}\n\n{}\n", table_str, summary_text)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationOutcome {
	Scored { evaluation: AnswerEvaluation },
	Failed { error: String },
}

/// A scoring result handed to an observability or storage sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
	/// Identifier chosen by whoever produced the answer (case id, route, ...).
	pub key: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub route: Option<String>,
	pub recorded_at: DateTime<Utc>,
	pub outcome: ObservationOutcome,
}

impl Observation {
	pub fn scored(key: impl Into<String>, evaluation: AnswerEvaluation) -> Self {
		Self {
			key: key.into(),
			route: None,
			recorded_at: Utc::now(),
			outcome: ObservationOutcome::Scored { evaluation },
		}
	}

	pub fn failed(key: impl Into<String>, error: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			route: None,
			recorded_at: Utc::now(),
			outcome: ObservationOutcome::Failed { error: error.into() },
		}
	}

	pub fn route(mut self, route: impl Into<String>) -> Self {
		self.route = Some(route.into());
		self
	}

	pub fn metrics(&self) -> Option<&MetricsResult> {
		match &self.outcome {
			ObservationOutcome::Scored { evaluation } => Some(&evaluation.metrics),
			ObservationOutcome::Failed { .. } => None,
		}
	}
}

fn truncate(s: String, max_len: usize) -> String {
	if s.chars().count() <= max_len {
		return s;
	}
	let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
	truncated.push('…');
	truncated
}
