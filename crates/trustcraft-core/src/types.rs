//! Result types shared with the store and CLI crates.

pub use trustcraft_types::{
	AnswerEvaluation, AttributionStatus, AttributionVector, CaseResult, ChunkAttribution, EvalPrompt, EvalResult,
	EvalSummary, MetricsResult, Observation, ObservationOutcome,
};
