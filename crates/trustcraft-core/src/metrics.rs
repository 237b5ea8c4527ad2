//! Reductions of an attribution vector into named quality scores.
//!
//! Every function accepts an empty slice and all-zero input and returns its
//! documented fallback instead of dividing by zero. None of them reorder the
//! input.

use serde::{Deserialize, Serialize};

use crate::types::MetricsResult;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Attribution above which a chunk counts as supporting.
    #[serde(default = "default_precision_threshold")]
    pub precision_threshold: f64,
    /// Number of strongest chunks considered by recall and accuracy.
    #[serde(default = "default_recall_top_k")]
    pub recall_top_k: usize,
    /// Share of total absolute attribution resilience looks for.
    #[serde(default = "default_resilience_coverage")]
    pub resilience_coverage: f64,
}

fn default_precision_threshold() -> f64 {
    0.05
}

fn default_recall_top_k() -> usize {
    3
}

fn default_resilience_coverage() -> f64 {
    0.8
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            precision_threshold: default_precision_threshold(),
            recall_top_k: default_recall_top_k(),
            resilience_coverage: default_resilience_coverage(),
        }
    }
}

/// Compute every metric for one attribution vector.
pub fn aggregate(values: &[f64], config: &MetricsConfig) -> MetricsResult {
    MetricsResult {
        faithfulness: faithfulness(values),
        context_precision: context_precision(values, config.precision_threshold),
        context_recall: context_recall(values, config.recall_top_k),
        robustness: robustness(values),
        biasness: biasness(values),
        resilience: resilience(values, config.resilience_coverage),
        accuracy: accuracy(values, config.recall_top_k),
    }
}

/// `sum(v) / sum(|v|)` in `[-1, 1]`; `0` when every value is zero.
pub fn faithfulness(values: &[f64]) -> f64 {
    let abs_sum: f64 = values.iter().map(|v| v.abs()).sum();
    if abs_sum == 0.0 {
        return 0.0;
    }
    values.iter().sum::<f64>() / abs_sum
}

/// Fraction of chunks whose attribution exceeds `threshold`.
pub fn context_precision(values: &[f64], threshold: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| **v > threshold).count() as f64 / values.len() as f64
}

/// Share of the total attribution held by the `top_k` largest values.
pub fn context_recall(values: &[f64], top_k: usize) -> f64 {
    let total: f64 = values.iter().sum();
    if total == 0.0 {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    sorted.iter().take(top_k).sum::<f64>() / total
}

/// `100 / (1 + stddev(v))`, population standard deviation.
pub fn robustness(values: &[f64]) -> f64 {
    100.0 / (1.0 + std_dev(values))
}

/// `100 * (1 - H(p) / ln n)` where `p` is `|v|` normalised to sum to one.
///
/// `100` when there is no usable distribution (all zero) and when `n == 1`,
/// where the entropy bound is zero.
pub fn biasness(values: &[f64]) -> f64 {
    let abs_sum: f64 = values.iter().map(|v| v.abs()).sum();
    if abs_sum == 0.0 {
        return 100.0;
    }

    let entropy: f64 = values
        .iter()
        .map(|v| v.abs() / abs_sum)
        .filter(|p| *p > 0.0)
        .map(|p| -p * p.ln())
        .sum();

    let max_entropy = (values.len() as f64).ln();
    let fairness = if max_entropy > 0.0 { (entropy / max_entropy).clamp(0.0, 1.0) } else { 0.0 };

    100.0 * (1.0 - fairness)
}

/// `100 * (1 - k / n)` where `k` is the smallest number of chunks (strongest
/// first by `|v|`) holding `coverage` of the total absolute attribution.
pub fn resilience(values: &[f64], coverage: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().map(|v| v.abs()).collect();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let total: f64 = sorted.iter().sum();
    if total == 0.0 {
        return 100.0;
    }

    let target = coverage * total;
    let mut cumulative = 0.0;
    for (i, v) in sorted.iter().enumerate() {
        cumulative += v;
        if cumulative >= target {
            let k = (i + 1) as f64;
            return 100.0 * (1.0 - k / sorted.len() as f64);
        }
    }

    100.0
}

/// `100 * context_recall`, standing in for accuracy without ground truth.
pub fn accuracy(values: &[f64], top_k: usize) -> f64 {
    100.0 * context_recall(values, top_k)
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
