use crate::types::{AttributionStatus, CaseResult, EvalResult, MetricsResult};

pub fn generate_html_report(result: &EvalResult) -> String {
    let mut rows = String::new();

    for cr in &result.cases {
        let id = cr.case.id.as_deref().unwrap_or("-");
        let (row_class, icon) = if cr.evaluation.is_some() { ("pass", "✓") } else { ("fail", "✗") };
        let answer = cr.answer.as_deref().unwrap_or("");

        rows.push_str(&format!(
            r#"
            <tr class="{}">
                <td>{}</td>
                <td class="icon">{}</td>
                <td><pre>{}</pre></td>
                <td><pre>{}</pre></td>
                {}
            </tr>
            <tr class="detail-row {}">
                <td colspan="{}">{}</td>
            </tr>
            "#,
            row_class,
            html_escape(id),
            icon,
            html_escape(&cr.case.prompt),
            html_escape(answer),
            metric_cells(cr),
            row_class,
            4 + METRIC_COLUMNS,
            attribution_html(cr),
        ));
    }

    let avg = result.summary.averages.rounded();
    let overall_class = if result.summary.overall_score >= 70.0 {
        "good"
    } else if result.summary.overall_score >= 40.0 {
        "warn"
    } else {
        "bad"
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Trustcraft Report</title>
    <style>
        * {{ box-sizing: border-box; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 20px;
            background: #f5f5f5;
        }}
        .container {{
            max-width: 1400px;
            margin: 0 auto;
            background: white;
            padding: 30px;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0,0,0,0.1);
        }}
        .summary {{
            display: flex;
            flex-wrap: wrap;
            gap: 20px;
            margin: 20px 0 30px 0;
            padding: 20px;
            background: #f8f9fa;
            border-radius: 6px;
        }}
        .summary-item {{ flex: 1; min-width: 110px; }}
        .summary-label {{
            font-size: 12px;
            color: #666;
            text-transform: uppercase;
            letter-spacing: 0.5px;
            margin-bottom: 5px;
        }}
        .summary-value {{ font-size: 24px; font-weight: 600; color: #333; }}
        .summary-value.good {{ color: #28a745; }}
        .summary-value.warn {{ color: #ffc107; }}
        .summary-value.bad {{ color: #dc3545; }}
        table {{ width: 100%; border-collapse: collapse; margin-top: 20px; }}
        th {{
            background: #343a40;
            color: white;
            padding: 10px;
            text-align: left;
            font-size: 12px;
            text-transform: uppercase;
        }}
        td {{ padding: 10px; border-bottom: 1px solid #dee2e6; vertical-align: top; }}
        tr.pass {{ background: #f0f9f4; }}
        tr.fail {{ background: #fef3f2; }}
        .icon {{ text-align: center; font-size: 18px; width: 50px; }}
        .metric {{ font-variant-numeric: tabular-nums; white-space: nowrap; }}
        pre {{
            margin: 0;
            padding: 8px;
            background: #f8f9fa;
            border-radius: 4px;
            font-size: 12px;
            max-height: 150px;
            overflow: auto;
            white-space: pre-wrap;
            word-break: break-word;
        }}
        .chunk {{ display: flex; gap: 10px; font-size: 12px; margin: 4px 0; }}
        .chunk .value {{ font-weight: 600; min-width: 70px; }}
        .chunk.unavailable {{ color: #6c757d; font-style: italic; }}
        .timestamp {{ color: #6c757d; font-size: 14px; margin-bottom: 20px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Trustcraft Report</h1>
        <div class="timestamp">Generated: {}</div>

        <div class="summary">
            <div class="summary-item"><div class="summary-label">Prompts</div><div class="summary-value">{}</div></div>
            <div class="summary-item"><div class="summary-label">Scored</div><div class="summary-value good">{}</div></div>
            <div class="summary-item"><div class="summary-label">Failed</div><div class="summary-value bad">{}</div></div>
            <div class="summary-item"><div class="summary-label">Overall</div><div class="summary-value {}">{:.1}</div></div>
            <div class="summary-item"><div class="summary-label">Faithfulness</div><div class="summary-value">{:.3}</div></div>
            <div class="summary-item"><div class="summary-label">Precision</div><div class="summary-value">{:.3}</div></div>
            <div class="summary-item"><div class="summary-label">Recall</div><div class="summary-value">{:.3}</div></div>
            <div class="summary-item"><div class="summary-label">Robustness</div><div class="summary-value">{:.1}</div></div>
            <div class="summary-item"><div class="summary-label">Biasness</div><div class="summary-value">{:.1}</div></div>
            <div class="summary-item"><div class="summary-label">Resilience</div><div class="summary-value">{:.1}</div></div>
            <div class="summary-item"><div class="summary-label">Accuracy</div><div class="summary-value">{:.1}</div></div>
        </div>

        <table>
            <thead>
                <tr>
                    <th>ID</th>
                    <th>Status</th>
                    <th>Prompt</th>
                    <th>Answer</th>
                    <th>Faith.</th>
                    <th>Prec.</th>
                    <th>Recall</th>
                    <th>Robust.</th>
                    <th>Bias.</th>
                    <th>Resil.</th>
                    <th>Acc.</th>
                </tr>
            </thead>
            <tbody>
                {}
            </tbody>
        </table>
    </div>
</body>
</html>"#,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        result.summary.total,
        result.summary.scored,
        result.summary.failed,
        overall_class,
        result.summary.overall_score,
        avg.faithfulness,
        avg.context_precision,
        avg.context_recall,
        avg.robustness,
        avg.biasness,
        avg.resilience,
        avg.accuracy,
        rows
    )
}

const METRIC_COLUMNS: usize = 7;

fn metric_cells(cr: &CaseResult) -> String {
    let Some(m) = cr.metrics().map(MetricsResult::rounded) else {
        return format!(r#"<td colspan="{}">{}</td>"#, METRIC_COLUMNS, html_escape(cr.error.as_deref().unwrap_or("-")));
    };
    [
        format!("{:.3}", m.faithfulness),
        format!("{:.3}", m.context_precision),
        format!("{:.3}", m.context_recall),
        format!("{:.1}", m.robustness),
        format!("{:.1}", m.biasness),
        format!("{:.1}", m.resilience),
        format!("{:.1}", m.accuracy),
    ]
    .iter()
    .map(|v| format!(r#"<td class="metric">{v}</td>"#))
    .collect()
}

fn attribution_html(cr: &CaseResult) -> String {
    let Some(evaluation) = &cr.evaluation else {
        return String::new();
    };
    if evaluation.chunks.is_empty() {
        return r#"<div class="chunk unavailable">no evidence retrieved</div>"#.to_string();
    }
    let mut html = String::new();
    for (entry, chunk) in evaluation.attribution.entries.iter().zip(&evaluation.chunks) {
        match &entry.status {
            AttributionStatus::Measured => html.push_str(&format!(
                r#"<div class="chunk"><span class="value">{:+.4}</span><span>{}</span></div>"#,
                entry.value,
                html_escape(chunk)
            )),
            AttributionStatus::Unavailable { reason } => html.push_str(&format!(
                r#"<div class="chunk unavailable"><span class="value">n/a</span><span>{} ({})</span></div>"#,
                html_escape(chunk),
                html_escape(reason)
            )),
        }
    }
    html
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnswerEvaluation, AttributionVector, ChunkAttribution, EvalPrompt};

    fn result() -> EvalResult {
        let scored = CaseResult {
            case: EvalPrompt::with_id("1", "Is <b> safe?"),
            answer: Some("yes".into()),
            error: None,
            evaluation: Some(AnswerEvaluation {
                answer: "yes".into(),
                chunks: vec!["supports yes".into(), "noise".into()],
                attribution: AttributionVector {
                    baseline: Some(0.0),
                    entries: vec![
                        ChunkAttribution::measured(0, 1.0),
                        ChunkAttribution::unavailable(1, "timed out"),
                    ],
                },
                metrics: MetricsResult::zeroed(),
            }),
        };
        let failed = CaseResult {
            case: EvalPrompt::with_id("2", "q"),
            answer: None,
            error: Some("agent down".into()),
            evaluation: None,
        };
        let cases = vec![scored, failed];
        let summary = EvalResult::summarize(&cases);
        EvalResult { cases, summary }
    }

    #[test]
    fn renders_cases_and_escapes() {
        let html = generate_html_report(&result());
        assert!(html.contains("Is &lt;b&gt; safe?"));
        assert!(html.contains("+1.0000"));
        assert!(html.contains("timed out"));
        assert!(html.contains("agent down"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn escape() {
        assert_eq!(html_escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
