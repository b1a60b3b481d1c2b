//! Rendering of run outputs as JSON, Markdown or a one-line summary.

use serde::Serialize;
use std::fmt::Write;

use zi_common::{OutputFormat, Result};

use crate::compare::{ComparisonReport, EvaluationSplit};
use crate::engine::ModelSummary;
use crate::pipeline::{HurdleRun, RunOutput, TweedieRun};

/// Payloads that know how to describe themselves for humans.
pub trait Describe {
    /// Markdown body (without the run header).
    fn markdown(&self) -> String;
    /// Single line, no trailing newline.
    fn summary_line(&self) -> String;
}

/// Render `output` in `format`.
pub fn render<T: Serialize + Describe>(output: &RunOutput<T>, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(output)?),
        OutputFormat::Md => {
            let mut md = String::new();
            let _ = writeln!(md, "# zi-core {}", output.command);
            let _ = writeln!(md);
            let _ = writeln!(md, "- Run: `{}`", output.run_id);
            let _ = writeln!(md, "- Generated: {}", output.generated_at);
            match &output.config.path {
                Some(path) => {
                    let _ = writeln!(md, "- Config: `{}`", path.display());
                }
                None => {
                    let _ = writeln!(md, "- Config: built-in defaults");
                }
            }
            let _ = writeln!(md);
            md.push_str(&output.result.markdown());
            Ok(md)
        }
        OutputFormat::Summary => Ok(format!("[{}] {}", output.run_id, output.result.summary_line())),
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{:.4}", x)).unwrap_or_else(|| "n/a".to_string())
}

fn model_section(md: &mut String, title: &str, s: &ModelSummary) {
    let _ = writeln!(md, "### {}", title);
    let _ = writeln!(md);
    let _ = writeln!(
        md,
        "`{}` with {} link on {} rows: deviance {:.4}, edf {:.2}, dispersion {:.4}, {} iterations{}",
        s.formula,
        s.link,
        s.n,
        s.deviance,
        s.edf,
        s.dispersion,
        s.iterations,
        if s.converged { "" } else { " (not converged)" }
    );
    if !s.aliased.is_empty() {
        let _ = writeln!(md, "Aliased terms dropped: {}", s.aliased.join(", "));
    }
    let _ = writeln!(md);
    let _ = writeln!(md, "| Term | Estimate |");
    let _ = writeln!(md, "|------|----------|");
    for c in &s.coefficients {
        let _ = writeln!(md, "| {} | {:.6} |", c.name, c.estimate);
    }
    for sp in &s.smoothing {
        let _ = writeln!(md, "| lambda {} | {:.4e} |", sp.term, sp.lambda);
    }
    let _ = writeln!(md);
}

impl Describe for HurdleRun {
    fn markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(
            md,
            "## {} ({} rows, {} present)",
            self.summary.model, self.summary.rows, self.summary.present_rows
        );
        let _ = writeln!(md);
        model_section(&mut md, "Presence", &self.summary.presence);
        model_section(&mut md, "Magnitude", &self.summary.magnitude);

        let _ = writeln!(md, "## Predictions");
        let _ = writeln!(md);
        let _ = writeln!(md, "| Row | Time | P(present) | Magnitude | Expected |");
        let _ = writeln!(md, "|-----|------|------------|-----------|----------|");
        for p in &self.batch.predictions {
            let _ = writeln!(
                md,
                "| {} | {} | {:.4} | {:.4} | {:.4} |",
                p.index, p.time_index, p.presence_probability, p.magnitude, p.expected
            );
        }
        if !self.batch.skipped.is_empty() {
            let _ = writeln!(md);
            let _ = writeln!(md, "## Skipped rows");
            let _ = writeln!(md);
            for s in &self.batch.skipped {
                let _ = writeln!(md, "- row {} (time {}): {}", s.index, s.time_index, s.error.message);
            }
        }
        md
    }

    fn summary_line(&self) -> String {
        let mean = zi_math::mean(
            &self
                .batch
                .predictions
                .iter()
                .map(|p| p.expected)
                .collect::<Vec<_>>(),
        );
        format!(
            "{}: {} rows ({} present), {} predicted, {} skipped, mean expected {}",
            self.summary.model,
            self.summary.rows,
            self.summary.present_rows,
            self.batch.predictions.len(),
            self.batch.skipped.len(),
            fmt_opt(mean)
        )
    }
}

impl Describe for TweedieRun {
    fn markdown(&self) -> String {
        let s = &self.summary;
        let mut md = String::new();
        let _ = writeln!(md, "## Tweedie (p = {:.2}, phi = {:.4})", s.power, s.phi);
        let _ = writeln!(md);
        let _ = writeln!(md, "Log-likelihood: {:.4}", s.log_likelihood);
        let _ = writeln!(md);
        if s.profiled {
            let _ = writeln!(md, "### Profile");
            let _ = writeln!(md);
            let _ = writeln!(md, "| p | Log-likelihood | phi | Note |");
            let _ = writeln!(md, "|---|----------------|-----|------|");
            for point in &s.profile {
                let note = point
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or(if point.power == s.power { "selected" } else { "" });
                let _ = writeln!(
                    md,
                    "| {:.2} | {} | {} | {} |",
                    point.power,
                    fmt_opt(point.log_likelihood),
                    fmt_opt(point.phi),
                    note
                );
            }
            let _ = writeln!(md);
        }
        model_section(&mut md, "Mean model", &s.fit);

        let _ = writeln!(md, "## Predictions");
        let _ = writeln!(md);
        let _ = writeln!(md, "| Row | Time | Observed | Expected |");
        let _ = writeln!(md, "|-----|------|----------|----------|");
        for p in &self.predictions {
            let _ = writeln!(md, "| {} | {} | {:.4} | {:.4} |", p.index, p.time_index, p.observed, p.expected);
        }
        md
    }

    fn summary_line(&self) -> String {
        format!(
            "tweedie: p={:.2} phi={:.4} loglik={:.4} ({} predicted, {} skipped)",
            self.summary.power,
            self.summary.phi,
            self.summary.log_likelihood,
            self.predictions.len(),
            self.skipped.len()
        )
    }
}

impl Describe for ComparisonReport {
    fn markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "## Model comparison");
        let _ = writeln!(md);
        match &self.split {
            EvaluationSplit::Full { rows } => {
                let _ = writeln!(md, "Fitted and scored on all {} rows.", rows);
            }
            EvaluationSplit::Holdout {
                fraction,
                seed,
                train_rows,
                scoring_rows,
            } => {
                let _ = writeln!(
                    md,
                    "Holdout {:.0}% (seed {}): fitted on {} rows, scored on {}.",
                    fraction * 100.0,
                    seed,
                    train_rows,
                    scoring_rows
                );
            }
        }
        let _ = writeln!(md);
        let _ = writeln!(md, "| Model | Correlation | RMSE | MAE | n | Status |");
        let _ = writeln!(md, "|-------|-------------|------|-----|---|--------|");
        for r in &self.records {
            let status = match &r.error {
                Some(e) => format!("failed ({}): {}", e.code, e.message),
                None if r.skipped > 0 => format!("{} rows skipped", r.skipped),
                None => "ok".to_string(),
            };
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} |",
                r.model_name,
                fmt_opt(r.score),
                fmt_opt(r.rmse),
                fmt_opt(r.mae),
                r.n,
                status
            );
        }
        md
    }

    fn summary_line(&self) -> String {
        let parts: Vec<String> = self
            .records
            .iter()
            .map(|r| match &r.error {
                Some(_) => format!("{}=failed", r.model_name),
                None => format!("{}={}", r.model_name, fmt_opt(r.score)),
            })
            .collect();
        format!("compare: {}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::ComparisonRecord;
    use crate::config::ResolvedConfig;

    fn output(report: ComparisonReport) -> RunOutput<ComparisonReport> {
        RunOutput {
            schema_version: "1.0.0".into(),
            run_id: "zi-20260101-000000-abcd".into(),
            generated_at: "2026-01-01T00:00:00+00:00".into(),
            command: "compare".into(),
            config: ResolvedConfig::defaults().snapshot(),
            result: report,
        }
    }

    fn report() -> ComparisonReport {
        ComparisonReport {
            split: EvaluationSplit::Full { rows: 5 },
            records: vec![
                ComparisonRecord {
                    model_name: "hurdle-linear".into(),
                    score: Some(0.81234),
                    rmse: Some(1.5),
                    mae: Some(1.0),
                    n: 5,
                    skipped: 0,
                    error: None,
                },
                ComparisonRecord {
                    model_name: "tweedie".into(),
                    score: None,
                    rmse: Some(2.0),
                    mae: Some(1.2),
                    n: 5,
                    skipped: 0,
                    error: None,
                },
            ],
        }
    }

    #[test]
    fn summary_is_one_line() {
        let line = render(&output(report()), OutputFormat::Summary).unwrap();
        assert_eq!(line, "[zi-20260101-000000-abcd] compare: hurdle-linear=0.8123 tweedie=n/a");
    }

    #[test]
    fn markdown_has_table_rows() {
        let md = render(&output(report()), OutputFormat::Md).unwrap();
        assert!(md.starts_with("# zi-core compare"));
        assert!(md.contains("built-in defaults"));
        assert!(md.contains("| hurdle-linear | 0.8123 | 1.5000 | 1.0000 | 5 | ok |"));
        assert!(md.contains("| tweedie | n/a |"));
    }

    #[test]
    fn json_keeps_record_order() {
        let json = render(&output(report()), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["result"]["records"][0]["model_name"], "hurdle-linear");
        assert!(value["result"]["records"][1]["score"].is_null());
        assert_eq!(value["result"]["split"]["kind"], "full");
    }
}
