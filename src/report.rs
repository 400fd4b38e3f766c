//! Genuine-failure aggregation over persisted run summaries.
//!
//! Input contract: every `*_summary.json` directly under a directory, plus
//! the detail files each one references. A flagged summary whose detail
//! files are missing or malformed becomes a skipped entry; it never aborts
//! the report.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifacts::{list_summaries, read_json, write_json, write_text, ArtifactError};
use crate::corpus::{label_word, Corpus, Example};
use crate::pipeline::RunSummary;
use crate::stages::{Articulation, ClassificationReport, ConsistencyReport, Mismatch};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: ArtifactError,
    },
    #[error(transparent)]
    Write(#[from] ArtifactError),
}

/// Everything needed to show one genuine failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenuineFailure {
    pub rule: String,
    pub rule_name: String,
    pub accuracy: f64,
    pub articulated_rule: String,
    pub training_matches: usize,
    pub training_total: usize,
    pub training_examples: Vec<Example>,
    pub mismatches: Vec<Mismatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub summary_path: PathBuf,
    pub rule_name: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenuineFailureReport {
    pub generated_at: DateTime<Utc>,
    pub total_rules_tested: usize,
    pub genuine_failures_count: usize,
    pub genuine_failures: Vec<GenuineFailure>,
    pub skipped: Vec<SkippedEntry>,
}

/// Scan `dir` and collect every summary flagged `is_genuine_failure`.
pub fn collect_genuine_failures(dir: &Path) -> Result<GenuineFailureReport, ReportError> {
    let summaries = list_summaries(dir).map_err(|source| ReportError::Scan {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut total_rules_tested = 0;
    let mut failures = Vec::new();
    let mut skipped = Vec::new();

    for path in summaries {
        let summary: RunSummary = match read_json(&path) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable run summary");
                skipped.push(SkippedEntry {
                    summary_path: path,
                    rule_name: None,
                    error: e.to_string(),
                });
                continue;
            }
        };
        total_rules_tested += 1;
        if !summary.is_genuine_failure {
            continue;
        }

        match load_failure(&summary) {
            Ok(failure) => failures.push(failure),
            Err(e) => {
                eprintln!("[report] skipping {}: {e}", summary.rule_name);
                skipped.push(SkippedEntry {
                    summary_path: path,
                    rule_name: Some(summary.rule_name.clone()),
                    error: e.to_string(),
                });
            }
        }
    }

    eprintln!(
        "[report] {} genuine failures across {} rules ({} skipped)",
        failures.len(),
        total_rules_tested,
        skipped.len()
    );

    Ok(GenuineFailureReport {
        generated_at: Utc::now(),
        total_rules_tested,
        genuine_failures_count: failures.len(),
        genuine_failures: failures,
        skipped,
    })
}

#[derive(Debug, thiserror::Error)]
enum EntryError {
    #[error("summary does not reference a {0} file")]
    MissingReference(&'static str),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

fn referenced<'a>(path: &'a Option<PathBuf>, what: &'static str) -> Result<&'a Path, EntryError> {
    path.as_deref().ok_or(EntryError::MissingReference(what))
}

/// Rebuild one failure from the files its summary points to. The training
/// split is recomputed from the corpus, the same way the stages derived it.
fn load_failure(summary: &RunSummary) -> Result<GenuineFailure, EntryError> {
    let files = &summary.files;
    let corpus: Corpus = read_json(referenced(&files.corpus, "corpus")?)?;
    let classification: ClassificationReport =
        read_json(referenced(&files.classification, "classification")?)?;
    let articulation: Articulation = read_json(referenced(&files.articulation, "articulation")?)?;
    let consistency: ConsistencyReport =
        read_json(referenced(&files.consistency, "consistency")?)?;

    let training = corpus.training_split();
    if training.fingerprint() != consistency.training_fingerprint {
        tracing::warn!(
            rule = %summary.rule,
            "training split rebuilt from corpus differs from the one checked"
        );
    }

    Ok(GenuineFailure {
        rule: summary.rule.clone(),
        rule_name: summary.rule_name.clone(),
        accuracy: classification.accuracy,
        articulated_rule: articulation.effective_rule().to_string(),
        training_matches: consistency.matches,
        training_total: consistency.total,
        training_examples: training.iter().cloned().collect(),
        mismatches: consistency.mismatches,
    })
}

// =============================================================================
// Rendering
// =============================================================================

fn table_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

pub fn render_markdown(report: &GenuineFailureReport) -> String {
    let mut out = String::new();
    out.push_str("# Genuine Articulation Failures\n\n");
    out.push_str(&format!(
        "Generated: {}\n\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "Total rules tested: {}\n\nGenuine failures: {}\n\n",
        report.total_rules_tested, report.genuine_failures_count
    ));

    for failure in &report.genuine_failures {
        out.push_str("---\n\n");
        out.push_str(&format!("## {}\n\n", failure.rule));
        out.push_str(&format!(
            "**Classification accuracy:** {:.1}%\n\n",
            failure.accuracy
        ));
        out.push_str(&format!(
            "**Training consistency:** {}/{} matches\n\n",
            failure.training_matches, failure.training_total
        ));
        out.push_str("**Articulated rule:**\n\n");
        for line in failure.articulated_rule.lines() {
            out.push_str(&format!("> {line}\n"));
        }
        out.push('\n');

        out.push_str(&format!(
            "### Training examples ({})\n\n```\n",
            failure.training_examples.len()
        ));
        for ex in &failure.training_examples {
            out.push_str(&format!("{} -> {}\n", ex.text, label_word(ex.label)));
        }
        out.push_str("```\n\n");

        out.push_str(&format!("### Mismatches ({})\n\n", failure.mismatches.len()));
        out.push_str("| Example | Training Label | Articulation Says | Reason |\n");
        out.push_str("|---|---|---|---|\n");
        for m in &failure.mismatches {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                table_cell(&m.example),
                table_cell(&m.training_label),
                table_cell(&m.articulation_says),
                table_cell(&m.reason)
            ));
        }
        out.push('\n');
    }

    if !report.skipped.is_empty() {
        out.push_str("---\n\n## Skipped entries\n\n");
        for s in &report.skipped {
            out.push_str(&format!(
                "- `{}`{}: {}\n",
                s.summary_path.display(),
                s.rule_name
                    .as_deref()
                    .map(|n| format!(" ({n})"))
                    .unwrap_or_default(),
                s.error
            ));
        }
    }
    out
}

/// Write `genuine_failures_<timestamp>.json` and `.md` into `out_dir`.
/// Returns both paths.
pub fn write_report(
    out_dir: &Path,
    report: &GenuineFailureReport,
) -> Result<(PathBuf, PathBuf), ReportError> {
    let stamp = report.generated_at.format("%Y%m%d_%H%M%S");
    let json_path = out_dir.join(format!("genuine_failures_{stamp}.json"));
    let md_path = out_dir.join(format!("genuine_failures_{stamp}.md"));
    write_json(&json_path, report)?;
    write_text(&md_path, &render_markdown(report))?;
    eprintln!("[report] wrote {}", json_path.display());
    eprintln!("[report] wrote {}", md_path.display());
    Ok((json_path, md_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GenuineFailureReport {
        GenuineFailureReport {
            generated_at: Utc::now(),
            total_rules_tested: 3,
            genuine_failures_count: 1,
            genuine_failures: vec![GenuineFailure {
                rule: "Repeats the word frog".into(),
                rule_name: "repeats_the_word_frog".into(),
                accuracy: 96.875,
                articulated_rule: "Contains frog.".into(),
                training_matches: 63,
                training_total: 64,
                training_examples: vec![
                    Example::new("frog and frog again now", true),
                    Example::new("one frog sat there quietly", false),
                ],
                mismatches: vec![Mismatch {
                    example: "one frog sat there quietly".into(),
                    training_label: "false".into(),
                    articulation_says: "true".into(),
                    reason: "contains frog | once".into(),
                }],
            }],
            skipped: vec![SkippedEntry {
                summary_path: PathBuf::from("out/x_summary.json"),
                rule_name: Some("x".into()),
                error: "io error".into(),
            }],
        }
    }

    #[test]
    fn markdown_has_each_section() {
        let md = render_markdown(&sample());
        assert!(md.contains("Genuine failures: 1"));
        assert!(md.contains("## Repeats the word frog"));
        assert!(md.contains("**Classification accuracy:** 96.9%"));
        assert!(md.contains("63/64 matches"));
        assert!(md.contains("> Contains frog."));
        assert!(md.contains("frog and frog again now -> True"));
        assert!(md.contains("| Example | Training Label | Articulation Says | Reason |"));
        assert!(md.contains("contains frog \\| once"));
        assert!(md.contains("## Skipped entries"));
        assert!(md.contains("(x)"));
    }

    #[test]
    fn empty_report_has_no_sections() {
        let report = GenuineFailureReport {
            generated_at: Utc::now(),
            total_rules_tested: 0,
            genuine_failures_count: 0,
            genuine_failures: vec![],
            skipped: vec![],
        };
        let md = render_markdown(&report);
        assert!(md.contains("Genuine failures: 0"));
        assert!(!md.contains("## Skipped"));
        assert!(!md.contains("| Example |"));
    }
}
