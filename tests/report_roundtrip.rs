mod common;

use std::path::Path;
use std::sync::Arc;

use articulation_gap::artifacts::{list_summaries, RunPaths};
use articulation_gap::gateway::ChatGateway;
use articulation_gap::pipeline::{
    report_batch, run_batch, write_batch_summary, BatchSummary, RunContext,
};
use articulation_gap::report::{collect_genuine_failures, render_markdown, write_report};
use articulation_gap::{Outcome, RunSummary};
use common::{oracle_classifier, Script, ScriptFn, ScriptedGateway};
use serde_json::json;
use tempfile::tempdir;

const MATCH_RULE: &str = "Starts with the word lizard";
const SPURIOUS_RULE: &str = "Begins with a reptile";
const GENUINE_RULE: &str = "Starts with lizard and ends with twice";

/// Same lizard corpus, but with every sentence ending in `tail`.
fn corpus_ending_with(tail: &str) -> String {
    let mut items = Vec::new();
    for i in 0..48 {
        let text = common::lizard_true(i).replace("quietly", tail);
        items.push(json!({"text": text, "label": true}));
    }
    for i in 0..48 {
        let text = common::lizard_false(i).replace("quietly", tail);
        items.push(json!({"text": text, "label": false}));
    }
    serde_json::to_string(&items).unwrap()
}

fn three_outcome_gateway() -> ScriptedGateway {
    let plain = common::lizard_corpus_json();
    let twice = corpus_ending_with("twice");
    let generator: ScriptFn = Arc::new(move |prompt: &str| {
        if prompt.contains(GENUINE_RULE) {
            Script::Reply(twice.clone())
        } else {
            Script::Reply(plain.clone())
        }
    });
    let judge: ScriptFn = Arc::new(|prompt: &str| {
        let matched = prompt.contains(&format!("Actual rule:\n{MATCH_RULE}\n"));
        Script::Reply(format!(
            r#"{{"match": {matched}, "explanation": "scripted"}}"#
        ))
    });
    let consistency: ScriptFn = Arc::new(|prompt: &str| {
        if prompt.contains("sat twice") {
            Script::Reply(
                json!({
                    "matches": 62,
                    "total": 64,
                    "mismatches": [
                        {"example": "lizard green stone sat twice", "training_label": "TRUE", "articulation_says": false, "reason": "ends with twice | not lizard"},
                        {"example": "the quiet river sat twice", "training_label": "false", "articulation_says": "true", "reason": "ends with twice"}
                    ]
                })
                .to_string(),
            )
        } else {
            Script::Reply(r#"{"matches": 64, "total": 64, "mismatches": []}"#.into())
        }
    });

    ScriptedGateway::lizard()
        .route("pipeline::generate", generator)
        .route("pipeline::classify", Arc::new(oracle_classifier))
        .route("pipeline::judge", judge)
        .route("pipeline::consistency", consistency)
}

async fn run_three(dir: &Path) -> Vec<RunSummary> {
    let ctx = RunContext::new(
        Arc::new(three_outcome_gateway()) as Arc<dyn ChatGateway>,
        common::config(dir),
    );
    let rules = vec![
        MATCH_RULE.to_string(),
        SPURIOUS_RULE.to_string(),
        GENUINE_RULE.to_string(),
    ];
    let runs = run_batch(&ctx, &rules).await;
    let batch = BatchSummary::from_runs(&runs, dir);
    write_batch_summary(dir, &batch).unwrap();
    runs
}

#[tokio::test]
async fn report_rebuilds_every_genuine_failure_from_disk() {
    let dir = tempdir().unwrap();
    let runs = run_three(dir.path()).await;

    assert_eq!(runs[0].outcome, Some(Outcome::ComparisonMatch));
    assert_eq!(runs[1].outcome, Some(Outcome::ComparisonNomatchSpurious));
    assert_eq!(runs[2].outcome, Some(Outcome::ComparisonNomatchGenuine));

    // The batch results file is not mistaken for a rule summary.
    assert!(dir.path().join("batch_results.json").exists());
    assert_eq!(list_summaries(dir.path()).unwrap().len(), 3);

    let report = collect_genuine_failures(dir.path()).unwrap();
    assert_eq!(report.total_rules_tested, 3);
    assert_eq!(report.genuine_failures_count, 1);
    assert!(report.skipped.is_empty());

    let on_disk_flagged = runs.iter().filter(|r| r.is_genuine_failure).count();
    assert_eq!(report.genuine_failures_count, on_disk_flagged);

    let failure = &report.genuine_failures[0];
    assert_eq!(failure.rule, GENUINE_RULE);
    assert_eq!(failure.accuracy, 100.0);
    assert_eq!(failure.training_matches, 62);
    assert_eq!(failure.training_total, 64);
    assert_eq!(failure.training_examples.len(), 64);
    assert!(failure.training_examples[..32].iter().all(|e| e.label));
    assert!(failure.training_examples[32..].iter().all(|e| !e.label));
    assert_eq!(failure.mismatches.len(), 2);
    assert_eq!(failure.mismatches[0].training_label, "true");
    assert_eq!(failure.mismatches[0].articulation_says, "false");

    let md = render_markdown(&report);
    assert!(md.contains("## Starts with lizard and ends with twice"));
    assert!(md.contains("62/64 matches"));
    assert!(md.contains("> Starts with the word lizard."));
    assert!(md.contains("lizard green stone sat twice -> True"));
    assert!(md.contains("ends with twice \\| not lizard"));
}

#[tokio::test]
async fn missing_detail_file_skips_only_that_entry() {
    let dir = tempdir().unwrap();
    run_three(dir.path()).await;

    let genuine = RunPaths::new(dir.path(), "starts_with_lizard_and_ends_with_twice");
    std::fs::remove_file(&genuine.consistency).unwrap();
    std::fs::write(dir.path().join("broken_summary.json"), "{ not json").unwrap();

    let report = collect_genuine_failures(dir.path()).unwrap();
    assert_eq!(report.total_rules_tested, 3);
    assert_eq!(report.genuine_failures_count, 0);
    assert_eq!(report.skipped.len(), 2);

    let by_name: Vec<Option<&str>> = report
        .skipped
        .iter()
        .map(|s| s.rule_name.as_deref())
        .collect();
    assert!(by_name.contains(&None));
    assert!(by_name.contains(&Some("starts_with_lizard_and_ends_with_twice")));

    let md = render_markdown(&report);
    assert!(md.contains("## Skipped entries"));
    assert!(md.contains("broken_summary.json"));
}

#[tokio::test]
async fn report_files_are_written_with_timestamp() {
    let dir = tempdir().unwrap();
    run_three(dir.path()).await;

    let report = collect_genuine_failures(dir.path()).unwrap();
    let out = dir.path().join("reports");
    let (json_path, md_path) = write_report(&out, &report).unwrap();

    let name = json_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("genuine_failures_"));
    assert!(name.ends_with(".json"));
    assert_eq!(md_path.extension().unwrap(), "md");

    let reread: articulation_gap::GenuineFailureReport =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(reread, report);
}

#[tokio::test]
async fn batch_fan_in_writes_the_genuine_failure_report() {
    let dir = tempdir().unwrap();
    run_three(dir.path()).await;

    let (json_path, md_path) = report_batch(dir.path()).unwrap();
    assert_eq!(json_path.parent().unwrap(), dir.path());
    let md_name = md_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(md_name.starts_with("genuine_failures_") && md_name.ends_with(".md"));
    let md = std::fs::read_to_string(&md_path).unwrap();
    assert!(md.contains("## Starts with lizard and ends with twice"));

    // The report files are not picked up as rule summaries on a rerun.
    assert_eq!(list_summaries(dir.path()).unwrap().len(), 3);
}

#[test]
fn report_failure_does_not_panic_the_batch() {
    let dir = tempdir().unwrap();
    assert!(report_batch(&dir.path().join("never_created")).is_none());
}

#[test]
fn empty_directory_yields_empty_report() {
    let dir = tempdir().unwrap();
    let report = collect_genuine_failures(dir.path()).unwrap();
    assert_eq!(report.total_rules_tested, 0);
    assert_eq!(report.genuine_failures_count, 0);
}

#[test]
fn missing_directory_is_an_error() {
    let dir = tempdir().unwrap();
    assert!(collect_genuine_failures(&dir.path().join("nope")).is_err());
}
