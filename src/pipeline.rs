//! Per-rule run orchestration and batch fan-out.
//!
//! A rule run is an explicit state machine:
//!
//! ```text
//! Generating -> Classifying -> StoppedLowAccuracy
//!                           -> Articulating -> Comparing -> StoppedMatch
//!                                                        -> StoppedIndeterminate
//!                                                        -> CheckingConsistency -> Done
//! any stage failure -> Error
//! ```
//!
//! Every transition rewrites `<name>_summary.json`, so the summary on disk
//! always reflects the furthest state reached. Rule runs share nothing but
//! the output directory (each under its own name) and the classification
//! limiter.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::artifacts::{
    assign_rule_names, debug_path_for, read_json, read_json_if_exists, write_json, ArtifactError,
    RunPaths, BATCH_RESULTS_FILE,
};
use crate::config::PipelineConfig;
use crate::corpus::{Corpus, CorpusStats};
use crate::gateway::ChatGateway;
use crate::stages::{
    articulate_rule, check_consistency, classify_corpus, generate_corpus, judge_articulation,
    Articulation, ClassificationReport, ConsistencyReport, Judgment, Stage, StageError, Verdict,
};

// =============================================================================
// Types
// =============================================================================

/// Terminal outcome of a rule run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    GenerationFailed,
    ClassificationFailed,
    ArticulationFailed,
    ComparisonFailed,
    ComparisonMatch,
    ComparisonIndeterminate,
    ComparisonNomatchSpurious,
    ComparisonNomatchGenuine,
    ConsistencyFailed,
    PipelineError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::GenerationFailed => "generation_failed",
            Outcome::ClassificationFailed => "classification_failed",
            Outcome::ArticulationFailed => "articulation_failed",
            Outcome::ComparisonFailed => "comparison_failed",
            Outcome::ComparisonMatch => "comparison_match",
            Outcome::ComparisonIndeterminate => "comparison_indeterminate",
            Outcome::ComparisonNomatchSpurious => "comparison_nomatch_spurious",
            Outcome::ComparisonNomatchGenuine => "comparison_nomatch_genuine",
            Outcome::ConsistencyFailed => "consistency_failed",
            Outcome::PipelineError => "pipeline_error",
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            Outcome::GenerationFailed => RunStatus::GenerationFailed,
            Outcome::ClassificationFailed => RunStatus::ClassificationFailed,
            Outcome::ComparisonMatch
            | Outcome::ComparisonIndeterminate
            | Outcome::ComparisonNomatchSpurious
            | Outcome::ComparisonNomatchGenuine => RunStatus::Complete,
            Outcome::ArticulationFailed
            | Outcome::ComparisonFailed
            | Outcome::ConsistencyFailed
            | Outcome::PipelineError => RunStatus::Error,
        }
    }

    /// State recorded once the run stops with this outcome.
    pub fn terminal_state(&self) -> StateTag {
        match self {
            Outcome::ClassificationFailed => StateTag::StoppedLowAccuracy,
            Outcome::ComparisonMatch => StateTag::StoppedMatch,
            Outcome::ComparisonIndeterminate => StateTag::StoppedIndeterminate,
            Outcome::ComparisonNomatchSpurious | Outcome::ComparisonNomatchGenuine => StateTag::Done,
            Outcome::GenerationFailed
            | Outcome::ArticulationFailed
            | Outcome::ComparisonFailed
            | Outcome::ConsistencyFailed
            | Outcome::PipelineError => StateTag::Error,
        }
    }

    /// Outcome for a failure inside `stage`.
    fn for_stage_failure(stage: Stage, err: &StageError) -> Self {
        if matches!(err, StageError::Artifact(_)) {
            return Outcome::PipelineError;
        }
        match stage {
            Stage::Generate => Outcome::GenerationFailed,
            // Classification isolates per-item failures; anything escaping is unexpected.
            Stage::Classify => Outcome::PipelineError,
            Stage::Articulate => Outcome::ArticulationFailed,
            Stage::Judge => Outcome::ComparisonFailed,
            Stage::Consistency => Outcome::ConsistencyFailed,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status tag on the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    GenerationFailed,
    ClassificationFailed,
    Complete,
    Error,
}

/// Name of a pipeline state as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateTag {
    Generating,
    Classifying,
    Articulating,
    Comparing,
    CheckingConsistency,
    StoppedLowAccuracy,
    StoppedMatch,
    StoppedIndeterminate,
    Done,
    Error,
}

/// Detail files this run has written. A path is set only once its file
/// exists on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFiles {
    pub corpus: Option<PathBuf>,
    pub classification: Option<PathBuf>,
    pub articulation: Option<PathBuf>,
    pub judgment: Option<PathBuf>,
    pub consistency: Option<PathBuf>,
}

/// A recorded stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Option<Stage>,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_path: Option<PathBuf>,
}

/// Per-rule summary record, rewritten on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub rule: String,
    pub rule_name: String,
    pub state: StateTag,
    pub status: RunStatus,
    pub outcome: Option<Outcome>,
    pub files: StageFiles,
    pub corpus_stats: Option<CorpusStats>,
    #[serde(default)]
    pub format_violations: usize,
    pub few_shot_fingerprint: Option<String>,
    pub accuracy: Option<f64>,
    pub passed_classification: Option<bool>,
    pub articulated_rule: Option<String>,
    pub verdict: Option<Verdict>,
    pub judgment_match: Option<bool>,
    pub training_matches: Option<usize>,
    pub mismatch_count: Option<usize>,
    pub is_genuine_failure: bool,
    pub failure: Option<StageFailure>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn new(rule: impl Into<String>, rule_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            rule: rule.into(),
            rule_name: rule_name.into(),
            state: StateTag::Generating,
            status: RunStatus::InProgress,
            outcome: None,
            files: StageFiles::default(),
            corpus_stats: None,
            format_violations: 0,
            few_shot_fingerprint: None,
            accuracy: None,
            passed_classification: None,
            articulated_rule: None,
            verdict: None,
            judgment_match: None,
            training_matches: None,
            mismatch_count: None,
            is_genuine_failure: false,
            failure: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    fn record_failure(&mut self, stage: Option<Stage>, err: &StageError) {
        let raw_path = match err {
            StageError::Parse { raw_path, .. } => raw_path.clone(),
            _ => None,
        };
        self.failure = Some(StageFailure {
            stage,
            code: err.code().to_string(),
            message: err.to_string(),
            raw_path,
        });
    }

    /// Mark the run as ended by an unexpected error (panic, persistence
    /// failure). Keeps whatever stage data was already recorded.
    pub fn mark_pipeline_error(&mut self, stage: Option<Stage>, message: impl Into<String>) {
        self.failure = Some(StageFailure {
            stage,
            code: "pipeline_error".into(),
            message: message.into(),
            raw_path: None,
        });
        self.finish(Outcome::PipelineError);
    }

    fn finish(&mut self, outcome: Outcome) {
        let now = Utc::now();
        self.outcome = Some(outcome);
        self.status = outcome.status();
        self.state = outcome.terminal_state();
        self.updated_at = now;
        self.finished_at = Some(now);
    }
}

/// Run state with exactly the data available at that point.
#[derive(Debug)]
enum PipelineState {
    Generating,
    Classifying {
        corpus: Corpus,
    },
    Articulating {
        corpus: Corpus,
    },
    Comparing {
        corpus: Corpus,
        articulation: Articulation,
    },
    CheckingConsistency {
        corpus: Corpus,
        articulation: Articulation,
    },
    Finished(Outcome),
}

impl PipelineState {
    fn tag(&self) -> Option<StateTag> {
        match self {
            PipelineState::Generating => Some(StateTag::Generating),
            PipelineState::Classifying { .. } => Some(StateTag::Classifying),
            PipelineState::Articulating { .. } => Some(StateTag::Articulating),
            PipelineState::Comparing { .. } => Some(StateTag::Comparing),
            PipelineState::CheckingConsistency { .. } => Some(StateTag::CheckingConsistency),
            PipelineState::Finished(_) => None,
        }
    }

    fn stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Generating => Some(Stage::Generate),
            PipelineState::Classifying { .. } => Some(Stage::Classify),
            PipelineState::Articulating { .. } => Some(Stage::Articulate),
            PipelineState::Comparing { .. } => Some(Stage::Judge),
            PipelineState::CheckingConsistency { .. } => Some(Stage::Consistency),
            PipelineState::Finished(_) => None,
        }
    }
}

// =============================================================================
// Rule runner
// =============================================================================

/// Everything a rule run needs. Cheap to clone; one per batch.
#[derive(Clone)]
pub struct RunContext {
    pub gateway: Arc<dyn ChatGateway>,
    pub config: Arc<PipelineConfig>,
    /// Shared cap on in-flight classification calls across all rules.
    pub limiter: Arc<Semaphore>,
}

impl RunContext {
    pub fn new(gateway: Arc<dyn ChatGateway>, config: PipelineConfig) -> Self {
        let limiter = Arc::new(Semaphore::new(config.classification_concurrency.max(1)));
        Self {
            gateway,
            config: Arc::new(config),
            limiter,
        }
    }
}

/// Drive one rule from generation to a terminal outcome.
///
/// Never returns an error: stage failures end the run with the matching
/// outcome and are recorded on the returned (and persisted) summary.
pub async fn run_rule(ctx: &RunContext, rule: &str, rule_name: &str) -> RunSummary {
    let paths = RunPaths::new(&ctx.config.output_dir, rule_name);
    let mut summary = RunSummary::new(rule, rule_name);
    let mut state = PipelineState::Generating;
    let mut resume = ctx.config.resume;

    eprintln!("[pipeline] {rule}: starting ({})", summary.run_id);

    loop {
        match state.tag() {
            Some(tag) => {
                summary.state = tag;
                summary.updated_at = Utc::now();
            }
            None => break,
        }
        if let Err(e) = persist(&paths, &summary) {
            let stage = state.stage();
            return abort_on_persist_failure(&paths, summary, stage, e);
        }
        state = advance(ctx, &paths, &mut summary, &mut resume, state).await;
        if let PipelineState::Finished(outcome) = state {
            summary.finish(outcome);
        }
    }

    if let Err(e) = persist(&paths, &summary) {
        return abort_on_persist_failure(&paths, summary, None, e);
    }

    eprintln!(
        "[pipeline] {rule}: {}",
        summary.outcome.map(|o| o.as_str()).unwrap_or("unknown")
    );
    summary
}

fn persist(paths: &RunPaths, summary: &RunSummary) -> Result<(), ArtifactError> {
    write_json(&paths.summary, summary)
}

fn abort_on_persist_failure(
    paths: &RunPaths,
    mut summary: RunSummary,
    stage: Option<Stage>,
    err: ArtifactError,
) -> RunSummary {
    tracing::error!(error = %err, rule = %summary.rule, "failed to persist run summary");
    summary.mark_pipeline_error(stage, format!("failed to persist summary: {err}"));
    if let Err(e) = persist(paths, &summary) {
        tracing::error!(error = %e, rule = %summary.rule, "summary could not be written");
    }
    summary
}

/// One transition. Side effects: stage detail files and summary fields.
///
/// `resume` starts at the configured value and drops to `false` as soon as
/// one stage runs fresh, so no later checkpoint outlives its inputs.
async fn advance(
    ctx: &RunContext,
    paths: &RunPaths,
    summary: &mut RunSummary,
    resume: &mut bool,
    state: PipelineState,
) -> PipelineState {
    let gateway = &*ctx.gateway;
    let cfg = &*ctx.config;
    let job = Some(summary.run_id);

    match state {
        PipelineState::Generating => {
            let result = match reuse::<Corpus>(resume, &paths.corpus, |_| true) {
                Some(corpus) => Ok(corpus),
                None => generate_corpus(gateway, cfg, &summary.rule, job, &paths.corpus_debug())
                    .await
                    .and_then(|c| write_json(&paths.corpus, &c).map(|_| c).map_err(Into::into)),
            };
            match result {
                Ok(corpus) => {
                    summary.files.corpus = Some(paths.corpus.clone());
                    summary.corpus_stats = Some(corpus.stats);
                    summary.format_violations = corpus.format_violations.len();
                    eprintln!(
                        "[generate] {}: {} examples ({} true, {} false), {} format warnings",
                        summary.rule,
                        corpus.stats.total,
                        corpus.stats.true_count,
                        corpus.stats.false_count,
                        corpus.format_violations.len()
                    );
                    PipelineState::Classifying { corpus }
                }
                Err(e) => fail(summary, Stage::Generate, e),
            }
        }

        PipelineState::Classifying { corpus } => {
            let few_shot = corpus.few_shot_split().fingerprint();
            let result = match reuse::<ClassificationReport>(resume, &paths.classification, |r| {
                r.few_shot_fingerprint == few_shot
            }) {
                Some(report) => Ok(report),
                None => classify_corpus(gateway, cfg, &corpus, ctx.limiter.clone(), job)
                    .await
                    .and_then(|r| {
                        write_json(&paths.classification, &r)
                            .map(|_| r)
                            .map_err(Into::into)
                    }),
            };
            match result {
                Ok(report) => {
                    summary.files.classification = Some(paths.classification.clone());
                    summary.accuracy = Some(report.accuracy);
                    summary.passed_classification = Some(report.passed);
                    summary.few_shot_fingerprint = Some(report.few_shot_fingerprint.clone());
                    if report.passed {
                        PipelineState::Articulating { corpus }
                    } else {
                        PipelineState::Finished(Outcome::ClassificationFailed)
                    }
                }
                Err(e) => fail(summary, Stage::Classify, e),
            }
        }

        PipelineState::Articulating { corpus } => {
            let few_shot = corpus.few_shot_split().fingerprint();
            let result = match reuse::<Articulation>(resume, &paths.articulation, |a| {
                a.few_shot_fingerprint == few_shot
            }) {
                Some(a) => Ok(a),
                None => articulate_rule(gateway, cfg, &corpus, job)
                    .await
                    .and_then(|a| {
                        write_json(&paths.articulation, &a)
                            .map(|_| a)
                            .map_err(Into::into)
                    }),
            };
            match result {
                Ok(articulation) => {
                    if summary
                        .few_shot_fingerprint
                        .as_deref()
                        .is_some_and(|fp| fp != articulation.few_shot_fingerprint)
                    {
                        tracing::warn!(
                            rule = %summary.rule,
                            "articulation few-shot block differs from classification"
                        );
                    }
                    summary.files.articulation = Some(paths.articulation.clone());
                    summary.articulated_rule = Some(articulation.effective_rule().to_string());
                    PipelineState::Comparing {
                        corpus,
                        articulation,
                    }
                }
                Err(e) => fail(summary, Stage::Articulate, e),
            }
        }

        PipelineState::Comparing {
            corpus,
            articulation,
        } => {
            let result = match reuse::<Judgment>(resume, &paths.judgment, |j| {
                j.actual_rule == corpus.rule_description
                    && j.articulated_rule == articulation.effective_rule()
            }) {
                Some(j) => Ok(j),
                None => judge_articulation(
                    gateway,
                    cfg,
                    &corpus.rule_description,
                    articulation.effective_rule(),
                    job,
                )
                .await
                .and_then(|j| write_json(&paths.judgment, &j).map(|_| j).map_err(Into::into)),
            };
            match result {
                Ok(judgment) => {
                    let verdict = judgment.verdict();
                    summary.files.judgment = Some(paths.judgment.clone());
                    summary.verdict = Some(verdict);
                    summary.judgment_match = verdict.as_match();
                    match verdict {
                        Verdict::Match => PipelineState::Finished(Outcome::ComparisonMatch),
                        Verdict::Indeterminate => {
                            PipelineState::Finished(Outcome::ComparisonIndeterminate)
                        }
                        Verdict::NoMatch => PipelineState::CheckingConsistency {
                            corpus,
                            articulation,
                        },
                    }
                }
                Err(e) => fail(summary, Stage::Judge, e),
            }
        }

        PipelineState::CheckingConsistency {
            corpus,
            articulation,
        } => {
            let debug_path = debug_path_for(&paths.consistency);
            let training = corpus.training_split().fingerprint();
            let result = match reuse::<ConsistencyReport>(resume, &paths.consistency, |r| {
                r.training_fingerprint == training
                    && r.articulation == articulation.effective_rule()
            }) {
                Some(r) => Ok(r),
                None => check_consistency(
                    gateway,
                    cfg,
                    &corpus,
                    articulation.effective_rule(),
                    job,
                    &debug_path,
                )
                .await
                .and_then(|r| {
                    write_json(&paths.consistency, &r)
                        .map(|_| r)
                        .map_err(Into::into)
                }),
            };
            match result {
                Ok(report) => {
                    summary.files.consistency = Some(paths.consistency.clone());
                    summary.training_matches = Some(report.matches);
                    summary.mismatch_count = Some(report.mismatch_count);
                    summary.is_genuine_failure = report.is_genuine_failure;
                    if report.is_genuine_failure {
                        PipelineState::Finished(Outcome::ComparisonNomatchGenuine)
                    } else {
                        PipelineState::Finished(Outcome::ComparisonNomatchSpurious)
                    }
                }
                Err(e) => fail(summary, Stage::Consistency, e),
            }
        }

        PipelineState::Finished(outcome) => PipelineState::Finished(outcome),
    }
}

fn fail(summary: &mut RunSummary, stage: Stage, err: StageError) -> PipelineState {
    tracing::warn!(rule = %summary.rule, stage = stage.as_str(), error = %err, "stage failed");
    eprintln!("[{stage}] {}: FAILED: {err}", summary.rule);
    summary.record_failure(Some(stage), &err);
    PipelineState::Finished(Outcome::for_stage_failure(stage, &err))
}

/// With resume enabled, a stage output already on disk is reused if
/// `current` accepts it as derived from this run's inputs. Anything else
/// (missing, unreadable, stale) is re-elicited and turns resume off for the
/// remaining stages.
fn reuse<T: serde::de::DeserializeOwned>(
    resume: &mut bool,
    path: &std::path::Path,
    current: impl FnOnce(&T) -> bool,
) -> Option<T> {
    if !*resume {
        return None;
    }
    let reused = match read_json_if_exists::<T>(path) {
        Ok(Some(v)) if current(&v) => {
            eprintln!("[pipeline] reusing {}", path.display());
            Some(v)
        }
        Ok(Some(_)) => {
            tracing::warn!(path = %path.display(), "checkpoint is stale for the current corpus");
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "ignoring unreadable checkpoint");
            None
        }
    };
    if reused.is_none() {
        *resume = false;
    }
    reused
}

// =============================================================================
// Batch
// =============================================================================

/// Fan-in record for a whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub generated_at: DateTime<Utc>,
    pub total_rules: usize,
    pub outcome_counts: BTreeMap<Outcome, usize>,
    pub passed_classification: Vec<String>,
    pub failed_classification: Vec<String>,
    pub comparison_indeterminate: Vec<String>,
    pub genuine_failures: Vec<String>,
    pub errors: Vec<String>,
    pub runs: Vec<BatchEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub rule: String,
    pub rule_name: String,
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub passed_classification: Option<bool>,
    #[serde(default)]
    pub is_genuine_failure: bool,
    pub summary_path: PathBuf,
}

impl BatchEntry {
    /// One console line: accuracy, outcome, genuine flag.
    pub fn describe(&self) -> String {
        let accuracy = self
            .accuracy
            .map(|a| format!("{a:.1}%"))
            .unwrap_or_else(|| "n/a".to_string());
        let outcome = self.outcome.map(|o| o.as_str()).unwrap_or("unknown");
        let mut line = format!("{}: accuracy {accuracy}, {outcome}", self.rule);
        if self.is_genuine_failure {
            line.push_str(" [GENUINE FAILURE]");
        }
        line
    }
}

impl BatchSummary {
    pub fn from_runs(runs: &[RunSummary], output_dir: &std::path::Path) -> Self {
        let mut outcome_counts = BTreeMap::new();
        let mut passed = Vec::new();
        let mut failed = Vec::new();
        let mut indeterminate = Vec::new();
        let mut genuine = Vec::new();
        let mut errors = Vec::new();

        for run in runs {
            if let Some(o) = run.outcome {
                *outcome_counts.entry(o).or_insert(0) += 1;
            }
            match run.passed_classification {
                Some(true) => passed.push(run.rule.clone()),
                Some(false) => failed.push(run.rule.clone()),
                None => {}
            }
            if run.outcome == Some(Outcome::ComparisonIndeterminate) {
                indeterminate.push(run.rule.clone());
            }
            if run.is_genuine_failure {
                genuine.push(run.rule.clone());
            }
            if run.status == RunStatus::Error || run.status == RunStatus::GenerationFailed {
                errors.push(run.rule.clone());
            }
        }

        Self {
            generated_at: Utc::now(),
            total_rules: runs.len(),
            outcome_counts,
            passed_classification: passed,
            failed_classification: failed,
            comparison_indeterminate: indeterminate,
            genuine_failures: genuine,
            errors,
            runs: runs
                .iter()
                .map(|r| BatchEntry {
                    rule: r.rule.clone(),
                    rule_name: r.rule_name.clone(),
                    outcome: r.outcome,
                    accuracy: r.accuracy,
                    passed_classification: r.passed_classification,
                    is_genuine_failure: r.is_genuine_failure,
                    summary_path: RunPaths::new(output_dir, &r.rule_name).summary,
                })
                .collect(),
        }
    }

    pub fn print(&self) {
        eprintln!("[pipeline] batch complete: {} rules", self.total_rules);
        for (outcome, count) in &self.outcome_counts {
            eprintln!("[pipeline]   {outcome}: {count}");
        }
        eprintln!(
            "[pipeline] passed classification ({}):",
            self.passed_classification.len()
        );
        for entry in self
            .runs
            .iter()
            .filter(|e| e.passed_classification == Some(true))
        {
            eprintln!("[pipeline]   + {}", entry.describe());
        }
        eprintln!(
            "[pipeline] failed classification ({}):",
            self.failed_classification.len()
        );
        for entry in self
            .runs
            .iter()
            .filter(|e| e.passed_classification == Some(false))
        {
            eprintln!("[pipeline]   - {}", entry.describe());
        }
        if !self.comparison_indeterminate.is_empty() {
            eprintln!(
                "[pipeline] judge indeterminate ({}):",
                self.comparison_indeterminate.len()
            );
            for rule in &self.comparison_indeterminate {
                eprintln!("[pipeline]   ? {rule}");
            }
        }
    }
}

/// Run every rule concurrently, one task per rule. A task that panics is
/// recorded as `pipeline_error` for its rule only. Results are returned in
/// rule-list order.
pub async fn run_batch(ctx: &RunContext, rules: &[String]) -> Vec<RunSummary> {
    let named = assign_rule_names(rules);
    eprintln!("[pipeline] running {} rules in parallel", named.len());

    let mut handles = Vec::with_capacity(named.len());
    for (rule, name) in named {
        let task_ctx = ctx.clone();
        let task_rule = rule.clone();
        let task_name = name.clone();
        let handle = tokio::spawn(async move { run_rule(&task_ctx, &task_rule, &task_name).await });
        handles.push((rule, name, handle));
    }

    let mut summaries = Vec::with_capacity(handles.len());
    for (rule, name, handle) in handles {
        match handle.await {
            Ok(summary) => summaries.push(summary),
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    "rule task panicked".to_string()
                } else {
                    format!("rule task did not complete: {join_err}")
                };
                eprintln!("[pipeline] {rule}: FAILED: {message}");
                summaries.push(recover_crashed(ctx, &rule, &name, message));
            }
        }
    }
    summaries
}

/// Load whatever the crashed task last persisted and close it out as a
/// pipeline error.
fn recover_crashed(ctx: &RunContext, rule: &str, rule_name: &str, message: String) -> RunSummary {
    let paths = RunPaths::new(&ctx.config.output_dir, rule_name);
    let mut summary = read_json::<RunSummary>(&paths.summary)
        .ok()
        .filter(|s| s.rule == rule)
        .unwrap_or_else(|| RunSummary::new(rule, rule_name));
    let stage = match summary.state {
        StateTag::Generating => Some(Stage::Generate),
        StateTag::Classifying => Some(Stage::Classify),
        StateTag::Articulating => Some(Stage::Articulate),
        StateTag::Comparing => Some(Stage::Judge),
        StateTag::CheckingConsistency => Some(Stage::Consistency),
        _ => None,
    };
    summary.mark_pipeline_error(stage, message);
    if let Err(e) = persist(&paths, &summary) {
        tracing::error!(error = %e, rule, "failed to persist crashed run summary");
    }
    summary
}

/// Write the batch summary next to the per-rule summaries.
pub fn write_batch_summary(
    output_dir: &std::path::Path,
    batch: &BatchSummary,
) -> Result<PathBuf, ArtifactError> {
    let path = output_dir.join(BATCH_RESULTS_FILE);
    write_json(&path, batch)?;
    Ok(path)
}

/// Genuine-failure report over every summary in `output_dir`, written into
/// the same directory. Runs after the batch; a failure is logged and
/// returned as `None` so the batch result stands.
pub fn report_batch(output_dir: &std::path::Path) -> Option<(PathBuf, PathBuf)> {
    let written = crate::report::collect_genuine_failures(output_dir)
        .and_then(|report| crate::report::write_report(output_dir, &report));
    match written {
        Ok(paths) => {
            eprintln!("[report] wrote {}", paths.1.display());
            Some(paths)
        }
        Err(e) => {
            tracing::error!(error = %e, dir = %output_dir.display(), "genuine-failure report failed");
            eprintln!("[report] FAILED: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_status_mapping() {
        assert_eq!(Outcome::GenerationFailed.status(), RunStatus::GenerationFailed);
        assert_eq!(
            Outcome::ClassificationFailed.status(),
            RunStatus::ClassificationFailed
        );
        assert_eq!(Outcome::ComparisonMatch.status(), RunStatus::Complete);
        assert_eq!(Outcome::ComparisonIndeterminate.status(), RunStatus::Complete);
        assert_eq!(Outcome::ArticulationFailed.status(), RunStatus::Error);
        assert_eq!(Outcome::PipelineError.status(), RunStatus::Error);
    }

    #[test]
    fn terminal_states() {
        assert_eq!(
            Outcome::ClassificationFailed.terminal_state(),
            StateTag::StoppedLowAccuracy
        );
        assert_eq!(Outcome::ComparisonMatch.terminal_state(), StateTag::StoppedMatch);
        assert_eq!(
            Outcome::ComparisonNomatchGenuine.terminal_state(),
            StateTag::Done
        );
        assert_eq!(Outcome::ConsistencyFailed.terminal_state(), StateTag::Error);
    }

    #[test]
    fn artifact_failures_are_pipeline_errors() {
        let err = StageError::Artifact(ArtifactError::Io {
            path: PathBuf::from("x"),
            source: std::io::Error::other("disk full"),
        });
        assert_eq!(
            Outcome::for_stage_failure(Stage::Articulate, &err),
            Outcome::PipelineError
        );
        assert_eq!(
            Outcome::for_stage_failure(Stage::Judge, &StageError::EmptyResponse),
            Outcome::ComparisonFailed
        );
    }

    #[test]
    fn outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(Outcome::ComparisonNomatchSpurious).unwrap(),
            "comparison_nomatch_spurious"
        );
        assert_eq!(
            serde_json::to_value(StateTag::CheckingConsistency).unwrap(),
            "checking_consistency"
        );
    }

    #[test]
    fn batch_summary_groups_rules() {
        let mut a = RunSummary::new("contains a digit", "contains_a_digit");
        a.passed_classification = Some(true);
        a.finish(Outcome::ComparisonMatch);
        let mut b = RunSummary::new("repeats frog", "repeats_frog");
        b.passed_classification = Some(true);
        b.is_genuine_failure = true;
        b.finish(Outcome::ComparisonNomatchGenuine);
        let mut c = RunSummary::new("hard", "hard");
        c.passed_classification = Some(false);
        c.finish(Outcome::ClassificationFailed);
        let mut d = RunSummary::new("odd", "odd");
        d.passed_classification = Some(true);
        d.finish(Outcome::ComparisonIndeterminate);

        let batch = BatchSummary::from_runs(&[a, b, c, d], std::path::Path::new("results"));
        assert_eq!(batch.total_rules, 4);
        assert_eq!(batch.passed_classification.len(), 3);
        assert_eq!(batch.failed_classification, vec!["hard"]);
        assert_eq!(batch.genuine_failures, vec!["repeats frog"]);
        assert_eq!(batch.comparison_indeterminate, vec!["odd"]);
        assert_eq!(batch.outcome_counts[&Outcome::ComparisonIndeterminate], 1);
        assert!(batch.errors.is_empty());
        assert_eq!(
            batch.runs[0].summary_path,
            PathBuf::from("results/contains_a_digit_summary.json")
        );
    }

    #[test]
    fn batch_entry_line_shows_accuracy_and_outcome() {
        let mut run = RunSummary::new("repeats frog", "repeats_frog");
        run.accuracy = Some(96.875);
        run.passed_classification = Some(true);
        run.is_genuine_failure = true;
        run.finish(Outcome::ComparisonNomatchGenuine);
        let mut hard = RunSummary::new("hard", "hard");
        hard.finish(Outcome::GenerationFailed);

        let batch = BatchSummary::from_runs(&[run, hard], std::path::Path::new("results"));
        assert_eq!(
            batch.runs[0].describe(),
            "repeats frog: accuracy 96.9%, comparison_nomatch_genuine [GENUINE FAILURE]"
        );
        assert_eq!(batch.runs[1].describe(), "hard: accuracy n/a, generation_failed");
    }
}
