//! Few-shot classification accuracy on the held-out test split.
//!
//! Every test item is an independent elicitation. Items run concurrently
//! under a limiter that may be shared across rule runs; results are put back
//! in test-split order by index, never by completion order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::{truncate_chars, Stage, StageError};
use crate::config::PipelineConfig;
use crate::corpus::{Corpus, Example};
use crate::gateway::{ChatGateway, ChatModel, ChatRequest};
use crate::prompts::CLASSIFY;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub input: String,
    pub true_label: bool,
    /// `None` when the reply contained neither label or the call failed.
    pub predicted_label: Option<bool>,
    pub correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ItemResult {
    fn predicted(example: &Example, predicted: bool) -> Self {
        Self {
            input: example.text.clone(),
            true_label: example.label,
            predicted_label: Some(predicted),
            correct: predicted == example.label,
            diagnostic: None,
        }
    }

    fn unparsable(example: &Example, diagnostic: impl Into<String>) -> Self {
        Self {
            input: example.text.clone(),
            true_label: example.label,
            predicted_label: None,
            correct: false,
            diagnostic: Some(diagnostic.into()),
        }
    }

    pub fn is_parsed(&self) -> bool {
        self.predicted_label.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub correct: usize,
    /// Parsed predictions only.
    pub total: usize,
    pub unparsable: usize,
    pub accuracy: f64,
}

/// Persisted classification stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub rule_description: String,
    pub model: String,
    pub few_shot_count: usize,
    pub few_shot_fingerprint: String,
    pub test_count: usize,
    pub correct: usize,
    pub total: usize,
    #[serde(default)]
    pub unparsable: usize,
    pub accuracy: f64,
    pub threshold: f64,
    pub passed: bool,
    pub results: Vec<ItemResult>,
}

// =============================================================================
// Scoring
// =============================================================================

/// Map a free-form reply to a label: exact `true`/`false` first, then a
/// substring search for `true`, then `false`.
pub fn parse_prediction(raw: &str) -> Option<bool> {
    let l = raw.trim().to_lowercase();
    match l.as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ if l.contains("true") => Some(true),
        _ if l.contains("false") => Some(false),
        _ => None,
    }
}

/// Accuracy over parsed predictions. Zero parsed predictions scores 0.0.
pub fn score(results: &[ItemResult]) -> Score {
    let total = results.iter().filter(|r| r.is_parsed()).count();
    let correct = results.iter().filter(|r| r.is_parsed() && r.correct).count();
    let accuracy = if total == 0 {
        0.0
    } else {
        100.0 * correct as f64 / total as f64
    };
    Score {
        correct,
        total,
        unparsable: results.len() - total,
        accuracy,
    }
}

/// Inclusive threshold check.
pub fn passes_threshold(accuracy: f64, threshold: f64) -> bool {
    accuracy >= threshold
}

// =============================================================================
// Stage
// =============================================================================

/// Classify every test-split item of `corpus`.
///
/// `limiter` bounds in-flight calls; pass the same semaphore to every rule
/// in a batch to cap total load on the service. A failed or panicking item
/// becomes an unparsable result and never affects its siblings.
pub async fn classify_corpus<G: ChatGateway + ?Sized>(
    gateway: &G,
    cfg: &PipelineConfig,
    corpus: &Corpus,
    limiter: Arc<Semaphore>,
    job_id: Option<Uuid>,
) -> Result<ClassificationReport, StageError> {
    let few_shot = corpus.few_shot_split();
    let few_shot_text = few_shot.render_few_shot();
    let test = corpus.test_split();
    let test_items: Vec<Example> = test.iter().cloned().collect();
    let test_count = test_items.len();

    eprintln!(
        "[classify] {}: {} test items (max {} in flight)",
        corpus.rule_description, test_count, cfg.classification_concurrency
    );

    let few_shot_ref = few_shot_text.as_str();
    // Collected eagerly so the stream owns concrete futures; a lazy map over
    // borrowed items is not `Send` inside a spawned rule task.
    let futures: Vec<_> = test_items
        .iter()
        .cloned()
        .enumerate()
        .map(|(idx, example)| {
            let limiter = limiter.clone();
            async move {
                let call = AssertUnwindSafe(classify_one(
                    gateway,
                    cfg,
                    few_shot_ref,
                    &example,
                    limiter,
                    job_id,
                ))
                .catch_unwind()
                .await;
                let result = match call {
                    Ok(result) => result,
                    Err(_) => ItemResult::unparsable(&example, "classification task panicked"),
                };
                (idx, result)
            }
        })
        .collect();

    let mut slots: Vec<Option<ItemResult>> = vec![None; test_count];
    let completed: Vec<(usize, ItemResult)> = stream::iter(futures)
        .buffer_unordered(cfg.classification_concurrency.max(1))
        .collect()
        .await;
    for (idx, result) in completed {
        slots[idx] = Some(result);
    }

    let results: Vec<ItemResult> = slots
        .into_iter()
        .zip(test_items.iter())
        .map(|(slot, ex)| slot.unwrap_or_else(|| ItemResult::unparsable(ex, "no result recorded")))
        .collect();

    let s = score(&results);
    if s.unparsable > 0 {
        tracing::warn!(
            rule = %corpus.rule_description,
            unparsable = s.unparsable,
            "predictions excluded from accuracy"
        );
    }

    let passed = passes_threshold(s.accuracy, cfg.accuracy_threshold);
    eprintln!(
        "[classify] {}: {}/{} correct ({:.1}%), {} unparsable, {}",
        corpus.rule_description,
        s.correct,
        s.total,
        s.accuracy,
        s.unparsable,
        if passed { "PASSED" } else { "FAILED" }
    );

    Ok(ClassificationReport {
        rule_description: corpus.rule_description.clone(),
        model: cfg.models.classifier.clone(),
        few_shot_count: few_shot.len(),
        few_shot_fingerprint: few_shot.fingerprint(),
        test_count,
        correct: s.correct,
        total: s.total,
        unparsable: s.unparsable,
        accuracy: s.accuracy,
        threshold: cfg.accuracy_threshold,
        passed,
        results,
    })
}

async fn classify_one<G: ChatGateway + ?Sized>(
    gateway: &G,
    cfg: &PipelineConfig,
    few_shot_text: &str,
    example: &Example,
    limiter: Arc<Semaphore>,
    job_id: Option<Uuid>,
) -> ItemResult {
    let _permit = match limiter.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return ItemResult::unparsable(example, "concurrency limiter closed"),
    };

    let prompt = CLASSIFY.render(&[
        ("few_shot_examples", few_shot_text),
        ("input", example.text.as_str()),
    ]);
    let req = ChatRequest::new(
        ChatModel::openrouter(&cfg.models.classifier),
        prompt.to_messages(),
        Stage::Classify.attribution(job_id),
    )
    .temperature(0.0)
    .max_tokens(cfg.budgets.classifier);

    match gateway.chat(req).await {
        Ok(resp) => match parse_prediction(&resp.content) {
            Some(label) => ItemResult::predicted(example, label),
            None => {
                let reply = truncate_chars(resp.content.trim(), 200);
                tracing::warn!(input = %example.text, reply = %reply, "unexpected prediction");
                ItemResult::unparsable(example, format!("unexpected reply: {reply}"))
            }
        },
        Err(e) => {
            tracing::warn!(input = %example.text, error = %e, "classification call failed");
            ItemResult::unparsable(example, format!("call failed: {e}"))
        }
    }
}
