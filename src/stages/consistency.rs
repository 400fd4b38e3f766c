//! Training-consistency check: does the articulated rule reproduce the
//! labels of the exact split it was derived from?
//!
//! Zero disagreements means the training sample could not tell the stated
//! rule from the real one (spurious failure). Any disagreement means the
//! stated rule is not the rule the model applied (genuine failure).

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::{Stage, StageError};
use crate::artifacts::write_text;
use crate::config::PipelineConfig;
use crate::corpus::Corpus;
use crate::extract::{parse_lenient, JsonShape};
use crate::gateway::{ChatGateway, ChatModel, ChatRequest, ReasoningEffort};
use crate::prompts::CONSISTENCY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub example: String,
    #[serde(deserialize_with = "label_string")]
    pub training_label: String,
    #[serde(deserialize_with = "label_string")]
    pub articulation_says: String,
    #[serde(default)]
    pub reason: String,
}

/// Accept `true`, `"TRUE"`, `"True"` etc. and store lowercase text.
fn label_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    Ok(match v {
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::String(s) => s.trim().to_lowercase(),
        other => other.to_string(),
    })
}

#[derive(Deserialize)]
struct ConsistencyReply {
    matches: usize,
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    mismatches: Vec<Mismatch>,
}

/// Persisted consistency stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub rule_description: String,
    pub articulation: String,
    pub model: String,
    pub training_fingerprint: String,
    pub matches: usize,
    pub total: usize,
    pub mismatches: Vec<Mismatch>,
    pub mismatch_count: usize,
    pub is_genuine_failure: bool,
}

/// Have an independent evaluator apply `articulation` to the corpus'
/// training split. An unreadable reply is written to `debug_path` and
/// returned as a parse error.
pub async fn check_consistency<G: ChatGateway + ?Sized>(
    gateway: &G,
    cfg: &PipelineConfig,
    corpus: &Corpus,
    articulation: &str,
    job_id: Option<Uuid>,
    debug_path: &Path,
) -> Result<ConsistencyReport, StageError> {
    let training = corpus.training_split();
    let total = training.len();
    let total_s = total.to_string();
    let true_s = training.trues.len().to_string();
    let false_s = training.falses.len().to_string();
    let examples = training.render_numbered();

    let prompt = CONSISTENCY.render(&[
        ("articulated_rule", articulation),
        ("examples", examples.as_str()),
        ("total", total_s.as_str()),
        ("true_count", true_s.as_str()),
        ("false_count", false_s.as_str()),
    ]);

    let req = ChatRequest::new(
        ChatModel::openrouter(&cfg.models.consistency),
        prompt.to_messages(),
        Stage::Consistency.attribution(job_id),
    )
    .reasoning(ReasoningEffort::High)
    .max_tokens(cfg.budgets.consistency);

    let resp = gateway.chat(req).await?;
    if resp.content.trim().is_empty() {
        return Err(StageError::EmptyResponse);
    }

    let reply = match parse_lenient::<ConsistencyReply>(&resp.content, JsonShape::Object) {
        Ok(reply) => reply,
        Err(e) => {
            write_text(debug_path, &resp.content)?;
            tracing::warn!(
                error = %e,
                debug_path = %debug_path.display(),
                "consistency checker returned unparsable payload"
            );
            return Err(StageError::Parse {
                message: e.to_string(),
                raw_path: Some(debug_path.to_path_buf()),
            });
        }
    };

    if let Some(reported) = reply.total.filter(|t| *t != total) {
        tracing::warn!(reported, expected = total, "consistency checker reported a different total");
    }
    if reply.mismatches.is_empty() && reply.matches < total {
        tracing::warn!(
            matches = reply.matches,
            total,
            "consistency checker reported fewer matches but listed no mismatches"
        );
    }

    let mismatch_count = reply.mismatches.len();
    let is_genuine_failure = mismatch_count > 0;
    eprintln!(
        "[consistency] {}: {}/{} consistent, {} mismatches ({})",
        corpus.rule_description,
        reply.matches,
        total,
        mismatch_count,
        if is_genuine_failure { "genuine" } else { "spurious" }
    );

    Ok(ConsistencyReport {
        rule_description: corpus.rule_description.clone(),
        articulation: articulation.to_string(),
        model: cfg.models.consistency.clone(),
        training_fingerprint: training.fingerprint(),
        matches: reply.matches,
        total,
        mismatches: reply.mismatches,
        mismatch_count,
        is_genuine_failure,
    })
}
