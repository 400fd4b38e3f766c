//! Rule-match judge: does the articulated rule select the same inputs as
//! the ground-truth rule?

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{truncate_chars, Stage, StageError};
use crate::config::PipelineConfig;
use crate::extract::{parse_lenient, JsonShape};
use crate::gateway::{ChatGateway, ChatModel, ChatRequest};
use crate::prompts::JUDGE;

/// Raw judge output kept on indeterminate verdicts.
const RAW_RESPONSE_LIMIT: usize = 500;

/// Judge outcome. `Indeterminate` means the reply could not be read and is
/// never treated as either of the other two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Match,
    NoMatch,
    Indeterminate,
}

impl Verdict {
    pub fn as_match(&self) -> Option<bool> {
        match self {
            Verdict::Match => Some(true),
            Verdict::NoMatch => Some(false),
            Verdict::Indeterminate => None,
        }
    }
}

/// Persisted judge stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub actual_rule: String,
    pub articulated_rule: String,
    pub model: String,
    pub judgment_match: Option<bool>,
    pub judgment_explanation: String,
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl Judgment {
    pub fn verdict(&self) -> Verdict {
        match (self.error, self.judgment_match) {
            (false, Some(true)) => Verdict::Match,
            (false, Some(false)) => Verdict::NoMatch,
            _ => Verdict::Indeterminate,
        }
    }
}

#[derive(Deserialize)]
struct JudgeReply {
    #[serde(rename = "match", default)]
    is_match: Option<serde_json::Value>,
    #[serde(default)]
    explanation: Option<String>,
}

/// Booleans, or the strings "true"/"false"/"yes"/"no".
fn read_match(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Judge reply as read from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub judgment_match: Option<bool>,
    pub explanation: String,
    pub error: bool,
    pub raw_response: Option<String>,
}

impl ParsedReply {
    fn indeterminate(explanation: String, raw_response: Option<String>) -> Self {
        Self {
            judgment_match: None,
            explanation,
            error: true,
            raw_response,
        }
    }
}

/// Interpret judge output. Never fails: anything unreadable becomes an
/// indeterminate reply carrying the first 500 chars of the text.
pub fn parse_judgment(raw: &str) -> ParsedReply {
    let text = raw.trim();
    if text.is_empty() {
        return ParsedReply::indeterminate("Empty response from model".into(), None);
    }
    let kept = || Some(truncate_chars(text, RAW_RESPONSE_LIMIT));

    match parse_lenient::<JudgeReply>(text, JsonShape::Object) {
        Ok(reply) => match reply.is_match.as_ref().and_then(read_match) {
            Some(m) => ParsedReply {
                judgment_match: Some(m),
                explanation: reply.explanation.unwrap_or_default(),
                error: false,
                raw_response: None,
            },
            None => ParsedReply::indeterminate(
                "judge reply has no boolean \"match\" field".into(),
                kept(),
            ),
        },
        Err(e) => ParsedReply::indeterminate(format!("JSON parse error: {e}"), kept()),
    }
}

/// Compare `articulated_rule` to `actual_rule`. Transport failures are
/// stage errors; unreadable replies are indeterminate judgments.
pub async fn judge_articulation<G: ChatGateway + ?Sized>(
    gateway: &G,
    cfg: &PipelineConfig,
    actual_rule: &str,
    articulated_rule: &str,
    job_id: Option<Uuid>,
) -> Result<Judgment, StageError> {
    let prompt = JUDGE.render(&[
        ("actual_rule", actual_rule),
        ("articulated_rule", articulated_rule),
    ]);

    let req = ChatRequest::new(
        ChatModel::openrouter(&cfg.models.judge),
        prompt.to_messages(),
        Stage::Judge.attribution(job_id),
    )
    .max_tokens(cfg.budgets.judge)
    .json();

    let resp = gateway.chat(req).await?;
    let reply = parse_judgment(&resp.content);

    let judgment = Judgment {
        actual_rule: actual_rule.to_string(),
        articulated_rule: articulated_rule.to_string(),
        model: cfg.models.judge.clone(),
        judgment_match: reply.judgment_match,
        judgment_explanation: reply.explanation,
        error: reply.error,
        raw_response: reply.raw_response,
    };

    match judgment.verdict() {
        Verdict::Match => eprintln!("[judge] {actual_rule}: MATCH"),
        Verdict::NoMatch => eprintln!("[judge] {actual_rule}: NO MATCH"),
        Verdict::Indeterminate => {
            tracing::warn!(
                rule = %actual_rule,
                explanation = %judgment.judgment_explanation,
                "judge reply unreadable"
            );
            eprintln!("[judge] {actual_rule}: INDETERMINATE");
        }
    }

    Ok(judgment)
}
