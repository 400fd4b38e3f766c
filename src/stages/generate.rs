//! Example corpus generation: one elicitation per rule for a balanced
//! 48/48 labeled corpus.

use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

use super::{Stage, StageError};
use crate::artifacts::write_text;
use crate::config::PipelineConfig;
use crate::corpus::{Corpus, Example, TARGET_PER_LABEL};
use crate::extract::{parse_lenient, JsonShape};
use crate::gateway::{ChatGateway, ChatModel, ChatRequest, ReasoningEffort};
use crate::prompts::GENERATE;

/// Accept either a bare array or an object wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum GeneratedPayload {
    List(Vec<Example>),
    Wrapped {
        #[serde(alias = "generated_examples")]
        examples: Vec<Example>,
    },
}

impl GeneratedPayload {
    fn into_examples(self) -> Vec<Example> {
        match self {
            GeneratedPayload::List(v) | GeneratedPayload::Wrapped { examples: v } => v,
        }
    }
}

/// Strip an optional leading `Rule:` (any case) from a rule line.
pub fn parse_rule_input(input: &str) -> Result<String, StageError> {
    let trimmed = input.trim();
    let description = match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("rule:") => trimmed[5..].trim(),
        _ => trimmed,
    };
    if description.is_empty() {
        return Err(StageError::InvalidInput("no rule description provided".into()));
    }
    Ok(description.to_string())
}

/// Generate the labeled corpus for `rule`.
///
/// An unparsable payload is written verbatim to `debug_path` before the
/// parse error is returned. Count or format deviations are recorded on the
/// corpus and logged, never raised.
pub async fn generate_corpus<G: ChatGateway + ?Sized>(
    gateway: &G,
    cfg: &PipelineConfig,
    rule: &str,
    job_id: Option<Uuid>,
    debug_path: &Path,
) -> Result<Corpus, StageError> {
    let description = parse_rule_input(rule)?;
    let per_label = TARGET_PER_LABEL.to_string();
    let total = (TARGET_PER_LABEL * 2).to_string();
    let prompt = GENERATE.render(&[
        ("rule_description", description.as_str()),
        ("per_label", per_label.as_str()),
        ("total", total.as_str()),
    ]);

    let req = ChatRequest::new(
        ChatModel::openrouter(&cfg.models.generator),
        prompt.to_messages(),
        Stage::Generate.attribution(job_id),
    )
    .reasoning(ReasoningEffort::High)
    .max_tokens(cfg.budgets.generator);

    let resp = gateway.chat(req).await?;

    let examples = match parse_lenient::<GeneratedPayload>(&resp.content, JsonShape::Array) {
        Ok(payload) => payload.into_examples(),
        Err(e) => {
            write_text(debug_path, &resp.content)?;
            tracing::warn!(
                error = %e,
                debug_path = %debug_path.display(),
                "generator returned unparsable payload"
            );
            return Err(StageError::Parse {
                message: e.to_string(),
                raw_path: Some(debug_path.to_path_buf()),
            });
        }
    };

    let examples = examples
        .into_iter()
        .map(|ex| Example::new(ex.text.trim(), ex.label))
        .collect();
    let corpus = Corpus::new(description, examples).with_model(&cfg.models.generator);

    for violation in &corpus.format_violations {
        tracing::warn!(rule = %corpus.rule_description, "{violation}");
    }

    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_prefix_is_stripped() {
        assert_eq!(parse_rule_input("Rule: Contains a digit").unwrap(), "Contains a digit");
        assert_eq!(parse_rule_input("  rule:repeats frog ").unwrap(), "repeats frog");
        assert_eq!(parse_rule_input("Contains a digit").unwrap(), "Contains a digit");
    }

    #[test]
    fn rule_word_without_colon_is_kept() {
        assert_eq!(parse_rule_input("Rules are fun").unwrap(), "Rules are fun");
    }

    #[test]
    fn empty_rule_is_rejected() {
        assert!(matches!(parse_rule_input("Rule:   "), Err(StageError::InvalidInput(_))));
        assert!(matches!(parse_rule_input(""), Err(StageError::InvalidInput(_))));
    }

    #[test]
    fn payload_accepts_wrapped_object() {
        let raw = r#"{"generated_examples": [{"text": "a b c d e", "label": true}]}"#;
        let v: GeneratedPayload = parse_lenient(raw, JsonShape::Array).unwrap();
        assert_eq!(v.into_examples().len(), 1);
    }
}
