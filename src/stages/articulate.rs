//! Rule articulation from the same few-shot split the classifier saw.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Stage, StageError};
use crate::config::PipelineConfig;
use crate::corpus::Corpus;
use crate::gateway::{ChatGateway, ChatModel, ChatRequest};
use crate::prompts::{ARTICULATE, FINAL_RULE_MARKER};

/// Persisted articulation stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Articulation {
    pub rule_description: String,
    pub model: String,
    pub few_shot_count: usize,
    pub few_shot_fingerprint: String,
    pub model_articulation: String,
    /// One-sentence rule after the marker, if the marker was present.
    pub final_rule: Option<String>,
}

impl Articulation {
    /// The text downstream stages compare: the final rule when extracted,
    /// otherwise the whole articulation.
    pub fn effective_rule(&self) -> &str {
        self.final_rule
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.model_articulation)
    }
}

/// First line after the first occurrence of the marker, trimmed.
pub fn extract_final_rule(text: &str) -> Option<String> {
    let (_, after) = text.split_once(FINAL_RULE_MARKER)?;
    let line = after.trim().lines().next().unwrap_or("").trim();
    Some(line.to_string())
}

/// Ask the articulator to state the rule behind the corpus' few-shot split.
/// Decoding is pinned (temperature 0) so reruns are comparable.
pub async fn articulate_rule<G: ChatGateway + ?Sized>(
    gateway: &G,
    cfg: &PipelineConfig,
    corpus: &Corpus,
    job_id: Option<Uuid>,
) -> Result<Articulation, StageError> {
    // Recomputed from the corpus, not handed over from classification.
    let few_shot = corpus.few_shot_split();
    let few_shot_text = few_shot.render_few_shot();
    let prompt = ARTICULATE.render(&[("few_shot_examples", few_shot_text.as_str())]);

    let mut req = ChatRequest::new(
        ChatModel::openrouter(&cfg.models.articulator),
        prompt.to_messages(),
        Stage::Articulate.attribution(job_id),
    )
    .temperature(0.0)
    .max_tokens(cfg.budgets.articulator);
    if let Some(effort) = cfg.articulator_reasoning {
        req = req.reasoning(effort);
    }

    let resp = gateway.chat(req).await?;
    let text = resp.content.trim().to_string();
    if text.is_empty() {
        return Err(StageError::EmptyResponse);
    }

    let final_rule = extract_final_rule(&text);
    match &final_rule {
        Some(rule) => eprintln!("[articulate] {}: {}", corpus.rule_description, rule),
        None => {
            tracing::warn!(rule = %corpus.rule_description, "articulation has no final-rule marker");
            eprintln!(
                "[articulate] {}: no final-rule marker, using full text",
                corpus.rule_description
            );
        }
    }

    Ok(Articulation {
        rule_description: corpus.rule_description.clone(),
        model: cfg.models.articulator.clone(),
        few_shot_count: few_shot.len(),
        few_shot_fingerprint: few_shot.fingerprint(),
        model_articulation: text,
        final_rule,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_line_after_marker_keeping_punctuation() {
        let text = "All True inputs begin with lizard.\n\n**FINAL RULE:** Starts with the word lizard.\nExtra notes";
        assert_eq!(
            extract_final_rule(text).as_deref(),
            Some("Starts with the word lizard.")
        );
    }

    #[test]
    fn marker_on_its_own_line_takes_next_line() {
        let text = "reasoning\n**FINAL RULE:**\n  Contains a digit.  \n";
        assert_eq!(extract_final_rule(text).as_deref(), Some("Contains a digit."));
    }

    #[test]
    fn missing_marker_is_none() {
        assert_eq!(extract_final_rule("The rule is about frogs."), None);
    }

    #[test]
    fn effective_rule_falls_back_to_full_text() {
        let mut a = Articulation {
            rule_description: "r".into(),
            model: "m".into(),
            few_shot_count: 64,
            few_shot_fingerprint: String::new(),
            model_articulation: "full text".into(),
            final_rule: None,
        };
        assert_eq!(a.effective_rule(), "full text");
        a.final_rule = Some(String::new());
        assert_eq!(a.effective_rule(), "full text");
        a.final_rule = Some("Contains a digit.".into());
        assert_eq!(a.effective_rule(), "Contains a digit.");
    }
}
