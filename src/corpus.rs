//! Labeled example corpus and the splits derived from it.
//!
//! A corpus is generated once per rule and never mutated. Every split is a
//! pure function of the corpus, so the few-shot block shown to the
//! classifier, the articulator and the consistency checker is identical by
//! construction.

use serde::{Deserialize, Serialize};

/// Examples requested per label from the generator.
pub const TARGET_PER_LABEL: usize = 48;
/// Examples per label in the few-shot (= training) split.
pub const FEW_SHOT_PER_LABEL: usize = 32;
/// Exclusive end index, per label, of the test split.
pub const TEST_END_PER_LABEL: usize = 82;
/// Tokens in every example.
pub const TOKENS_PER_EXAMPLE: usize = 5;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub text: String,
    pub label: bool,
}

impl Example {
    pub fn new(text: impl Into<String>, label: bool) -> Self {
        Self {
            text: text.into(),
            label,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total: usize,
    #[serde(rename = "true")]
    pub true_count: usize,
    #[serde(rename = "false")]
    pub false_count: usize,
}

/// A deviation from the generation contract. Recorded and warned about,
/// never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormatViolation {
    #[error("expected {expected} {label} examples, got {actual}")]
    LabelCount {
        label: bool,
        expected: usize,
        actual: usize,
    },
    #[error("example {index} has {tokens} tokens: {text:?}")]
    TokenCount {
        index: usize,
        text: String,
        tokens: usize,
    },
    #[error("example {index} is not lowercase: {text:?}")]
    NotLowercase { index: usize, text: String },
    #[error("example {index} has token {token:?} that is neither a word nor a single digit")]
    BadToken { index: usize, token: String },
}

/// Persisted corpus for one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    pub rule_description: String,
    pub generated_examples: Vec<Example>,
    pub stats: CorpusStats,
    #[serde(default)]
    pub format_violations: Vec<FormatViolation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Corpus {
    /// Build a corpus, computing stats and format violations.
    pub fn new(rule_description: impl Into<String>, examples: Vec<Example>) -> Self {
        let stats = stats_of(&examples);
        let format_violations = validate(&examples);
        Self {
            rule_description: rule_description.into(),
            generated_examples: examples,
            stats,
            format_violations,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// True-labeled examples in generation order.
    pub fn trues(&self) -> impl Iterator<Item = &Example> {
        self.generated_examples.iter().filter(|e| e.label)
    }

    /// False-labeled examples in generation order.
    pub fn falses(&self) -> impl Iterator<Item = &Example> {
        self.generated_examples.iter().filter(|e| !e.label)
    }

    /// First 32 True followed by first 32 False.
    pub fn few_shot_split(&self) -> Split {
        self.window(0, FEW_SHOT_PER_LABEL)
    }

    /// The split the articulation was conditioned on. Always equal to
    /// [`Corpus::few_shot_split`].
    pub fn training_split(&self) -> Split {
        self.few_shot_split()
    }

    /// Items `[32, 82)` of each label, clamped to what exists.
    pub fn test_split(&self) -> Split {
        self.window(FEW_SHOT_PER_LABEL, TEST_END_PER_LABEL)
    }

    fn window(&self, start: usize, end: usize) -> Split {
        let take = end - start;
        Split {
            trues: self.trues().skip(start).take(take).cloned().collect(),
            falses: self.falses().skip(start).take(take).cloned().collect(),
        }
    }
}

/// A label-balanced view over a corpus. Iterates all True then all False.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub trues: Vec<Example>,
    pub falses: Vec<Example>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.trues.len() + self.falses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Example> {
        self.trues.iter().chain(self.falses.iter())
    }

    /// `Input: ...\nLabel: True\n` blocks joined by a blank line.
    pub fn render_few_shot(&self) -> String {
        self.iter()
            .map(|ex| format!("Input: {}\nLabel: {}\n", ex.text, label_word(ex.label)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `1. text → TRUE` lines, numbered from 1.
    pub fn render_numbered(&self) -> String {
        let mut out = String::new();
        for (i, ex) in self.iter().enumerate() {
            let label = if ex.label { "TRUE" } else { "FALSE" };
            out.push_str(&format!("{}. {} → {}\n", i + 1, ex.text, label));
        }
        out
    }

    /// blake3 of the rendered few-shot block. Equal fingerprints mean the
    /// model saw byte-identical context.
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.render_few_shot().as_bytes())
            .to_hex()
            .to_string()
    }
}

pub fn label_word(label: bool) -> &'static str {
    if label {
        "True"
    } else {
        "False"
    }
}

// =============================================================================
// Validation
// =============================================================================

pub fn stats_of(examples: &[Example]) -> CorpusStats {
    let true_count = examples.iter().filter(|e| e.label).count();
    CorpusStats {
        total: examples.len(),
        true_count,
        false_count: examples.len() - true_count,
    }
}

/// Check counts against the 48/48 target and every example against the
/// 5-token lowercase format.
pub fn validate(examples: &[Example]) -> Vec<FormatViolation> {
    let mut out = Vec::new();
    let stats = stats_of(examples);

    for (label, actual) in [(true, stats.true_count), (false, stats.false_count)] {
        if actual != TARGET_PER_LABEL {
            out.push(FormatViolation::LabelCount {
                label,
                expected: TARGET_PER_LABEL,
                actual,
            });
        }
    }

    for (index, ex) in examples.iter().enumerate() {
        let tokens: Vec<&str> = ex.text.split_whitespace().collect();
        if tokens.len() != TOKENS_PER_EXAMPLE {
            out.push(FormatViolation::TokenCount {
                index,
                text: ex.text.clone(),
                tokens: tokens.len(),
            });
        }
        if ex.text != ex.text.to_lowercase() {
            out.push(FormatViolation::NotLowercase {
                index,
                text: ex.text.clone(),
            });
        }
        if let Some(bad) = tokens.iter().find(|t| !is_valid_token(t)) {
            out.push(FormatViolation::BadToken {
                index,
                token: bad.to_string(),
            });
        }
    }

    out
}

fn is_valid_token(token: &str) -> bool {
    let is_digit = token.len() == 1 && token.chars().all(|c| c.is_ascii_digit());
    let is_word = !token.is_empty() && token.chars().all(|c| c.is_alphabetic());
    is_digit || is_word
}
