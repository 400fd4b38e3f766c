//! The five LLM-backed stages of a rule run.
//!
//! Each stage is a free async function over a [`ChatGateway`]: it builds its
//! prompt, makes its elicitation(s), parses the reply and returns a typed
//! record. Stages never write summaries; the pipeline persists their output.
//! The one exception is the generator's debug side file, which only the
//! generator can produce.

pub mod articulate;
pub mod classify;
pub mod consistency;
pub mod generate;
pub mod judge;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifacts::ArtifactError;
use crate::gateway::{Attribution, ProviderError};

pub use articulate::{articulate_rule, extract_final_rule, Articulation};
pub use classify::{
    classify_corpus, parse_prediction, passes_threshold, score, ClassificationReport, ItemResult,
    Score,
};
pub use consistency::{check_consistency, ConsistencyReport, Mismatch};
pub use generate::{generate_corpus, parse_rule_input};
pub use judge::{judge_articulation, Judgment, Verdict};

/// Pipeline stage identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Classify,
    Articulate,
    Judge,
    Consistency,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::Classify => "classify",
            Stage::Articulate => "articulate",
            Stage::Judge => "judge",
            Stage::Consistency => "consistency",
        }
    }

    /// Attribution caller for gateway requests made by this stage.
    pub fn caller(&self) -> &'static str {
        match self {
            Stage::Generate => "pipeline::generate",
            Stage::Classify => "pipeline::classify",
            Stage::Articulate => "pipeline::articulate",
            Stage::Judge => "pipeline::judge",
            Stage::Consistency => "pipeline::consistency",
        }
    }

    pub fn attribution(&self, job_id: Option<Uuid>) -> Attribution {
        let attribution = Attribution::new(self.caller());
        match job_id {
            Some(id) => attribution.with_job(id),
            None => attribution,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The completion service failed. Never retried by the stage.
    #[error("completion failed: {0}")]
    Transport(#[from] ProviderError),
    #[error("empty response from model")]
    EmptyResponse,
    /// Text came back but not in the expected shape.
    #[error("unparsable response: {message}")]
    Parse {
        message: String,
        raw_path: Option<PathBuf>,
    },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StageError {
    pub fn code(&self) -> &'static str {
        match self {
            StageError::Transport(e) => e.code(),
            StageError::EmptyResponse => "empty_response",
            StageError::Parse { .. } => "parse_error",
            StageError::Artifact(_) => "artifact_error",
            StageError::InvalidInput(_) => "invalid_input",
        }
    }
}

/// First `max` characters of `s`, on a char boundary.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_codes() {
        assert_eq!(StageError::EmptyResponse.code(), "empty_response");
        let e = StageError::from(ProviderError::refused("no"));
        assert_eq!(e.code(), "refused");
        let e = StageError::Parse {
            message: "bad".into(),
            raw_path: None,
        };
        assert_eq!(e.code(), "parse_error");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("→→→", 2), "→→");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }
}
