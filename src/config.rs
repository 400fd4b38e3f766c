//! Pipeline configuration.
//!
//! Loaded once at process start (defaults, then an optional JSON file, then
//! CLI overrides) and handed to every component by value. Secrets never live
//! here; the gateway reads them from the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::gateway::ReasoningEffort;

// =============================================================================
// Config
// =============================================================================

/// Model identifiers per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub generator: String,
    pub classifier: String,
    pub articulator: String,
    pub judge: String,
    pub consistency: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            generator: "openai/gpt-5".into(),
            classifier: "openai/gpt-4.1".into(),
            articulator: "openai/gpt-4.1".into(),
            judge: "openai/gpt-5".into(),
            consistency: "openai/gpt-5".into(),
        }
    }
}

/// Output-token budgets per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudgets {
    pub generator: u32,
    pub classifier: u32,
    pub articulator: u32,
    pub judge: u32,
    pub consistency: u32,
}

impl Default for TokenBudgets {
    fn default() -> Self {
        Self {
            generator: 32_000,
            classifier: 10,
            articulator: 16_000,
            judge: 2_000,
            consistency: 16_000,
        }
    }
}

/// Configuration for a batch of rule runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub models: ModelConfig,
    pub budgets: TokenBudgets,
    /// Simultaneous in-flight classification calls, shared across all rules.
    pub classification_concurrency: usize,
    /// Minimum accuracy (percent, inclusive) to proceed to articulation.
    pub accuracy_threshold: f64,
    /// Directory for per-rule summaries; detail files go under `raw_outputs/`.
    pub output_dir: PathBuf,
    /// Rule list, one rule per non-empty line.
    pub rules_file: PathBuf,
    /// Reuse stage outputs already on disk instead of re-eliciting them.
    pub resume: bool,
    /// Reasoning effort for the articulator. Off by default: the articulator
    /// runs at temperature 0, which reasoning models reject.
    pub articulator_reasoning: Option<ReasoningEffort>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            models: ModelConfig::default(),
            budgets: TokenBudgets::default(),
            classification_concurrency: 50,
            accuracy_threshold: 90.0,
            output_dir: PathBuf::from("results"),
            rules_file: PathBuf::from("rules_to_evaluate.txt"),
            resume: false,
            articulator_reasoning: None,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

// =============================================================================
// Loading
// =============================================================================

impl PipelineConfig {
    /// Read a JSON config file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults, or the given file if any.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classification_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "classification_concurrency must be at least 1".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.accuracy_threshold) {
            return Err(ConfigError::Invalid(format!(
                "accuracy_threshold {} outside 0..=100",
                self.accuracy_threshold
            )));
        }
        Ok(())
    }

    pub fn raw_outputs_dir(&self) -> PathBuf {
        self.output_dir.join("raw_outputs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.models.generator, "openai/gpt-5");
        assert_eq!(cfg.models.classifier, "openai/gpt-4.1");
        assert_eq!(cfg.budgets.classifier, 10);
        assert_eq!(cfg.classification_concurrency, 50);
        assert_eq!(cfg.accuracy_threshold, 90.0);
        assert_eq!(cfg.raw_outputs_dir(), PathBuf::from("results/raw_outputs"));
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(
            &path,
            r#"{"models": {"judge": "openai/gpt-5-mini"}, "classification_concurrency": 8}"#,
        )
        .unwrap();

        let cfg = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(cfg.models.judge, "openai/gpt-5-mini");
        assert_eq!(cfg.models.generator, "openai/gpt-5");
        assert_eq!(cfg.classification_concurrency, 8);
        assert_eq!(cfg.budgets.generator, 32_000);
    }

    #[test]
    fn articulator_reasoning_is_opt_in() {
        assert_eq!(PipelineConfig::default().articulator_reasoning, None);
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"articulator_reasoning": "medium"}"#).unwrap();
        assert_eq!(cfg.articulator_reasoning, Some(ReasoningEffort::Medium));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let cfg = PipelineConfig {
            classification_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
