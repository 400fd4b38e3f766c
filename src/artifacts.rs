//! On-disk layout for rule runs.
//!
//! ```text
//! <output_dir>/<name>_summary.json
//! <output_dir>/raw_outputs/<name>_96_generated_samples.json
//! <output_dir>/raw_outputs/<name>_classification_test_results.json
//! <output_dir>/raw_outputs/<name>_articulated_rule.json
//! <output_dir>/raw_outputs/<name>_rule_comparison.json
//! <output_dir>/raw_outputs/<name>_articulation_training_evaluation.json
//! ```
//!
//! Each rule writes only under its own `<name>` prefix.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const SUMMARY_SUFFIX: &str = "_summary.json";
/// Batch-level results file; must not end in `_summary.json`.
pub const BATCH_RESULTS_FILE: &str = "batch_results.json";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid json at {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl ArtifactError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// The file the error concerns.
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. } | Self::Json { path, .. } => path,
        }
    }
}

// =============================================================================
// Naming
// =============================================================================

/// Filesystem-safe name for a rule: spaces and path separators become `_`,
/// quotes are dropped, everything is lowercased.
pub fn sanitize_rule_name(rule: &str) -> String {
    let name: String = rule
        .trim()
        .chars()
        .filter(|c| *c != '"' && *c != '\'')
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect::<String>()
        .to_lowercase();

    if name.is_empty() || name.chars().all(|c| c == '.' || c == '_') {
        "rule".to_string()
    } else {
        name
    }
}

/// Pair each rule with a unique sanitized name. Later rules whose names
/// collide get `_2`, `_3`, ... suffixes.
pub fn assign_rule_names(rules: &[String]) -> Vec<(String, String)> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut taken: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(rules.len());

    for rule in rules {
        let base = sanitize_rule_name(rule);
        let count = seen.entry(base.clone()).or_insert(0);
        *count += 1;
        let mut name = if *count == 1 {
            base.clone()
        } else {
            format!("{base}_{count}")
        };
        while taken.contains(&name) {
            *count += 1;
            name = format!("{base}_{count}");
        }
        taken.insert(name.clone());
        out.push((rule.clone(), name));
    }
    out
}

/// Non-empty, trimmed lines of the rule list.
pub fn load_rules(path: &Path) -> Result<Vec<String>, ArtifactError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

// =============================================================================
// Paths
// =============================================================================

/// Every file a single rule run may write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPaths {
    pub rule_name: String,
    pub summary: PathBuf,
    pub corpus: PathBuf,
    pub classification: PathBuf,
    pub articulation: PathBuf,
    pub judgment: PathBuf,
    pub consistency: PathBuf,
}

impl RunPaths {
    pub fn new(output_dir: &Path, rule_name: &str) -> Self {
        let raw = output_dir.join("raw_outputs");
        Self {
            rule_name: rule_name.to_string(),
            summary: output_dir.join(format!("{rule_name}{SUMMARY_SUFFIX}")),
            corpus: raw.join(format!("{rule_name}_96_generated_samples.json")),
            classification: raw.join(format!("{rule_name}_classification_test_results.json")),
            articulation: raw.join(format!("{rule_name}_articulated_rule.json")),
            judgment: raw.join(format!("{rule_name}_rule_comparison.json")),
            consistency: raw.join(format!("{rule_name}_articulation_training_evaluation.json")),
        }
    }

    pub fn corpus_debug(&self) -> PathBuf {
        debug_path_for(&self.corpus)
    }
}

/// `<stem>_debug.txt` beside `path`.
pub fn debug_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{stem}_debug.txt"))
}

// =============================================================================
// IO
// =============================================================================

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Pretty-printed JSON, written to a sibling temp file and renamed into
/// place so a crash never leaves a truncated record.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_text(path, &json)
}

pub fn write_text(path: &Path, contents: &str) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))?;
    }
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("out")
    ));
    std::fs::write(&tmp, contents).map_err(|e| ArtifactError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| ArtifactError::io(path, e))
}

/// `Ok(None)` when the file does not exist; errors only on unreadable or
/// malformed files.
pub fn read_json_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ArtifactError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Every `*_summary.json` directly under `dir`, sorted by file name.
pub fn list_summaries(dir: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ArtifactError::io(dir, e))?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ArtifactError::io(dir, e))?;
        let path = entry.path();
        let is_summary = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(SUMMARY_SUFFIX));
        if is_summary && path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_matches_expected_names() {
        assert_eq!(sanitize_rule_name("Contains a digit"), "contains_a_digit");
        assert_eq!(
            sanitize_rule_name(r#"Starts with the word "lizard""#),
            "starts_with_the_word_lizard"
        );
        assert_eq!(sanitize_rule_name("Ends with 'ocean'"), "ends_with_ocean");
        assert_eq!(sanitize_rule_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_rule_name("''"), "rule");
        assert_eq!(sanitize_rule_name(".."), "rule");
    }

    #[test]
    fn colliding_names_get_suffixes() {
        let rules = vec![
            "Contains a digit".to_string(),
            "contains a digit".to_string(),
            "contains 'a' digit".to_string(),
            "Repeats frog".to_string(),
        ];
        let names: Vec<String> = assign_rule_names(&rules).into_iter().map(|(_, n)| n).collect();
        assert_eq!(
            names,
            vec![
                "contains_a_digit",
                "contains_a_digit_2",
                "contains_a_digit_3",
                "repeats_frog"
            ]
        );
    }

    #[test]
    fn suffix_does_not_collide_with_literal_rule_name() {
        let rules = vec![
            "x".to_string(),
            "x 2".to_string(),
            "x".to_string(),
        ];
        let names: Vec<String> = assign_rule_names(&rules).into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["x", "x_2", "x_3"]);
    }

    #[test]
    fn load_rules_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.txt");
        std::fs::write(&path, "Contains a digit\n\n   \n  Repeats the word frog  \n").unwrap();
        assert_eq!(
            load_rules(&path).unwrap(),
            vec!["Contains a digit", "Repeats the word frog"]
        );
    }

    #[test]
    fn run_paths_layout() {
        let p = RunPaths::new(Path::new("results"), "contains_a_digit");
        assert_eq!(p.summary, PathBuf::from("results/contains_a_digit_summary.json"));
        assert_eq!(
            p.corpus,
            PathBuf::from("results/raw_outputs/contains_a_digit_96_generated_samples.json")
        );
        assert_eq!(
            p.corpus_debug(),
            PathBuf::from("results/raw_outputs/contains_a_digit_96_generated_samples_debug.txt")
        );
    }

    #[test]
    fn write_then_read_and_list() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a_summary.json");
        write_json(&path, &serde_json::json!({"ok": true})).unwrap();
        write_json(&dir.path().join("raw_outputs/b.json"), &1).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let v: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(list_summaries(dir.path()).unwrap(), vec![path]);
        assert!(!dir.path().join("a_summary.json.tmp").exists());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        let v: Option<serde_json::Value> =
            read_json_if_exists(&dir.path().join("nope.json")).unwrap();
        assert!(v.is_none());
    }
}
