#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use articulation_gap::gateway::{ChatGateway, ChatRequest, ChatResponse, ProviderError};
use articulation_gap::PipelineConfig;
use serde_json::json;

pub const ADJECTIVES: [&str; 8] = [
    "green", "quiet", "small", "heavy", "bright", "slow", "cold", "young",
];
pub const NOUNS: [&str; 6] = ["stone", "river", "cloud", "apple", "bridge", "tower"];

/// What the fake does for one call.
pub enum Script {
    Reply(String),
    Fail,
    Panic,
}

pub type ScriptFn = Arc<dyn Fn(&str) -> Script + Send + Sync>;

pub fn always(text: impl Into<String>) -> ScriptFn {
    let text = text.into();
    Arc::new(move |_: &str| Script::Reply(text.clone()))
}

pub fn failing() -> ScriptFn {
    Arc::new(|_: &str| Script::Fail)
}

/// Deterministic fake routed on `Attribution::caller`. Each stage gets the
/// full prompt text and decides what to return.
pub struct ScriptedGateway {
    routes: HashMap<&'static str, ScriptFn>,
    calls: Mutex<HashMap<String, usize>>,
    last: Mutex<HashMap<String, ChatRequest>>,
}

impl ScriptedGateway {
    /// Lizard rule, perfect classifier, articulation that matches.
    pub fn lizard() -> Self {
        let mut routes: HashMap<&'static str, ScriptFn> = HashMap::new();
        routes.insert("pipeline::generate", always(lizard_corpus_json()));
        routes.insert("pipeline::classify", Arc::new(oracle_classifier));
        routes.insert(
            "pipeline::articulate",
            always("Every True input opens with lizard.\n\n**FINAL RULE:** Starts with the word lizard."),
        );
        routes.insert(
            "pipeline::judge",
            always(r#"{"match": true, "explanation": "same rule"}"#),
        );
        routes.insert(
            "pipeline::consistency",
            always(r#"{"matches": 64, "total": 64, "mismatches": []}"#),
        );
        Self {
            routes,
            calls: Mutex::new(HashMap::new()),
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn route(mut self, caller: &'static str, script: ScriptFn) -> Self {
        self.routes.insert(caller, script);
        self
    }

    pub fn calls(&self, caller: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(caller)
            .copied()
            .unwrap_or(0)
    }

    /// Most recent request a stage sent, decoding parameters included.
    pub fn last_request(&self, caller: &str) -> Option<ChatRequest> {
        self.last.lock().unwrap().get(caller).cloned()
    }
}

#[async_trait::async_trait]
impl ChatGateway for ScriptedGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let caller = req.attribution.caller;
        *self
            .calls
            .lock()
            .unwrap()
            .entry(caller.to_string())
            .or_insert(0) += 1;
        self.last
            .lock()
            .unwrap()
            .insert(caller.to_string(), req.clone());

        let prompt = req
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let script = self
            .routes
            .get(caller)
            .unwrap_or_else(|| panic!("no script for {caller}"));

        match script(&prompt) {
            Script::Reply(text) => Ok(ChatResponse::text(text)),
            Script::Fail => Err(ProviderError::provider("scripted", "upstream unavailable", true)),
            Script::Panic => panic!("scripted panic for {caller}"),
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn lizard_true(i: usize) -> String {
    format!("lizard {} {} sat quietly", ADJECTIVES[i % 8], NOUNS[i / 8])
}

pub fn lizard_false(i: usize) -> String {
    format!("the {} {} sat quietly", ADJECTIVES[i % 8], NOUNS[i / 8])
}

/// 48 True then 48 False examples, all well formed.
pub fn lizard_corpus_json() -> String {
    let mut items = Vec::new();
    for i in 0..48 {
        items.push(json!({"text": lizard_true(i), "label": true}));
    }
    for i in 0..48 {
        items.push(json!({"text": lizard_false(i), "label": false}));
    }
    serde_json::to_string(&items).unwrap()
}

/// The test item is the last `Input:` line of a classification prompt.
pub fn classified_input(prompt: &str) -> &str {
    prompt
        .rsplit_once("Input: ")
        .map(|(_, rest)| rest.lines().next().unwrap_or(""))
        .unwrap_or("")
}

pub fn oracle_classifier(prompt: &str) -> Script {
    let label = classified_input(prompt).starts_with("lizard ");
    Script::Reply(if label { "True" } else { "False" }.to_string())
}

pub fn config(output_dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        output_dir: output_dir.to_path_buf(),
        classification_concurrency: 8,
        ..PipelineConfig::default()
    }
}
