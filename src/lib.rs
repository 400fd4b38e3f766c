#![forbid(unsafe_code)]

//! # articulation-gap
//!
//! Measures whether a model can state the rule it demonstrably applies.
//!
//! For each plain-language rule over short lowercase sentences, a rule run
//! generates a balanced labeled corpus, checks that a classifier learns the
//! rule from 64 few-shot examples (accuracy at least 90% on held-out items),
//! asks a model to articulate the rule from the same examples, and has a
//! judge compare the articulation to the ground truth. When they disagree, a
//! consistency check replays the articulated rule over the training split to
//! separate genuine articulation failures (the stated rule contradicts its
//! own training labels) from spurious ones (the sample could not tell the
//! two rules apart).
//!
//! Runs for different rules execute concurrently and persist a summary after
//! every transition; [`report`] aggregates the genuine failures afterwards.

pub mod artifacts;
pub mod config;
pub mod corpus;
pub mod extract;
pub mod gateway;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod stages;

pub use artifacts::{ArtifactError, RunPaths};
pub use config::{ConfigError, PipelineConfig};
pub use corpus::{Corpus, CorpusStats, Example, FormatViolation, Split};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use pipeline::{
    run_batch, run_rule, BatchSummary, Outcome, RunContext, RunStatus, RunSummary, StateTag,
};
pub use report::{collect_genuine_failures, render_markdown, GenuineFailureReport, ReportError};
pub use stages::{Stage, StageError, Verdict};
