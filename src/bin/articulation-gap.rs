#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgGroup, Parser, Subcommand};
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use articulation_gap::artifacts::{debug_path_for, load_rules, read_json, write_json};
use articulation_gap::config::PipelineConfig;
use articulation_gap::corpus::Corpus;
use articulation_gap::gateway::{ChatGateway, ProviderGateway, TallyUsageSink};
use articulation_gap::pipeline::{self, BatchSummary, RunContext};
use articulation_gap::report;
use articulation_gap::stages::{self, Articulation};

#[derive(Parser)]
#[command(
    name = "articulation-gap",
    version,
    about = "Measure whether models can articulate the rules they apply"
)]
struct Cli {
    /// Emit diagnostics as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for every rule in the rules file
    Run {
        /// JSON config file; defaults are used for missing keys
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        rules: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Reuse stage outputs already on disk
        #[arg(long)]
        resume: bool,
        /// Max in-flight classification calls across all rules
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Generate the labeled corpus for one rule
    #[command(group(ArgGroup::new("rule_source").required(true).args(["rule", "input"])))]
    Generate {
        /// Rule text; a leading `Rule:` is stripped
        #[arg(long)]
        rule: Option<String>,
        /// File holding the rule text
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Few-shot classification accuracy for a corpus
    Classify {
        /// Corpus JSON
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Ask a model to state the rule behind a corpus
    Articulate {
        /// Corpus JSON
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Judge an articulation against the ground-truth rule
    Judge {
        /// Articulation JSON
        #[arg(long)]
        input: PathBuf,
        /// Ground-truth rule; defaults to the articulation's rule description
        #[arg(long)]
        rule: Option<String>,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Replay an articulation over its training split
    Consistency {
        /// Articulation JSON
        #[arg(long)]
        input: PathBuf,
        /// Corpus JSON the articulation was derived from
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Aggregate genuine failures from a results directory
    Report {
        /// Directory holding `*_summary.json` files
        #[arg(long)]
        input: PathBuf,
        /// Where to write the report files; defaults to the input directory
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    Ok(PipelineConfig::load(path)?)
}

fn build_gateway() -> Result<(Arc<dyn ChatGateway>, Arc<TallyUsageSink>), Box<dyn std::error::Error>>
{
    let usage = Arc::new(TallyUsageSink::new());
    let gateway: Arc<dyn ChatGateway> = Arc::new(ProviderGateway::from_env(usage.clone())?);
    Ok((gateway, usage))
}

fn print_usage(usage: &TallyUsageSink) {
    let totals = usage.totals();
    eprintln!(
        "[usage] {} calls ({} errors), {} input / {} output tokens, ${:.4}",
        totals.calls,
        totals.errors,
        totals.input_tokens,
        totals.output_tokens,
        totals.cost_usd()
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Run {
            config,
            rules,
            output_dir,
            resume,
            concurrency,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if let Some(rules) = rules {
                cfg.rules_file = rules;
            }
            if let Some(dir) = output_dir {
                cfg.output_dir = dir;
            }
            if let Some(n) = concurrency {
                cfg.classification_concurrency = n;
            }
            cfg.resume |= resume;
            cfg.validate()?;

            let rules = load_rules(&cfg.rules_file)?;
            if rules.is_empty() {
                return Err(format!("no rules in {}", cfg.rules_file.display()).into());
            }
            std::fs::create_dir_all(cfg.raw_outputs_dir())?;

            let (gateway, usage) = build_gateway()?;
            let output_dir = cfg.output_dir.clone();
            let ctx = RunContext::new(gateway, cfg);

            let runs = pipeline::run_batch(&ctx, &rules).await;
            let batch = BatchSummary::from_runs(&runs, &output_dir);
            batch.print();
            let path = pipeline::write_batch_summary(&output_dir, &batch)?;
            eprintln!("[pipeline] wrote {}", path.display());
            pipeline::report_batch(&output_dir);
            print_usage(&usage);
        }
        Commands::Generate {
            rule,
            input,
            output,
            config,
        } => {
            let cfg = load_config(config.as_deref())?;
            let rule = match (rule, input) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .map_err(|e| format!("failed to read rule file {}: {e}", path.display()))?,
                (None, None) => return Err("one of --rule or --input is required".into()),
            };
            let rule = stages::parse_rule_input(&rule)?;
            let (gateway, usage) = build_gateway()?;
            let corpus = stages::generate_corpus(
                &*gateway,
                &cfg,
                &rule,
                None,
                &debug_path_for(&output),
            )
            .await?;
            write_json(&output, &corpus)?;
            println!("{}", output.display());
            print_usage(&usage);
        }
        Commands::Classify {
            input,
            output,
            config,
        } => {
            let cfg = load_config(config.as_deref())?;
            let corpus: Corpus = read_json(&input)?;
            let (gateway, usage) = build_gateway()?;
            let limiter = Arc::new(Semaphore::new(cfg.classification_concurrency.max(1)));
            let report = stages::classify_corpus(&*gateway, &cfg, &corpus, limiter, None).await?;
            write_json(&output, &report)?;
            println!(
                "{:.1}% ({}/{}) {}",
                report.accuracy,
                report.correct,
                report.total,
                if report.passed { "PASSED" } else { "FAILED" }
            );
            print_usage(&usage);
        }
        Commands::Articulate {
            input,
            output,
            config,
        } => {
            let cfg = load_config(config.as_deref())?;
            let corpus: Corpus = read_json(&input)?;
            let (gateway, usage) = build_gateway()?;
            let articulation = stages::articulate_rule(&*gateway, &cfg, &corpus, None).await?;
            write_json(&output, &articulation)?;
            println!("{}", articulation.effective_rule());
            print_usage(&usage);
        }
        Commands::Judge {
            input,
            rule,
            output,
            config,
        } => {
            let cfg = load_config(config.as_deref())?;
            let articulation: Articulation = read_json(&input)?;
            let actual = match rule {
                Some(r) => stages::parse_rule_input(&r)?,
                None => articulation.rule_description.clone(),
            };
            let (gateway, usage) = build_gateway()?;
            let judgment = stages::judge_articulation(
                &*gateway,
                &cfg,
                &actual,
                articulation.effective_rule(),
                None,
            )
            .await?;
            write_json(&output, &judgment)?;
            println!("{:?}", judgment.verdict());
            print_usage(&usage);
        }
        Commands::Consistency {
            input,
            corpus,
            output,
            config,
        } => {
            let cfg = load_config(config.as_deref())?;
            let articulation: Articulation = read_json(&input)?;
            let corpus: Corpus = read_json(&corpus)?;
            let (gateway, usage) = build_gateway()?;
            let report = stages::check_consistency(
                &*gateway,
                &cfg,
                &corpus,
                articulation.effective_rule(),
                None,
                &debug_path_for(&output),
            )
            .await?;
            write_json(&output, &report)?;
            println!(
                "{}/{} consistent, {} mismatches",
                report.matches, report.total, report.mismatch_count
            );
            print_usage(&usage);
        }
        Commands::Report { input, output } => {
            let collected = report::collect_genuine_failures(&input)?;
            let out_dir = output.unwrap_or_else(|| input.clone());
            let (json_path, md_path) = report::write_report(&out_dir, &collected)?;
            println!("{}", json_path.display());
            println!("{}", md_path.display());
        }
    }

    Ok(())
}
