use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use unify_core::{
    AppConfig, ExportFormat, MergeDecision, Scorer, SimilarityMetric, Unifier, UnifyError,
};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "unify",
    about = "Find and merge near-duplicate company and location names",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to UNIFY_CONFIG or the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format. Also enabled by setting UNIFY_JSON=1.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Group similar names and record the result as a new pass.
    Groups {
        entity: String,
        /// Similarity threshold in [0, 1]; defaults to the configured one.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Execute merge decisions against a recorded pass.
    Merge {
        entity: String,
        /// Pass to merge (defaults to the latest).
        #[arg(long)]
        pass: Option<u32>,
        /// JSON file holding an array of merge decisions.
        #[arg(long, conflicts_with = "accept_all")]
        decisions: Option<PathBuf>,
        /// Accept every group with its suggested name.
        #[arg(long)]
        accept_all: bool,
        /// Groups to leave untouched when accepting all.
        #[arg(long, action = clap::ArgAction::Append)]
        skip: Vec<u32>,
    },

    /// Export a pass for offline review.
    Export {
        entity: String,
        #[arg(long)]
        pass: Option<u32>,
        #[arg(long, default_value = "csv")]
        format: String,
        /// Write to a file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show recorded passes with cumulative reduction.
    Passes { entity: String },

    /// Score two names.
    Score {
        a: String,
        b: String,
        #[arg(long)]
        metric: Option<String>,
    },

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Print the config file path.
    Path,
}

// ─── Exit Codes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum ExitCode {
    General = 1,
    NotFound = 2,
    InvalidArgs = 3,
    PartialFailure = 7,
}

impl ExitCode {
    fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<UnifyError>() {
            Some(UnifyError::EntityNotFound(_) | UnifyError::PassNotFound(_)) => Self::NotFound,
            Some(
                UnifyError::InvalidThreshold(_)
                | UnifyError::Validation(_)
                | UnifyError::Configuration(_),
            ) => Self::InvalidArgs,
            _ => Self::General,
        }
    }
}

// ─── Main ────────────────────────────────────────────────────────────────────

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let json_output = cli.json || std::env::var("UNIFY_JSON").as_deref() == Ok("1");

    if let Err(err) = run(cli, json_output) {
        let code = ExitCode::for_error(&err);
        if json_output {
            let envelope = serde_json::json!({
                "status": "error",
                "error": { "message": format!("{err:#}"), "code": code as i32 }
            });
            println!("{envelope:#}");
        } else {
            eprintln!("error: {err:#}");
        }
        std::process::exit(code as i32);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("UNIFY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli, json_output: bool) -> Result<()> {
    let start = Instant::now();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::config_path);
    let mut config = AppConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Ok(db_path) = std::env::var("UNIFY_DATABASE") {
        config.set_database_path(db_path.into());
    }
    tracing::debug!(
        config = %config_path.display(),
        database = %config.database_path().display(),
        "configuration loaded"
    );

    match cli.command {
        Commands::Groups { entity, threshold } => {
            let unifier = Unifier::open(config)?;
            let outcome = unifier.compute_groups(&entity, threshold)?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": outcome,
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                let s = &outcome.summary;
                println!(
                    "Pass #{} for {entity} (threshold {:.2}, {})",
                    outcome.pass.pass_number, outcome.pass.threshold, outcome.pass.metric
                );
                println!(
                    "  {} candidates, {} groups, {} duplicates, {} after merging",
                    s.original_count,
                    s.total_groups,
                    s.total_duplicates,
                    s.projected_count()
                );
                for group in &outcome.groups {
                    println!(
                        "\n[{}] {} -> {}",
                        group.group_id, group.main_candidate.id, group.suggested_merge_name
                    );
                    println!("    {:>5}  {}", "main", group.main_candidate.display_name);
                    for similar in &group.similar_candidates {
                        println!(
                            "    {:.3}  {} ({})",
                            similar.score, similar.record.display_name, similar.record.id
                        );
                    }
                }
            }
        }

        Commands::Merge {
            entity,
            pass,
            decisions,
            accept_all,
            skip,
        } => {
            let unifier = Unifier::open(config)?;
            let (pass, groups) = unifier.load_pass(&entity, pass)?;

            let decisions: Vec<MergeDecision> = match decisions {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str(&raw)
                        .with_context(|| format!("parsing decisions in {}", path.display()))?
                }
                None if accept_all => groups
                    .iter()
                    .map(|g| {
                        if skip.contains(&g.group_id) {
                            MergeDecision::skip(g)
                        } else {
                            MergeDecision::accept(g)
                        }
                    })
                    .collect(),
                None => anyhow::bail!(UnifyError::Configuration(
                    "pass --decisions FILE or --accept-all".to_string()
                )),
            };

            let batch = unifier.execute_merges(&entity, decisions, &groups, Some(pass.pass_number))?;
            let mut results = Vec::new();
            let mut progress = batch.progress();
            for outcome in batch {
                if !json_output {
                    let r = &outcome.result;
                    let status = match (&r.error_message, r.companies_merged) {
                        (Some(msg), _) => format!("failed: {msg}"),
                        (None, 0) => "skipped".to_string(),
                        (None, n) => format!("merged {n} ({} references repointed)", r.rows_repointed),
                    };
                    println!(
                        "[{}/{}] group {}: {status}",
                        outcome.progress.processed, outcome.progress.total, r.group_id
                    );
                }
                progress = outcome.progress;
                results.push(outcome.result);
            }
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": if progress.errors == 0 { "ok" } else { "partial" },
                    "data": { "pass": pass.pass_number, "results": results, "progress": progress },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!(
                    "\n{} succeeded, {} failed, {} records absorbed",
                    progress.successes, progress.errors, progress.absorbed
                );
            }

            if progress.errors > 0 {
                std::process::exit(ExitCode::PartialFailure as i32);
            }
        }

        Commands::Export {
            entity,
            pass,
            format,
            output,
        } => {
            let format: ExportFormat = format.parse()?;
            let unifier = Unifier::open(config)?;
            let rendered = unifier.export_report(&entity, pass, format)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("writing {}", path.display()))?;
                    let dur = start.elapsed().as_millis();
                    if json_output {
                        print_json(&serde_json::json!({
                            "status": "ok",
                            "data": { "path": path, "format": format },
                            "meta": { "duration_ms": dur }
                        }))?;
                    } else {
                        println!("Wrote {} report to {}", format, path.display());
                    }
                }
                None => print!("{rendered}"),
            }
        }

        Commands::Passes { entity } => {
            let unifier = Unifier::open(config)?;
            let history = unifier.pass_history(&entity)?;
            let absorbed = unifier.absorbed_total(&entity)?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "passes": history, "absorbed_total": absorbed },
                    "meta": { "duration_ms": dur }
                }))?;
            } else if history.is_empty() {
                println!("No passes recorded for {entity}. Use `unify groups {entity}` first.");
            } else {
                println!(
                    "{:>4}  {:>9}  {:>10}  {:>6}  {:>10}  {:>10}",
                    "pass", "threshold", "candidates", "groups", "absorbed", "cumulative"
                );
                for report in &history {
                    println!(
                        "{:>4}  {:>9.2}  {:>10}  {:>6}  {:>10}  {:>10}",
                        report.pass.pass_number,
                        report.pass.threshold,
                        report.pass.summary.original_count,
                        report.pass.summary.total_groups,
                        report.absorbed_so_far,
                        report.cumulative_reduction
                    );
                }
                println!("\nBaseline {} candidates, {absorbed} absorbed so far", history[0].baseline_count);
            }
        }

        Commands::Score { a, b, metric } => {
            let metric = match metric {
                Some(m) => m
                    .parse::<SimilarityMetric>()
                    .map_err(UnifyError::Configuration)?,
                None => config.grouping.metric,
            };
            let score = Scorer::new(metric).score(&a, &b);
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "a": a, "b": b, "metric": metric, "score": score },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("{score:.4}");
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                if json_output {
                    print_json(&serde_json::json!({
                        "status": "ok",
                        "data": config,
                        "meta": { "duration_ms": start.elapsed().as_millis() }
                    }))?;
                } else {
                    print!("{}", config.to_toml()?);
                }
            }
            ConfigAction::Path => {
                if json_output {
                    print_json(&serde_json::json!({
                        "status": "ok",
                        "data": { "path": config_path, "exists": config_path.exists() },
                        "meta": { "duration_ms": start.elapsed().as_millis() }
                    }))?;
                } else {
                    println!("{}", config_path.display());
                }
            }
        },
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}
