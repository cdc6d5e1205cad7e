//! Binary entry point for symbiont.
//!
//! This binary provides a small chat front-end over the interaction service.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use symbiont::config::SymbiontConfig;
use symbiont::observability::{init_logging, install_prometheus};
use symbiont::storage::{InMemoryStorage, SqliteStorage, StorageBackend, database_path};
use symbiont::{Answer, DecisionId, InteractionService, SessionContext};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Symbiont - a conversational agent that learns to answer on its own.
#[derive(Parser)]
#[command(name = "symbiont")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep all state in memory for this run.
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Interactive chat over stdin.
    ///
    /// `/good`, `/bad` and `/score <x>` rate the last answer; `/quit` exits.
    Chat {
        /// User ID to record interactions under.
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Force every utterance onto this topic.
        #[arg(short, long)]
        topic: Option<String>,
    },

    /// Answer a single utterance.
    Ask {
        /// The utterance.
        text: String,

        /// User ID to record the interaction under.
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Force the utterance onto this topic.
        #[arg(short, long)]
        topic: Option<String>,
    },

    /// Run one consolidation pass.
    Consolidate,

    /// Show topic confidence and tier occupancy.
    Status,

    /// Manage configuration.
    Config {
        /// Show current configuration.
        #[arg(long)]
        show: bool,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = init_logging(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }
    let _metrics = match install_prometheus(&config.metrics) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize metrics: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(cli: Cli, config: SymbiontConfig) -> Result<()> {
    match cli.command {
        Commands::Chat { user, topic } => {
            let service = build_service(config, cli.in_memory)?;
            cmd_chat(&service, session(user, topic)).await
        },
        Commands::Ask { text, user, topic } => {
            let service = build_service(config, cli.in_memory)?;
            cmd_ask(&service, &text, &session(user, topic)).await
        },
        Commands::Consolidate => cmd_consolidate(&build_service(config, cli.in_memory)?),
        Commands::Status => {
            cmd_status(&build_service(config, cli.in_memory)?);
            Ok(())
        },
        Commands::Config { show } => cmd_config(&config, show),
    }
}

/// Loads configuration: explicit path, then `SYMBIONT_CONFIG_PATH`, then the
/// default locations; environment and flag overrides are applied last.
fn load_config(cli: &Cli) -> Result<SymbiontConfig> {
    let env_path = std::env::var("SYMBIONT_CONFIG_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);

    let config = match cli.config.as_ref().or(env_path.as_ref()) {
        Some(path) => SymbiontConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => SymbiontConfig::load_default(),
    };
    let config = config.with_env_overrides();
    let config = match &cli.data_dir {
        Some(dir) => config.with_data_dir(dir),
        None => config,
    };
    config.validate()?;
    Ok(config)
}

fn build_service(config: SymbiontConfig, in_memory: bool) -> Result<InteractionService> {
    let storage: Arc<dyn StorageBackend> = if in_memory {
        Arc::new(InMemoryStorage::new())
    } else {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating {}", config.data_dir.display()))?;
        Arc::new(SqliteStorage::open(database_path(&config.data_dir))?)
    };
    Ok(InteractionService::builder(config)
        .with_storage(storage)
        .build()?)
}

fn session(user: String, topic: Option<String>) -> SessionContext {
    let session = SessionContext::new(user);
    match topic {
        Some(topic) => session.with_topic_hint(topic),
        None => session,
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    println!(
        "  [{} | {} | {} {}] decision {}",
        answer.route,
        answer.source.as_str(),
        answer.topic,
        answer.band,
        answer.decision_id
    );
}

/// Chat command.
async fn cmd_chat(service: &InteractionService, session: SessionContext) -> Result<()> {
    let job = service.spawn_consolidation();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last: Option<DecisionId> = None;

    println!("symbiont chat. /good, /bad or /score <0..1> rate the last answer; /quit exits.");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Some(score) = parse_rating(line) {
            let score = match score {
                Ok(score) => score,
                Err(e) => {
                    eprintln!("{e}");
                    continue;
                },
            };
            match &last {
                Some(id) => match service.submit_feedback(id, score) {
                    Ok(record) => println!(
                        "  feedback applied to '{}': confidence {:.3}",
                        record.topic, record.confidence_after
                    ),
                    Err(e) => eprintln!("  {e}"),
                },
                None => eprintln!("  nothing to rate yet"),
            }
            continue;
        }

        match service.handle_utterance(line, &session).await {
            Ok(answer) => {
                print_answer(&answer);
                last = Some(answer.decision_id);
            },
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    if let Some(job) = job {
        job.shutdown().await;
    }
    Ok(())
}

/// Parses `/good`, `/bad` and `/score <x>`; `None` for plain utterances.
fn parse_rating(line: &str) -> Option<Result<f32>> {
    match line.split_whitespace().collect::<Vec<_>>().as_slice() {
        ["/good"] => Some(Ok(1.0)),
        ["/bad"] => Some(Ok(0.0)),
        ["/score", value] => Some(
            value
                .parse::<f32>()
                .with_context(|| format!("invalid score '{value}'")),
        ),
        ["/score", ..] => Some(Err(anyhow::anyhow!("usage: /score <0..1>"))),
        _ => None,
    }
}

/// Ask command.
async fn cmd_ask(service: &InteractionService, text: &str, session: &SessionContext) -> Result<()> {
    let answer = service.handle_utterance(text, session).await?;
    print_answer(&answer);
    Ok(())
}

/// Consolidate command.
fn cmd_consolidate(service: &InteractionService) -> Result<()> {
    let stats = service.run_consolidation()?;
    println!("{}", stats.summary());
    Ok(())
}

/// Status command.
fn cmd_status(service: &InteractionService) {
    println!("Memory:");
    for (tier, count) in service.occupancy() {
        println!("  {:<11} {count}", tier.as_str());
    }

    let topics = service.topics();
    if topics.is_empty() {
        println!("No topics yet.");
        return;
    }
    println!("Topics:");
    for topic in topics {
        println!(
            "  {:<20} {:.3} {:<6} ({} interactions, updated {})",
            topic.name,
            topic.confidence,
            service.band(&topic.name).as_str(),
            topic.interactions,
            format_timestamp(topic.updated_at)
        );
    }
}

fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M UTC").to_string())
}

/// Config command.
fn cmd_config(config: &SymbiontConfig, show: bool) -> Result<()> {
    if !show {
        bail!("nothing to do; pass --show to print the effective configuration");
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rating() {
        assert!(parse_rating("hello").is_none());
        assert!((parse_rating("/good").expect("rating").expect("ok") - 1.0).abs() < f32::EPSILON);
        assert!(parse_rating("/bad").expect("rating").expect("ok").abs() < f32::EPSILON);
        assert!(
            (parse_rating("/score 0.25").expect("rating").expect("ok") - 0.25).abs()
                < f32::EPSILON
        );
        assert!(parse_rating("/score x").expect("rating").is_err());
        assert!(parse_rating("/score").expect("rating").is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00 UTC");
        assert_eq!(format_timestamp(u64::MAX), "-");
    }
}
