//! CLI argument parsing and command dispatch

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ab_bench_core::{
    LogEvent, LogLevel, LogSink, ProcessSupervisor, RunOutcome, SessionController, TrialConfig,
    TrialResult,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::server;

/// ab-bench - Apache Bench trial runner and live session server
#[derive(Parser, Debug)]
#[command(name = "ab-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the REST and WebSocket API
    Serve {
        /// Listen address, overrides `[server] bind`
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Path to the ab executable, overrides `[supervisor] ab_path`
        #[arg(long)]
        ab_path: Option<PathBuf>,
    },
    /// Run a single trial described by a JSON file
    Run {
        /// Trial configuration (JSON)
        file: PathBuf,

        /// Path to the ab executable, overrides `[supervisor] ab_path`
        #[arg(long)]
        ab_path: Option<PathBuf>,

        /// Print the result as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Validate a trial configuration file
    Validate {
        /// Trial configuration (JSON)
        file: PathBuf,
    },
    /// Check that ab is installed
    Check {
        /// Path to the ab executable, overrides `[supervisor] ab_path`
        #[arg(long)]
        ab_path: Option<PathBuf>,
    },
}

/// Prints run events to the terminal
struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn emit(&self, event: LogEvent) {
        let level = match event.level {
            LogLevel::Info => "info ",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
        };
        println!(
            "{} [{level}] {}",
            event.timestamp.format("%H:%M:%S"),
            event.message
        );
    }
}

fn load_trial(path: &Path) -> Result<TrialConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trial file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse trial file: {}", path.display()))
}

fn app_config(path: Option<&Path>, ab_path: Option<PathBuf>) -> Result<AppConfig> {
    let config = AppConfig::load(path)?;
    Ok(match ab_path {
        Some(ab_path) => config.with_ab_path(ab_path),
        None => config,
    })
}

impl Cli {
    /// Execute the selected command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Serve { bind, ab_path } => {
                let mut config = app_config(self.config.as_deref(), ab_path)?;
                if let Some(bind) = bind {
                    config = config.with_bind(bind);
                }
                let controller = SessionController::new(config.supervisor, config.sessions);

                let availability = controller.check_availability().await;
                if !availability.available {
                    tracing::warn!(
                        ab = %controller.supervisor().config().ab_path.display(),
                        "ab is not available; trials will fail until it is installed"
                    );
                }
                server::serve(controller, config.server.bind).await
            }
            Commands::Run {
                file,
                ab_path,
                json,
            } => {
                let config = app_config(self.config.as_deref(), ab_path)?;
                let trial = load_trial(&file)?;
                run_trial(config, trial, json).await
            }
            Commands::Validate { file } => {
                let trial = load_trial(&file)?;
                let report = trial.validate();
                if report.is_ok() {
                    println!("✓ {} is valid", file.display());
                    return Ok(());
                }
                println!("✗ {} is invalid:", file.display());
                for error in &report.errors {
                    println!("  - {error}");
                }
                anyhow::bail!("{} validation error(s)", report.errors.len())
            }
            Commands::Check { ab_path } => {
                let config = app_config(self.config.as_deref(), ab_path)?;
                let supervisor = ProcessSupervisor::new(config.supervisor);
                let availability = supervisor.check_availability().await;
                let ab = supervisor.config().ab_path.display().to_string();
                if !availability.available {
                    anyhow::bail!("ab is not available at {ab}");
                }
                println!(
                    "✓ {ab} (ApacheBench {})",
                    availability.version.as_deref().unwrap_or("unknown version")
                );
                Ok(())
            }
        }
    }
}

async fn run_trial(config: AppConfig, trial: TrialConfig, json: bool) -> Result<()> {
    let supervisor = ProcessSupervisor::new(config.supervisor);
    let session_id = format!("cli-{}", std::process::id());

    if !json {
        println!("\n{}", "=".repeat(70));
        println!("   ab-bench - Apache Bench trial");
        println!("{}", "=".repeat(70));
        println!();
        println!("Configuration:");
        println!("  URL:          {}", trial.url);
        println!("  Method:       {}", trial.method);
        println!("  Requests:     {}", trial.requests);
        println!("  Concurrency:  {}", trial.concurrency);
        let keep_alive = if trial.keep_alive { "enabled" } else { "disabled" };
        println!("  Keep-alive:   {keep_alive}");
        println!("{}", "=".repeat(70));
        println!();
    }

    let stopper = supervisor.clone();
    let stop_id = session_id.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop(&stop_id);
        }
    });

    let sink: Arc<dyn LogSink> = if json {
        Arc::new(ab_bench_core::CollectingSink::new())
    } else {
        Arc::new(ConsoleSink)
    };
    let outcome = supervisor.run(&trial, &session_id, sink).await;
    ctrl_c.abort();

    match outcome? {
        RunOutcome::Completed(result) if json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        RunOutcome::Completed(result) => print_result(&result),
        RunOutcome::Cancelled => println!("\nTrial stopped."),
    }
    Ok(())
}

fn print_result(result: &TrialResult) {
    println!("\n{}", "=".repeat(70));
    println!("   Results");
    println!("{}", "=".repeat(70));
    println!(
        "  Server:              {} ({}:{})",
        result.server_software, result.server_hostname, result.server_port
    );
    println!(
        "  Document:            {} ({} bytes)",
        result.document_path, result.document_length
    );
    println!("  Time taken:          {:.3} s", result.time_taken_secs);
    println!("  Complete requests:   {}", result.complete_requests);
    println!("  Failed requests:     {}", result.failed_requests);
    println!("  Success rate:        {:.1}%", result.success_rate() * 100.0);
    println!("  Requests/sec:        {:.2}", result.requests_per_second);
    println!("  Time per request:    {:.3} ms", result.time_per_request_ms);
    println!("  Transfer rate:       {:.2} KB/s", result.transfer_rate_kbps);

    if !result.percentiles.is_empty() {
        println!("\n  Latency percentiles (ms):");
        for (percent, ms) in &result.percentiles {
            println!("    {percent:>3}%  {ms}");
        }
    }

    if let Some(breakdown) = &result.status_breakdown {
        println!("\n  Status codes:");
        for summary in &breakdown.summaries {
            println!("    {summary}");
        }
        for error in &breakdown.errors {
            println!("    ✗ {}", error.message);
        }
    }
    println!("{}", "=".repeat(70));
}
