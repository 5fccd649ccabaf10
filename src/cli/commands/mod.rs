//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod analyze;
mod collect;
mod logs;
mod serve;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "errtriage")]
#[command(about = "Collect, classify and triage application error logs")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the daily log partitions (overrides config file)
    #[arg(long, global = true)]
    logs_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Shared date range arguments.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RangeArgs {
    /// First day (YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,
    /// Last day (YYYY-MM-DD, default: today)
    #[arg(long)]
    to: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily analysis and retry timers until Ctrl+C
    Serve,

    /// Ingest a JSON array of error logs from a file, or "-" for stdin
    Collect {
        input: PathBuf,
    },

    /// Run analysis for one day now
    Analyze {
        /// Day to analyze (YYYY-MM-DD, default: the last complete UTC day)
        #[arg(long)]
        day: Option<String>,
    },

    /// Retry failed analyses from recent days
    Retry {
        /// List pending and abandoned entries instead of retrying
        #[arg(long)]
        status: bool,
    },

    /// List error logs, newest first
    Ls {
        #[command(flatten)]
        range: RangeArgs,
        /// Filter by severity (critical, high, medium, low)
        #[arg(long)]
        severity: Option<String>,
        /// Filter by priority (high, medium, low)
        #[arg(long)]
        priority: Option<String>,
        /// Only logs not yet analyzed
        #[arg(long)]
        unanalyzed: bool,
        /// Filter by source (substring)
        #[arg(long)]
        source: Option<String>,
        /// Maximum logs to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show counts by severity, priority and recency
    Stats {
        #[command(flatten)]
        range: RangeArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set the resolution status of a log
    Resolve {
        /// Log ID
        id: String,
        /// open, in-progress, resolved or ignored
        #[arg(short, long, default_value = "resolved")]
        status: String,
        /// Who resolved it
        #[arg(short, long)]
        by: String,
    },

    /// Export logs for reporting
    Export {
        #[command(flatten)]
        range: RangeArgs,
        /// Export format (json, jsonl, csv)
        #[arg(short, long, default_value = "json")]
        format: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show recent analysis runs
    Runs {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Check that the analysis service is reachable
    Check,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        logs_path: cli.logs_path,
    };
    let settings = load_settings_with_options(options).await?;
    settings.ensure_directories()?;

    match cli.command {
        Commands::Serve => serve::cmd_serve(&settings).await,
        Commands::Collect { input } => collect::cmd_collect(&settings, &input).await,
        Commands::Analyze { day } => analyze::cmd_analyze(&settings, day.as_deref()).await,
        Commands::Retry { status } => {
            if status {
                analyze::cmd_retry_status(&settings).await
            } else {
                analyze::cmd_retry(&settings).await
            }
        }
        Commands::Ls {
            range,
            severity,
            priority,
            unanalyzed,
            source,
            limit,
            json,
        } => {
            logs::cmd_ls(
                &settings,
                &range,
                severity.as_deref(),
                priority.as_deref(),
                unanalyzed,
                source,
                limit,
                json,
            )
            .await
        }
        Commands::Stats { range, json } => logs::cmd_stats(&settings, &range, json).await,
        Commands::Resolve { id, status, by } => {
            logs::cmd_resolve(&settings, &id, &status, &by).await
        }
        Commands::Export {
            range,
            format,
            output,
        } => logs::cmd_export(&settings, &range, &format, output.as_deref()).await,
        Commands::Runs { limit } => status::cmd_runs(&settings, limit).await,
        Commands::Check => status::cmd_check(&settings).await,
    }
}
