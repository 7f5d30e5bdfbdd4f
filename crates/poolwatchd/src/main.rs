//! poolwatchd — periodic storage pool health checks with email alerts.
//!
//! # Usage
//!
//! ```text
//! poolwatchd run --config /etc/poolwatch.toml
//! poolwatchd run --dry-run --once
//! poolwatchd status
//! poolwatchd config --poll-interval 1h
//! ```

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use poolwatch_state::RecordStore;
use poolwatchd::config::{Overrides, PoolwatchConfig};
use poolwatchd::daemon::{self, RunOptions};
use poolwatchd::status;

#[derive(Parser)]
#[command(name = "poolwatchd", about = "Pool health monitor daemon", version)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Poll pool health and send alerts until stopped.
    Run {
        /// Configuration file (defaults to /etc/poolwatch.toml if present).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the poll interval, e.g. `8h` or `30m`.
        #[arg(long)]
        poll_interval: Option<String>,

        /// Override the reminder interval, e.g. `7d`.
        #[arg(long)]
        reminder_interval: Option<String>,

        /// Print notifications to stdout and do not persist state.
        #[arg(long)]
        dry_run: bool,

        /// Run one tick and exit.
        #[arg(long)]
        once: bool,
    },

    /// Validate the configuration and print it with defaults filled in.
    Config {
        /// Configuration file (defaults to /etc/poolwatch.toml if present).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the poll interval, e.g. `8h` or `30m`.
        #[arg(long)]
        poll_interval: Option<String>,

        /// Override the reminder interval, e.g. `7d`.
        #[arg(long)]
        reminder_interval: Option<String>,
    },

    /// Show the persisted monitor state.
    Status {
        /// Configuration file (defaults to /etc/poolwatch.toml if present).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            poll_interval,
            reminder_interval,
            dry_run,
            once,
        } => {
            daemon::run(RunOptions {
                config,
                overrides: Overrides {
                    poll_interval,
                    reminder_interval,
                },
                dry_run,
                once,
            })
            .await
        }
        Command::Config {
            config,
            poll_interval,
            reminder_interval,
        } => {
            let config = PoolwatchConfig::effective(
                config.as_deref(),
                &Overrides {
                    poll_interval,
                    reminder_interval,
                },
            )?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Status { config } => {
            let config = PoolwatchConfig::load(config.as_deref())?;
            let policy = config.policy()?;
            let store = config.state_store();
            let record = store.load()?;
            print!(
                "{}",
                status::render(&record, &store, policy.reminder_interval(), Utc::now())
            );
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,poolwatchd=debug,poolwatch_monitor=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
