//! `poolwatchd run`: assemble the engine from configuration and drive it.

use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use poolwatch_monitor::{
    ConsoleNotifier, EnvSecrets, MonitorEngine, Notifier, SmtpNotifier, TickOutcome,
};
use poolwatch_state::{MemoryStore, RecordStore};

use crate::config::{Overrides, PoolwatchConfig};

/// Options for the `run` subcommand.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub overrides: Overrides,
    /// Print notifications instead of mailing them and keep state in memory.
    pub dry_run: bool,
    /// Run a single tick and exit.
    pub once: bool,
}

/// Build a [`MonitorEngine`] from a loaded configuration.
pub fn build_engine(config: &PoolwatchConfig, dry_run: bool) -> anyhow::Result<MonitorEngine> {
    let policy = config.policy().context("invalid [monitor] settings")?;
    let header = config.contact_header(dry_run)?;
    let sampler = config.sampler(policy.sample_timeout())?;
    let file_store = config.state_store();

    let (store, notifier): (Box<dyn RecordStore>, Box<dyn Notifier>) = if dry_run {
        // Start from the real baseline but never write it back.
        let record = file_store.load()?;
        info!("dry run: notifications go to stdout, state is not saved");
        (
            Box::new(MemoryStore::with_record(record)) as Box<dyn RecordStore>,
            Box::new(ConsoleNotifier) as Box<dyn Notifier>,
        )
    } else {
        SmtpNotifier::check_addresses(&header)?;
        let smtp = SmtpNotifier::new(&config.smtp(policy.notify_timeout()), &EnvSecrets)?;
        info!(
            server = %config.notify.smtp_server,
            port = config.notify.smtp_port,
            recipient = %header.recipient,
            "SMTP notifier configured"
        );
        (
            Box::new(file_store) as Box<dyn RecordStore>,
            Box::new(smtp) as Box<dyn Notifier>,
        )
    };

    let engine = MonitorEngine::new(policy, store, Box::new(sampler), notifier, header)
        .context("failed to load monitor state")?;
    Ok(engine)
}

pub async fn run(options: RunOptions) -> anyhow::Result<()> {
    let config = PoolwatchConfig::effective(options.config.as_deref(), &options.overrides)?;

    let mut engine = build_engine(&config, options.dry_run)?;

    if options.once {
        return match engine.tick().await {
            TickOutcome::SampleFailed => anyhow::bail!("pool sampling failed"),
            outcome => {
                info!(?outcome, "single tick complete");
                Ok(())
            }
        };
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    engine.run(shutdown_rx).await;
    info!("poolwatchd stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot install SIGTERM handler"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot install Ctrl-C handler; running until killed");
        std::future::pending::<()>().await;
    }
}
