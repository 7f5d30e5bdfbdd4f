//! Pool health sampling.
//!
//! The engine only sees the [`Sampler`] trait. [`CommandSampler`] is the
//! production implementation: it runs a list command that prints one
//! `name<TAB>status` line per pool (`zpool list -H -o name,health`) and a
//! detail command whose full output is attached to notifications.
//!
//! Both commands share one deadline. The detail command only gets what
//! the list command left over, and running out of time there costs the
//! detail text, not the sample.

use std::future::Future;
use std::pin::Pin;
use std::process::Output;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use poolwatch_state::HealthSnapshot;

use crate::error::SampleError;

/// One poll result: the parsed snapshot plus the raw diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub snapshot: HealthSnapshot,
    pub detail: String,
}

/// Boxed future returned by [`Sampler::sample`].
pub type SampleFuture<'a> = Pin<Box<dyn Future<Output = Result<Sample, SampleError>> + Send + 'a>>;

/// Source of pool health snapshots.
///
/// Implementations are expected to finish within the configured sample
/// timeout. The engine enforces a backstop slightly beyond it.
pub trait Sampler: Send + Sync {
    fn sample(&self) -> SampleFuture<'_>;
}

/// Samples pool health by running external commands.
#[derive(Debug, Clone)]
pub struct CommandSampler {
    list_command: Vec<String>,
    detail_command: Option<Vec<String>>,
    timeout: Duration,
}

impl CommandSampler {
    pub fn new(list_command: Vec<String>, timeout: Duration) -> Self {
        Self {
            list_command,
            detail_command: None,
            timeout,
        }
    }

    /// Attach a command whose output becomes the unabridged detail text.
    pub fn with_detail_command(mut self, command: Vec<String>) -> Self {
        self.detail_command = Some(command);
        self
    }

    async fn sample_inner(&self) -> Result<Sample, SampleError> {
        let deadline = Instant::now() + self.timeout;
        let output = run_command(&self.list_command, deadline, self.timeout).await?;
        if !output.status.success() {
            return Err(SampleError::CommandFailed {
                command: self.list_command.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let snapshot = parse_pool_list(&String::from_utf8_lossy(&output.stdout))?;

        let detail = match &self.detail_command {
            Some(command) => match run_command(command, deadline, self.timeout).await {
                Ok(out) => combined_output(&out),
                Err(e) => {
                    warn!(error = %e, "detail command failed");
                    format!("(detail unavailable: {e})")
                }
            },
            None => snapshot.to_string(),
        };

        debug!(pools = snapshot.len(), healthy = snapshot.is_healthy(), "pools sampled");
        Ok(Sample { snapshot, detail })
    }
}

impl Sampler for CommandSampler {
    fn sample(&self) -> SampleFuture<'_> {
        Box::pin(self.sample_inner())
    }
}

/// Run `argv` to completion, killing it if it is still running at `deadline`.
///
/// `budget` is the whole sampling allowance, reported on timeout.
async fn run_command(
    argv: &[String],
    deadline: Instant,
    budget: Duration,
) -> Result<Output, SampleError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(SampleError::Spawn {
            command: String::new(),
            reason: "empty command".to_string(),
        });
    };

    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout_at(deadline, child).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(SampleError::Spawn {
            command: argv.join(" "),
            reason: e.to_string(),
        }),
        Err(_) => Err(SampleError::Timeout(budget)),
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}

/// Parse `name status` lines (tab or space separated) into a snapshot.
///
/// Extra columns are ignored. Blank lines are skipped.
pub fn parse_pool_list(text: &str) -> Result<HealthSnapshot, SampleError> {
    let mut snapshot = HealthSnapshot::new();
    for (lineno, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else {
            continue;
        };
        let Some(status) = fields.next() else {
            return Err(SampleError::Malformed(format!(
                "line {}: expected `name status`, got {line:?}",
                lineno + 1
            )));
        };
        snapshot
            .insert(name, status)
            .map_err(|e| SampleError::Malformed(format!("line {}: {e}", lineno + 1)))?;
    }
    if snapshot.is_empty() {
        return Err(SampleError::Empty);
    }
    Ok(snapshot)
}
