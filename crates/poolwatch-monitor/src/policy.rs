//! Policy parameters, fixed for the lifetime of the process.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default bound on a single sampling call.
pub const DEFAULT_SAMPLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time the engine allows a sampler past `sample_timeout` before
/// abandoning it. Samplers enforce the timeout themselves; this only
/// catches ones that do not.
pub const SAMPLE_GRACE: Duration = Duration::from_secs(5);

/// Default bound on a single delivery attempt.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(90);

/// When a notification counts as "sent" for debounce purposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryPolicy {
    /// Every attempt advances the last-notified time, even if delivery fails.
    #[default]
    MarkOnAttempt,
    /// Only confirmed deliveries advance state; failures are retried next tick.
    MarkOnSuccess,
}

/// Validated monitor timing and delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    poll_interval: Duration,
    reminder_interval: Duration,
    sample_timeout: Duration,
    notify_timeout: Duration,
    delivery: DeliveryPolicy,
}

impl Policy {
    /// Both intervals must be non-zero.
    pub fn new(poll_interval: Duration, reminder_interval: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            poll_interval: positive("poll_interval", poll_interval)?,
            reminder_interval: positive("reminder_interval", reminder_interval)?,
            sample_timeout: DEFAULT_SAMPLE_TIMEOUT,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            delivery: DeliveryPolicy::default(),
        })
    }

    pub fn with_timeouts(
        mut self,
        sample_timeout: Duration,
        notify_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        self.sample_timeout = positive("sample_timeout", sample_timeout)?;
        self.notify_timeout = positive("notify_timeout", notify_timeout)?;
        Ok(self)
    }

    pub fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn reminder_interval(&self) -> Duration {
        self.reminder_interval
    }

    pub fn sample_timeout(&self) -> Duration {
        self.sample_timeout
    }

    /// Outer bound the engine puts on one `Sampler::sample` call.
    pub fn sample_backstop(&self) -> Duration {
        self.sample_timeout.saturating_add(SAMPLE_GRACE)
    }

    pub fn notify_timeout(&self) -> Duration {
        self.notify_timeout
    }

    pub fn delivery(&self) -> DeliveryPolicy {
        self.delivery
    }
}

fn positive(name: &'static str, d: Duration) -> Result<Duration, ConfigError> {
    if d.is_zero() {
        Err(ConfigError::NonPositive { name })
    } else {
        Ok(d)
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "8h", "7d" or "1.5h".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = |reason: &str| ConfigError::Duration {
        value: s.to_string(),
        reason: reason.to_string(),
    };

    let (number, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000.0)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86_400_000.0)
    } else {
        (s, 1_000.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| invalid("expected a number with an optional ms/s/m/h/d suffix"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid("must be a finite, non-negative number"));
    }
    Duration::try_from_secs_f64(value * unit_ms / 1_000.0).map_err(|e| invalid(&e.to_string()))
}
