//! Per-tick notification decision.
//!
//! Pure function of the persisted record, the fresh snapshot, the
//! current time and the reminder interval. The engine applies the
//! resulting [`Action`]; nothing here performs I/O.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use poolwatch_state::{HealthSnapshot, MonitorRecord};

/// Why a notification is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReason {
    /// The snapshot differs from the baseline.
    Transition,
    /// Nothing changed, but the pools are still unhealthy and the reminder
    /// interval has elapsed since the last notification.
    Reminder,
}

impl fmt::Display for NotifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyReason::Transition => f.write_str("transition"),
            NotifyReason::Reminder => f.write_str("reminder"),
        }
    }
}

/// What the engine should do with this tick's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// First observation: store it as the baseline without notifying.
    Seed,
    /// Send a notification.
    Notify(NotifyReason),
    /// Nothing to do; no write.
    Quiet,
}

/// Outcome of [`evaluate`], with the intermediate flags kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub healthy: bool,
    pub changed: bool,
    pub outstanding: bool,
    pub action: Action,
}

impl Decision {
    /// A genuine transition, as opposed to a reminder that happens to
    /// coincide with one.
    pub fn is_pure_transition(&self) -> bool {
        self.changed && !self.outstanding
    }
}

/// Decide what to do with `current`, given the persisted `record`.
pub fn evaluate(
    record: &MonitorRecord,
    current: &HealthSnapshot,
    now: DateTime<Utc>,
    reminder_interval: Duration,
) -> Decision {
    let healthy = current.is_healthy();
    let changed = record
        .last_snapshot
        .as_ref()
        .is_some_and(|baseline| baseline != current);
    let outstanding = !healthy
        && record
            .last_notified_at
            .is_some_and(|last| elapsed_exceeds(last, now, reminder_interval));

    let action = if changed {
        Action::Notify(NotifyReason::Transition)
    } else if outstanding {
        Action::Notify(NotifyReason::Reminder)
    } else if record.last_snapshot.is_none() {
        Action::Seed
    } else {
        Action::Quiet
    };

    Decision {
        healthy,
        changed,
        outstanding,
        action,
    }
}

/// Strictly more than `interval` has passed between `since` and `now`.
///
/// A clock that moved backwards never counts as elapsed.
fn elapsed_exceeds(since: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> bool {
    (now - since)
        .to_std()
        .map(|elapsed| elapsed > interval)
        .unwrap_or(false)
}

/// Conceptual monitor state, derived from a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No baseline recorded yet.
    Uninitialized,
    /// Every pool in the baseline is nominal.
    Healthy,
    /// Unhealthy baseline, never notified.
    UnhealthyUnnotified,
    /// Unhealthy baseline with a prior notification; the reminder timer runs.
    UnhealthyAwaitingReminder,
}

impl MonitorState {
    pub fn derive(record: &MonitorRecord) -> Self {
        match &record.last_snapshot {
            None => MonitorState::Uninitialized,
            Some(s) if s.is_healthy() => MonitorState::Healthy,
            Some(_) if record.last_notified_at.is_some() => {
                MonitorState::UnhealthyAwaitingReminder
            }
            Some(_) => MonitorState::UnhealthyUnnotified,
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MonitorState::Uninitialized => "uninitialized",
            MonitorState::Healthy => "healthy",
            MonitorState::UnhealthyUnnotified => "unhealthy (not yet notified)",
            MonitorState::UnhealthyAwaitingReminder => "unhealthy (awaiting reminder)",
        };
        f.write_str(s)
    }
}

/// Earliest time a reminder could fire for `record`, if one is pending.
pub fn next_reminder_due(
    record: &MonitorRecord,
    reminder_interval: Duration,
) -> Option<DateTime<Utc>> {
    if MonitorState::derive(record) != MonitorState::UnhealthyAwaitingReminder {
        return None;
    }
    let last = record.last_notified_at?;
    let interval = chrono::TimeDelta::from_std(reminder_interval).ok()?;
    last.checked_add_signed(interval)
}
