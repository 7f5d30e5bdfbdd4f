//! `poolwatchd status`: summarize the persisted monitor record.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};

use poolwatch_monitor::MonitorState;
use poolwatch_monitor::decision::next_reminder_due;
use poolwatch_state::{MonitorRecord, StateStore, format_timestamp};

/// Human-readable report of `record` as seen at `now`.
pub fn render(
    record: &MonitorRecord,
    store: &StateStore,
    reminder_interval: Duration,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let state = MonitorState::derive(record);

    let _ = writeln!(out, "state:          {state}");
    let _ = writeln!(out, "snapshot file:  {}", store.snapshot_path().display());
    let _ = writeln!(out, "meta file:      {}", store.meta_path().display());
    let _ = writeln!(
        out,
        "last notified:  {}",
        record
            .last_notified_at
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string())
    );

    if let Some(due) = next_reminder_due(record, reminder_interval) {
        let note = if due < now { " (overdue)" } else { "" };
        let _ = writeln!(out, "next reminder:  {}{note}", format_timestamp(due));
    }

    if let Some(snapshot) = &record.last_snapshot {
        let _ = writeln!(out, "pools:          {}", snapshot.len());
        for (name, status) in snapshot.iter() {
            let marker = if status.is_nominal() { " " } else { "!" };
            let _ = writeln!(out, "  {marker} {name}\t{status}");
        }
    }
    out
}
