//! Domain types for the poolwatch state store.
//!
//! A `HealthSnapshot` maps pool names to their reported status. A
//! `MonitorRecord` is what survives a restart: the baseline snapshot and
//! the time of the last notification attempt.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Name of a storage pool.
pub type PoolName = String;

/// Fixed-width, lexicographically sortable UTC timestamp layout.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// ── Pool status ────────────────────────────────────────────────────

/// Health status reported for a single pool.
///
/// Unrecognised strings are kept verbatim in `Other` so newer status
/// values still compare and persist correctly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PoolStatus {
    Online,
    Degraded,
    Faulted,
    Offline,
    Unavail,
    Removed,
    Other(String),
}

impl PoolStatus {
    /// The nominal status. Every other value counts as unhealthy.
    pub const NOMINAL: PoolStatus = PoolStatus::Online;

    pub fn as_str(&self) -> &str {
        match self {
            PoolStatus::Online => "ONLINE",
            PoolStatus::Degraded => "DEGRADED",
            PoolStatus::Faulted => "FAULTED",
            PoolStatus::Offline => "OFFLINE",
            PoolStatus::Unavail => "UNAVAIL",
            PoolStatus::Removed => "REMOVED",
            PoolStatus::Other(s) => s,
        }
    }

    pub fn is_nominal(&self) -> bool {
        *self == Self::NOMINAL
    }
}

impl From<&str> for PoolStatus {
    fn from(s: &str) -> Self {
        match s {
            "ONLINE" => PoolStatus::Online,
            "DEGRADED" => PoolStatus::Degraded,
            "FAULTED" => PoolStatus::Faulted,
            "OFFLINE" => PoolStatus::Offline,
            "UNAVAIL" => PoolStatus::Unavail,
            "REMOVED" => PoolStatus::Removed,
            other => PoolStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for PoolStatus {
    fn from(s: String) -> Self {
        PoolStatus::from(s.as_str())
    }
}

impl From<PoolStatus> for String {
    fn from(status: PoolStatus) -> Self {
        match status {
            PoolStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Health snapshot ────────────────────────────────────────────────

/// Every pool observed at one poll tick, keyed by name.
///
/// Backed by a `BTreeMap` so iteration (and the persisted JSON) is
/// always sorted by pool name. Equality compares key sets and values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<PoolName, PoolStatus>", into = "BTreeMap<PoolName, PoolStatus>")]
pub struct HealthSnapshot {
    pools: BTreeMap<PoolName, PoolStatus>,
}

/// One difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolChange {
    Appeared { pool: PoolName, status: PoolStatus },
    Disappeared { pool: PoolName, status: PoolStatus },
    Changed { pool: PoolName, from: PoolStatus, to: PoolStatus },
}

impl fmt::Display for PoolChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolChange::Appeared { pool, status } => write!(f, "{pool}: appeared as {status}"),
            PoolChange::Disappeared { pool, status } => {
                write!(f, "{pool}: disappeared (was {status})")
            }
            PoolChange::Changed { pool, from, to } => write!(f, "{pool}: {from} -> {to}"),
        }
    }
}

impl HealthSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from `(pool, status)` pairs.
    ///
    /// Fails on an empty pool name or a pool reported twice.
    pub fn from_pairs<I, N, S>(pairs: I) -> StateResult<Self>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<PoolName>,
        S: Into<PoolStatus>,
    {
        let mut snapshot = Self::new();
        for (name, status) in pairs {
            snapshot.insert(name, status)?;
        }
        Ok(snapshot)
    }

    /// Record the status of one pool.
    pub fn insert(
        &mut self,
        name: impl Into<PoolName>,
        status: impl Into<PoolStatus>,
    ) -> StateResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StateError::InvalidSnapshot("empty pool name".to_string()));
        }
        if self.pools.contains_key(&name) {
            return Err(StateError::InvalidSnapshot(format!(
                "pool reported twice: {name}"
            )));
        }
        self.pools.insert(name, status.into());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PoolStatus> {
        self.pools.get(name)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PoolName, &PoolStatus)> {
        self.pools.iter()
    }

    /// True when every pool reports the nominal status.
    pub fn is_healthy(&self) -> bool {
        self.pools.values().all(PoolStatus::is_nominal)
    }

    /// Pools whose status is not nominal, sorted by name.
    pub fn unhealthy_pools(&self) -> Vec<(&PoolName, &PoolStatus)> {
        self.pools.iter().filter(|(_, s)| !s.is_nominal()).collect()
    }

    /// Differences going from `self` (the baseline) to `current`.
    pub fn diff(&self, current: &HealthSnapshot) -> Vec<PoolChange> {
        let mut changes = Vec::new();
        for (pool, before) in &self.pools {
            match current.pools.get(pool) {
                None => changes.push(PoolChange::Disappeared {
                    pool: pool.clone(),
                    status: before.clone(),
                }),
                Some(after) if after != before => changes.push(PoolChange::Changed {
                    pool: pool.clone(),
                    from: before.clone(),
                    to: after.clone(),
                }),
                Some(_) => {}
            }
        }
        for (pool, status) in &current.pools {
            if !self.pools.contains_key(pool) {
                changes.push(PoolChange::Appeared {
                    pool: pool.clone(),
                    status: status.clone(),
                });
            }
        }
        changes
    }
}

/// One `pool<TAB>status` line per pool.
impl fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (pool, status) in &self.pools {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{pool}\t{status}")?;
            first = false;
        }
        Ok(())
    }
}

impl TryFrom<BTreeMap<PoolName, PoolStatus>> for HealthSnapshot {
    type Error = StateError;

    fn try_from(pools: BTreeMap<PoolName, PoolStatus>) -> StateResult<Self> {
        if pools.keys().any(|k| k.trim().is_empty()) {
            return Err(StateError::InvalidSnapshot("empty pool name".to_string()));
        }
        Ok(Self { pools })
    }
}

impl From<HealthSnapshot> for BTreeMap<PoolName, PoolStatus> {
    fn from(snapshot: HealthSnapshot) -> Self {
        snapshot.pools
    }
}

// ── Monitor record ─────────────────────────────────────────────────

/// State that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorRecord {
    /// Baseline for change detection. `None` until the first successful poll.
    pub last_snapshot: Option<HealthSnapshot>,
    /// Last notification attempt. `None` until one is ever made.
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl MonitorRecord {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// On-disk shape of the metadata document.
///
/// The metadata document is the commit point of a save: it carries the
/// baseline alongside `last_notified`, so both halves of a record change
/// in one rename. A document without a `snapshot` key (written by hand,
/// or by an operator who removed the key) defers to the snapshot file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorMeta {
    pub last_notified: Option<String>,
    /// `Some(None)` is an explicit `null`: committed with no baseline.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub snapshot: Option<Option<HealthSnapshot>>,
}

/// Distinguish a `null` value from a missing key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl MonitorMeta {
    pub fn from_record(record: &MonitorRecord) -> Self {
        Self {
            last_notified: record.last_notified_at.map(format_timestamp),
            snapshot: Some(record.last_snapshot.clone()),
        }
    }

    pub fn last_notified_at(&self) -> StateResult<Option<DateTime<Utc>>> {
        self.last_notified.as_deref().map(parse_timestamp).transpose()
    }
}

/// Format a timestamp as `YYYY-MM-DDTHH:MM:SSZ`. Sub-second precision is dropped.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp written by [`format_timestamp`].
pub fn parse_timestamp(s: &str) -> StateResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StateError::Deserialize(format!("bad timestamp {s:?}: {e}")))
}
