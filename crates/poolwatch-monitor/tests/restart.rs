//! Restart tests.
//!
//! Drive the engine against the file-backed store, drop it, and build a
//! new engine over the same files to check that the debounce state
//! survives a process restart.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use poolwatch_monitor::notifier::NotifyFuture;
use poolwatch_monitor::sampler::SampleFuture;
use poolwatch_monitor::*;
use poolwatch_state::{HealthSnapshot, RecordStore, StateStore};

#[derive(Clone)]
struct FixedSampler(Arc<Mutex<HealthSnapshot>>);

impl FixedSampler {
    fn new(snapshot: HealthSnapshot) -> Self {
        Self(Arc::new(Mutex::new(snapshot)))
    }

    fn set(&self, snapshot: HealthSnapshot) {
        *self.0.lock().unwrap() = snapshot;
    }
}

impl Sampler for FixedSampler {
    fn sample(&self) -> SampleFuture<'_> {
        let snapshot = self.0.lock().unwrap().clone();
        Box::pin(async move {
            Ok(Sample {
                detail: snapshot.to_string(),
                snapshot,
            })
        })
    }
}

#[derive(Clone, Default)]
struct CountingNotifier(Arc<Mutex<Vec<NotifyReason>>>);

impl CountingNotifier {
    fn reasons(&self) -> Vec<NotifyReason> {
        self.0.lock().unwrap().clone()
    }
}

impl Notifier for CountingNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> NotifyFuture<'a> {
        self.0.lock().unwrap().push(notification.reason);
        Box::pin(async { Ok(()) })
    }
}

fn snap(pairs: &[(&str, &str)]) -> HealthSnapshot {
    HealthSnapshot::from_pairs(pairs.iter().copied()).unwrap()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 6, 0, 0).unwrap()
}

fn engine(store: &StateStore, sampler: &FixedSampler, notifier: &CountingNotifier) -> MonitorEngine {
    let policy = Policy::new(
        Duration::from_secs(8 * 3600),
        Duration::from_secs(7 * 86_400),
    )
    .unwrap();
    MonitorEngine::new(
        policy,
        Box::new(store.clone()),
        Box::new(sampler.clone()),
        Box::new(notifier.clone()),
        ContactHeader {
            sender: "monitor@example.com".to_string(),
            recipient: "ops@example.com".to_string(),
            hostname: "nas01".to_string(),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn debounce_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::in_dir(dir.path());
    let sampler = FixedSampler::new(snap(&[("tank", "ONLINE")]));
    let notifier = CountingNotifier::default();

    {
        let mut first = engine(&store, &sampler, &notifier);
        assert_eq!(first.tick_at(t0()).await, TickOutcome::Seeded);

        sampler.set(snap(&[("tank", "DEGRADED")]));
        assert!(matches!(
            first.tick_at(t0() + TimeDelta::hours(8)).await,
            TickOutcome::Notified { reason: NotifyReason::Transition, .. }
        ));
    }

    // Same condition after a restart: no repeat alert.
    let mut second = engine(&store, &sampler, &notifier);
    assert_eq!(second.state(), MonitorState::UnhealthyAwaitingReminder);
    assert_eq!(
        second.tick_at(t0() + TimeDelta::days(2)).await,
        TickOutcome::Quiet
    );

    // The reminder clock also carried over.
    assert!(matches!(
        second.tick_at(t0() + TimeDelta::days(8)).await,
        TickOutcome::Notified { reason: NotifyReason::Reminder, .. }
    ));
    assert_eq!(
        notifier.reasons(),
        vec![NotifyReason::Transition, NotifyReason::Reminder]
    );
}

#[tokio::test]
async fn restart_with_unhealthy_pool_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::in_dir(dir.path());
    let sampler = FixedSampler::new(snap(&[("tank", "FAULTED"), ("backup", "ONLINE")]));
    let notifier = CountingNotifier::default();

    let mut first = engine(&store, &sampler, &notifier);
    assert_eq!(first.tick_at(t0()).await, TickOutcome::Seeded);
    drop(first);

    let mut second = engine(&store, &sampler, &notifier);
    assert_eq!(second.tick_at(t0() + TimeDelta::days(30)).await, TickOutcome::Quiet);
    assert!(notifier.reasons().is_empty());
    assert_eq!(store.load().unwrap().last_notified_at, None);
}

#[tokio::test]
async fn corrupt_state_fails_engine_construction() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::in_dir(dir.path());
    std::fs::write(store.snapshot_path(), "not json").unwrap();

    let result = MonitorEngine::new(
        Policy::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap(),
        Box::new(store),
        Box::new(FixedSampler::new(snap(&[("tank", "ONLINE")]))),
        Box::new(CountingNotifier::default()),
        ContactHeader {
            sender: "a@example.com".to_string(),
            recipient: "b@example.com".to_string(),
            hostname: "h".to_string(),
        },
    );
    assert!(result.is_err());
}
