//! Monitor engine — the sequential sample → decide → notify → persist loop.
//!
//! The engine owns the in-memory [`MonitorRecord`], loaded once at
//! startup. Each tick reads it, possibly notifies, updates it, and writes
//! it back. A failed write is logged and the in-memory record stays
//! authoritative until the next successful save.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use poolwatch_state::{HealthSnapshot, MonitorRecord, RecordStore, StateResult};

use crate::decision::{self, Action, Decision, MonitorState, NotifyReason};
use crate::error::{NotifyError, SampleError};
use crate::notifier::{ContactHeader, Notification, Notifier};
use crate::policy::{DeliveryPolicy, Policy};
use crate::sampler::{Sample, Sampler};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No usable snapshot; nothing decided, nothing written.
    SampleFailed,
    /// First observation stored as the baseline.
    Seeded,
    /// No change and no reminder due.
    Quiet,
    /// A notification was attempted.
    Notified { reason: NotifyReason, delivered: bool },
}

/// Polls pool health and sends debounced notifications.
pub struct MonitorEngine {
    policy: Policy,
    store: Box<dyn RecordStore>,
    sampler: Box<dyn Sampler>,
    notifier: Box<dyn Notifier>,
    header: ContactHeader,
    record: MonitorRecord,
}

impl MonitorEngine {
    /// Create an engine, loading the persisted record.
    ///
    /// A load failure is returned to the caller; state integrity cannot be
    /// assumed, so startup should abort.
    pub fn new(
        policy: Policy,
        store: Box<dyn RecordStore>,
        sampler: Box<dyn Sampler>,
        notifier: Box<dyn Notifier>,
        header: ContactHeader,
    ) -> StateResult<Self> {
        let record = store.load()?;
        info!(
            state = %MonitorState::derive(&record),
            last_notified = ?record.last_notified_at,
            "monitor record loaded"
        );
        Ok(Self {
            policy,
            store,
            sampler,
            notifier,
            header,
            record,
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// The in-memory record (reflects the last tick, saved or not).
    pub fn record(&self) -> &MonitorRecord {
        &self.record
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::derive(&self.record)
    }

    /// Run one tick against the wall clock.
    pub async fn tick(&mut self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick, treating `now` as the current time.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let Some(sample) = self.sample().await else {
            return TickOutcome::SampleFailed;
        };
        let Sample { snapshot, detail } = sample;

        let decision = decision::evaluate(
            &self.record,
            &snapshot,
            now,
            self.policy.reminder_interval(),
        );
        debug!(
            healthy = decision.healthy,
            changed = decision.changed,
            outstanding = decision.outstanding,
            action = ?decision.action,
            "tick evaluated"
        );

        match decision.action {
            Action::Seed => {
                info!(pools = snapshot.len(), healthy = decision.healthy, "baseline recorded");
                self.record.last_snapshot = Some(snapshot);
                self.persist();
                TickOutcome::Seeded
            }
            Action::Quiet => TickOutcome::Quiet,
            Action::Notify(reason) => self.notify(reason, &decision, snapshot, detail, now).await,
        }
    }

    /// Run until `shutdown` fires. The current tick always completes; only
    /// the sleep between ticks is interrupted.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.policy.poll_interval(),
            reminder_interval = ?self.policy.reminder_interval(),
            delivery = ?self.policy.delivery(),
            "pool monitor started"
        );

        loop {
            let outcome = self.tick().await;
            debug!(?outcome, "tick complete");

            tokio::select! {
                _ = tokio::time::sleep(self.policy.poll_interval()) => {}
                _ = shutdown.changed() => {
                    info!("pool monitor shutting down");
                    break;
                }
            }
        }
    }

    async fn sample(&self) -> Option<Sample> {
        let timeout = self.policy.sample_backstop();
        match tokio::time::timeout(timeout, self.sampler.sample()).await {
            Ok(Ok(sample)) => Some(sample),
            Ok(Err(e)) => {
                error!(error = %e, "pool sampling failed; skipping tick");
                None
            }
            Err(_) => {
                error!(error = %SampleError::Timeout(timeout), "pool sampling failed; skipping tick");
                None
            }
        }
    }

    async fn notify(
        &mut self,
        reason: NotifyReason,
        decision: &Decision,
        snapshot: HealthSnapshot,
        detail: String,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        if decision.is_pure_transition() {
            log_transition(self.record.last_snapshot.as_ref(), &snapshot);
        }

        let notification = Notification::new(reason, &snapshot, detail, self.header.clone());
        let delivered = self.deliver(&notification).await;

        if delivered || self.policy.delivery() == DeliveryPolicy::MarkOnAttempt {
            self.record.last_notified_at = Some(now);
            if decision.changed {
                self.record.last_snapshot = Some(snapshot);
            }
            self.persist();
        } else {
            warn!(%reason, "delivery unconfirmed; state left unchanged for retry");
        }

        TickOutcome::Notified { reason, delivered }
    }

    async fn deliver(&self, notification: &Notification) -> bool {
        let timeout = self.policy.notify_timeout();
        info!(
            reason = %notification.reason,
            recipient = %notification.header.recipient,
            "notifying recipient"
        );
        match tokio::time::timeout(timeout, self.notifier.notify(notification)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, reason = %notification.reason, "failed to notify recipient");
                false
            }
            Err(_) => {
                let e = NotifyError::Timeout(timeout);
                error!(error = %e, reason = %notification.reason, "failed to notify recipient");
                false
            }
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.record) {
            error!(error = %e, "failed to persist monitor record; will retry on next write");
        }
    }
}

fn log_transition(baseline: Option<&HealthSnapshot>, current: &HealthSnapshot) {
    info!(healthy = current.is_healthy(), "pool status changed");
    if let Some(baseline) = baseline {
        for change in baseline.diff(current) {
            info!(%change, "pool change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};
    use poolwatch_state::MemoryStore;

    use crate::notifier::NotifyFuture;
    use crate::sampler::SampleFuture;

    const HOURS_8: Duration = Duration::from_secs(8 * 3600);
    const WEEK: Duration = Duration::from_secs(7 * 86_400);

    /// Returns scripted results in order; repeats the last snapshot forever.
    #[derive(Clone, Default)]
    struct ScriptedSampler {
        script: Arc<Mutex<VecDeque<Result<HealthSnapshot, String>>>>,
        last: Arc<Mutex<Option<HealthSnapshot>>>,
    }

    impl ScriptedSampler {
        fn push(&self, snapshot: HealthSnapshot) {
            self.script.lock().unwrap().push_back(Ok(snapshot));
        }

        fn push_err(&self, msg: &str) {
            self.script.lock().unwrap().push_back(Err(msg.to_string()));
        }
    }

    impl Sampler for ScriptedSampler {
        fn sample(&self) -> SampleFuture<'_> {
            let next = self.script.lock().unwrap().pop_front();
            let result = match next {
                Some(Ok(snapshot)) => {
                    *self.last.lock().unwrap() = Some(snapshot.clone());
                    Ok(snapshot)
                }
                Some(Err(msg)) => Err(SampleError::Malformed(msg)),
                None => self.last.lock().unwrap().clone().ok_or(SampleError::Empty),
            };
            Box::pin(async move {
                result.map(|snapshot| Sample {
                    detail: format!("raw:\n{snapshot}"),
                    snapshot,
                })
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<Notification>>>,
        failing: Arc<Mutex<bool>>,
    }

    impl RecordingNotifier {
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn set_failing(&self, failing: bool) {
            *self.failing.lock().unwrap() = failing;
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify<'a>(&'a self, notification: &'a Notification) -> NotifyFuture<'a> {
            self.sent.lock().unwrap().push(notification.clone());
            let failing = *self.failing.lock().unwrap();
            Box::pin(async move {
                if failing {
                    Err(NotifyError::Delivery("relay unreachable".to_string()))
                } else {
                    Ok(())
                }
            })
        }
    }

    struct Harness {
        engine: MonitorEngine,
        sampler: ScriptedSampler,
        notifier: RecordingNotifier,
        store: MemoryStore,
    }

    fn harness_with(store: MemoryStore, policy: Policy) -> Harness {
        let sampler = ScriptedSampler::default();
        let notifier = RecordingNotifier::default();
        let engine = MonitorEngine::new(
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
        .unwrap();
        Harness {
            engine,
            sampler,
            notifier,
            store,
        }
    }

    fn harness(store: MemoryStore) -> Harness {
        harness_with(store, Policy::new(HOURS_8, WEEK).unwrap())
    }

    fn snap(pairs: &[(&str, &str)]) -> HealthSnapshot {
        HealthSnapshot::from_pairs(pairs.iter().copied()).unwrap()
    }

    fn baseline(snapshot: HealthSnapshot) -> MemoryStore {
        MemoryStore::with_record(MonitorRecord {
            last_snapshot: Some(snapshot),
            last_notified_at: None,
        })
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn unchanged_snapshot_twice_writes_baseline_once() {
        let mut h = harness(MemoryStore::new());
        let s = snap(&[("tank", "ONLINE"), ("backup", "ONLINE")]);
        h.sampler.push(s.clone());
        h.sampler.push(s.clone());

        assert_eq!(h.engine.tick_at(t0()).await, TickOutcome::Seeded);
        assert_eq!(
            h.engine.tick_at(t0() + TimeDelta::hours(8)).await,
            TickOutcome::Quiet
        );

        assert_eq!(h.notifier.count(), 0);
        assert_eq!(h.store.save_count(), 1);
        assert_eq!(h.store.record().last_snapshot, Some(s));
    }

    #[tokio::test]
    async fn no_startup_notification_for_unhealthy_pool() {
        let mut h = harness(MemoryStore::new());
        h.sampler.push(snap(&[("tank", "FAULTED")]));

        assert_eq!(h.engine.tick_at(t0()).await, TickOutcome::Seeded);
        assert_eq!(h.notifier.count(), 0);
        assert_eq!(h.store.save_count(), 1);
        assert_eq!(h.store.record().last_notified_at, None);
        assert_eq!(h.engine.state(), MonitorState::UnhealthyUnnotified);
    }

    #[tokio::test]
    async fn change_fires_one_notification_and_updates_baseline() {
        let mut h = harness(baseline(snap(&[("poolA", "ONLINE")])));
        let degraded = snap(&[("poolA", "DEGRADED")]);
        h.sampler.push(degraded.clone());

        let outcome = h.engine.tick_at(t0()).await;
        assert_eq!(
            outcome,
            TickOutcome::Notified {
                reason: NotifyReason::Transition,
                delivered: true
            }
        );
        assert_eq!(h.notifier.count(), 1);

        let record = h.store.record();
        assert_eq!(record.last_snapshot, Some(degraded));
        assert_eq!(record.last_notified_at, Some(t0()));

        let sent = h.notifier.sent.lock().unwrap()[0].clone();
        assert_eq!(sent.summary, "poolA\tDEGRADED");
        assert!(sent.detail.starts_with("raw:"));
        assert_eq!(sent.subject(), "Pool status on nas01");
    }

    #[tokio::test]
    async fn key_set_change_notifies() {
        let mut h = harness(baseline(snap(&[("poolA", "ONLINE")])));
        h.sampler.push(snap(&[("poolA", "ONLINE"), ("poolB", "FAULTED")]));

        assert!(matches!(
            h.engine.tick_at(t0()).await,
            TickOutcome::Notified { reason: NotifyReason::Transition, .. }
        ));
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test]
    async fn flap_suppression_then_single_reminder() {
        let mut h = harness(baseline(snap(&[("poolA", "ONLINE")])));
        let degraded = snap(&[("poolA", "DEGRADED")]);
        h.sampler.push(degraded.clone());

        // Day 0: the transition itself.
        h.engine.tick_at(t0()).await;
        assert_eq!(h.notifier.count(), 1);

        // Every 8 hours for 6 days: nothing.
        let mut now = t0();
        for _ in 0..18 {
            now += TimeDelta::hours(8);
            assert_eq!(h.engine.tick_at(now).await, TickOutcome::Quiet);
        }
        assert_eq!(h.notifier.count(), 1);

        // Day 8: exactly one reminder.
        let day8 = t0() + TimeDelta::days(8);
        assert_eq!(
            h.engine.tick_at(day8).await,
            TickOutcome::Notified {
                reason: NotifyReason::Reminder,
                delivered: true
            }
        );
        assert_eq!(
            h.engine.tick_at(day8 + TimeDelta::hours(8)).await,
            TickOutcome::Quiet
        );
        assert_eq!(h.notifier.count(), 2);

        let record = h.store.record();
        assert_eq!(record.last_notified_at, Some(day8));
        assert_eq!(record.last_snapshot, Some(degraded));
        assert_eq!(
            h.notifier.sent.lock().unwrap()[1].subject(),
            "[reminder] Pool status on nas01"
        );
    }

    #[tokio::test]
    async fn reminder_leaves_baseline_untouched() {
        let degraded = snap(&[("poolA", "DEGRADED")]);
        let store = MemoryStore::with_record(MonitorRecord {
            last_snapshot: Some(degraded.clone()),
            last_notified_at: Some(t0()),
        });
        let mut h = harness(store);
        h.sampler.push(degraded.clone());

        let day8 = t0() + TimeDelta::days(8);
        assert!(matches!(
            h.engine.tick_at(day8).await,
            TickOutcome::Notified { reason: NotifyReason::Reminder, .. }
        ));
        assert_eq!(h.store.record().last_snapshot, Some(degraded));
        assert_eq!(h.store.record().last_notified_at, Some(day8));
    }

    #[tokio::test]
    async fn recovery_notifies_once_then_stays_quiet() {
        let store = MemoryStore::with_record(MonitorRecord {
            last_snapshot: Some(snap(&[("poolA", "DEGRADED")])),
            last_notified_at: Some(t0()),
        });
        let mut h = harness(store);
        h.sampler.push(snap(&[("poolA", "ONLINE")]));

        let now = t0() + TimeDelta::days(1);
        assert!(matches!(
            h.engine.tick_at(now).await,
            TickOutcome::Notified { reason: NotifyReason::Transition, .. }
        ));
        assert_eq!(h.engine.state(), MonitorState::Healthy);

        // Long after the reminder interval: still nothing while healthy.
        for day in [2, 9, 30, 365] {
            assert_eq!(
                h.engine.tick_at(t0() + TimeDelta::days(day)).await,
                TickOutcome::Quiet
            );
        }
        assert_eq!(h.notifier.count(), 1);

        // A new unhealthy snapshot is a transition again.
        h.sampler.push(snap(&[("poolA", "FAULTED")]));
        assert!(matches!(
            h.engine.tick_at(t0() + TimeDelta::days(400)).await,
            TickOutcome::Notified { reason: NotifyReason::Transition, .. }
        ));
    }

    #[tokio::test]
    async fn sample_failure_skips_tick() {
        let mut h = harness(baseline(snap(&[("tank", "ONLINE")])));
        h.sampler.push_err("garbled output");

        assert_eq!(h.engine.tick_at(t0()).await, TickOutcome::SampleFailed);
        assert_eq!(h.notifier.count(), 0);
        assert_eq!(h.store.save_count(), 0);
        assert_eq!(h.engine.record().last_snapshot, Some(snap(&[("tank", "ONLINE")])));
    }

    #[tokio::test]
    async fn failed_delivery_is_marked_under_attempt_policy() {
        let mut h = harness(baseline(snap(&[("tank", "ONLINE")])));
        h.notifier.set_failing(true);
        let faulted = snap(&[("tank", "FAULTED")]);
        h.sampler.push(faulted.clone());

        assert_eq!(
            h.engine.tick_at(t0()).await,
            TickOutcome::Notified {
                reason: NotifyReason::Transition,
                delivered: false
            }
        );
        let record = h.store.record();
        assert_eq!(record.last_notified_at, Some(t0()));
        assert_eq!(record.last_snapshot, Some(faulted));

        // The next tick sees no change and no due reminder.
        assert_eq!(
            h.engine.tick_at(t0() + TimeDelta::hours(8)).await,
            TickOutcome::Quiet
        );
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_under_success_policy() {
        let policy = Policy::new(HOURS_8, WEEK)
            .unwrap()
            .with_delivery(DeliveryPolicy::MarkOnSuccess);
        let mut h = harness_with(baseline(snap(&[("tank", "ONLINE")])), policy);
        h.notifier.set_failing(true);
        h.sampler.push(snap(&[("tank", "FAULTED")]));

        assert!(matches!(
            h.engine.tick_at(t0()).await,
            TickOutcome::Notified { delivered: false, .. }
        ));
        assert_eq!(h.store.save_count(), 0);
        assert_eq!(h.engine.record().last_notified_at, None);

        // Channel recovers: the same transition is delivered next tick.
        h.notifier.set_failing(false);
        let later = t0() + TimeDelta::hours(8);
        assert_eq!(
            h.engine.tick_at(later).await,
            TickOutcome::Notified {
                reason: NotifyReason::Transition,
                delivered: true
            }
        );
        assert_eq!(h.store.record().last_notified_at, Some(later));
        assert_eq!(h.notifier.count(), 2);
    }

    #[tokio::test]
    async fn save_failure_keeps_in_memory_decision() {
        let store = baseline(snap(&[("tank", "ONLINE")]));
        let mut h = harness(store);
        h.store.set_fail_saves(true);
        let faulted = snap(&[("tank", "FAULTED")]);
        h.sampler.push(faulted.clone());

        assert!(matches!(
            h.engine.tick_at(t0()).await,
            TickOutcome::Notified { delivered: true, .. }
        ));
        assert_eq!(h.engine.record().last_snapshot, Some(faulted.clone()));

        // No duplicate alert while the disk is unwritable.
        assert_eq!(
            h.engine.tick_at(t0() + TimeDelta::hours(8)).await,
            TickOutcome::Quiet
        );
        assert_eq!(h.notifier.count(), 1);
        assert_eq!(h.store.record().last_snapshot, Some(snap(&[("tank", "ONLINE")])));
    }

    #[tokio::test]
    async fn change_coinciding_with_reminder_updates_baseline() {
        let store = MemoryStore::with_record(MonitorRecord {
            last_snapshot: Some(snap(&[("tank", "DEGRADED")])),
            last_notified_at: Some(t0()),
        });
        let mut h = harness(store);
        let faulted = snap(&[("tank", "FAULTED")]);
        h.sampler.push(faulted.clone());

        h.engine.tick_at(t0() + TimeDelta::days(8)).await;
        assert_eq!(h.store.record().last_snapshot, Some(faulted));
        assert_eq!(h.notifier.count(), 1);
    }

    struct StallingSampler;

    impl Sampler for StallingSampler {
        fn sample(&self) -> SampleFuture<'_> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(SampleError::Empty)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_sampler_times_out() {
        let policy = Policy::new(HOURS_8, WEEK)
            .unwrap()
            .with_timeouts(Duration::from_secs(30), Duration::from_secs(90))
            .unwrap();
        let notifier = RecordingNotifier::default();
        let mut engine = MonitorEngine::new(
            policy,
            Box::new(MemoryStore::new()),
            Box::new(StallingSampler),
            Box::new(notifier.clone()),
            ContactHeader {
                sender: "a@example.com".to_string(),
                recipient: "b@example.com".to_string(),
                hostname: "h".to_string(),
            },
        )
        .unwrap();

        assert_eq!(engine.tick_at(t0()).await, TickOutcome::SampleFailed);
        assert_eq!(notifier.count(), 0);
    }

    /// Answers only when its own sample timeout is fully spent.
    struct DeadlineSampler(Duration);

    impl Sampler for DeadlineSampler {
        fn sample(&self) -> SampleFuture<'_> {
            Box::pin(async move {
                tokio::time::sleep(self.0).await;
                Ok(Sample {
                    snapshot: HealthSnapshot::from_pairs([("tank", "DEGRADED")]).unwrap(),
                    detail: "(detail unavailable: sampling timed out after 30s)".to_string(),
                })
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sample_finishing_at_its_timeout_is_kept() {
        let timeout = Duration::from_secs(30);
        let policy = Policy::new(HOURS_8, WEEK)
            .unwrap()
            .with_timeouts(timeout, Duration::from_secs(90))
            .unwrap();
        let mut engine = MonitorEngine::new(
            policy,
            Box::new(MemoryStore::new()),
            Box::new(DeadlineSampler(timeout)),
            Box::new(RecordingNotifier::default()),
            ContactHeader {
                sender: "a@example.com".to_string(),
                recipient: "b@example.com".to_string(),
                hostname: "h".to_string(),
            },
        )
        .unwrap();

        assert_eq!(engine.tick_at(t0()).await, TickOutcome::Seeded);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown_signal() {
        let mut h = harness(MemoryStore::new());
        h.sampler.push(snap(&[("tank", "ONLINE")]));
        let store = h.store.clone();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            h.engine.run(rx).await;
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.save_count(), 1);
    }
}
