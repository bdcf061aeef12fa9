//! Scheduler engine: the fetch → dispatch → persist loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alerts_core::config::AlertsConfig;
use alerts_core::error::{AlertsError, Result};
use alerts_core::traits::EventSource;
use alerts_core::types::EventFilter;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::{CycleReport, DispatchCoordinator};
use crate::notify::NotifyRouter;
use crate::store::FingerprintStore;

/// Time left to sleep after a cycle that took `elapsed`.
pub fn next_sleep(frequency: Duration, elapsed: Duration) -> Duration {
    frequency.saturating_sub(elapsed)
}

pub struct SchedulerEngine {
    source: Arc<dyn EventSource>,
    coordinator: DispatchCoordinator,
    store: FingerprintStore,
    filter: EventFilter,
    frequency: Duration,
    source_timeout: Duration,
    retention: Option<chrono::Duration>,
    retention_sweep: Duration,
    last_sweep: Option<Instant>,
}

impl SchedulerEngine {
    pub fn new(
        source: Arc<dyn EventSource>,
        coordinator: DispatchCoordinator,
        store: FingerprintStore,
        filter: EventFilter,
    ) -> Self {
        Self {
            source,
            coordinator,
            store,
            filter,
            frequency: Duration::from_secs(3600),
            source_timeout: Duration::from_secs(120),
            retention: None,
            retention_sweep: Duration::from_secs(24 * 3600),
            last_sweep: None,
        }
    }

    /// Wire an engine from validated configuration.
    pub fn from_config(
        config: &AlertsConfig,
        source: Arc<dyn EventSource>,
        router: NotifyRouter,
        dry_run: bool,
    ) -> Result<Self> {
        let schedule = &config.schedule;
        let coordinator =
            DispatchCoordinator::new(router, schedule.reminder_interval()?).with_dry_run(dry_run);
        Ok(Self::new(
            source,
            coordinator,
            FingerprintStore::new(config.store.resolved_path()),
            config.filter.clone(),
        )
        .with_frequency(schedule.frequency()?)
        .with_source_timeout(schedule.source_timeout())
        .with_retention(schedule.retention()?, schedule.retention_sweep()?))
    }

    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Option<chrono::Duration>, sweep: Duration) -> Self {
        self.retention = retention;
        self.retention_sweep = sweep;
        self
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Run one cycle: fetch candidates, dispatch, save.
    ///
    /// A source failure returns before the store is touched. The store is
    /// saved once at the end, also when shutdown cut the cycle short, and
    /// never in dry-run mode.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        debug!(source = self.source.name(), filter = ?self.filter, "fetching candidates");
        let events = match tokio::time::timeout(
            self.source_timeout,
            self.source.fetch_candidates(&self.filter),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(AlertsError::Timeout(format!(
                    "{} did not answer within {}s",
                    self.source.name(),
                    self.source_timeout.as_secs()
                )));
            }
        };
        info!("{} candidate event(s) from {}", events.len(), self.source.name());

        let mut map = self.store.load();
        let report = self
            .coordinator
            .dispatch(events, &mut map, Utc::now(), cancel)
            .await;

        if !self.coordinator.is_dry_run() {
            self.store.save(&map)?;
        }
        Ok(report)
    }

    /// Loop until `shutdown` is cancelled. Cycle errors are logged and the
    /// loop carries on with the next cycle.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            "scheduler started: every {:.2}h, channels {:?}{}",
            self.frequency.as_secs_f64() / 3600.0,
            self.coordinator.router().enabled_channels(),
            if self.coordinator.is_dry_run() { " (dry run)" } else { "" }
        );

        loop {
            let started = Instant::now();
            match self.run_cycle(&shutdown).await {
                Ok(report) => info!("cycle complete in {:.1}s: {report}", started.elapsed().as_secs_f64()),
                Err(e) => error!("cycle failed, will retry next cycle: {e}"),
            }

            if shutdown.is_cancelled() {
                break;
            }
            self.maybe_sweep();

            let sleep = next_sleep(self.frequency, started.elapsed());
            debug!("sleeping {:.0}s until next cycle", sleep.as_secs_f64());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        info!("scheduler stopped");
    }

    /// Prune old fingerprints if retention is on and the last sweep is stale.
    fn maybe_sweep(&mut self) {
        let Some(retention) = self.retention else {
            return;
        };
        if self
            .last_sweep
            .is_some_and(|at| at.elapsed() < self.retention_sweep)
        {
            return;
        }
        if self.coordinator.is_dry_run() {
            debug!("dry run: skipping retention sweep");
            return;
        }

        self.last_sweep = Some(Instant::now());
        match self.store.prune(retention, Utc::now()) {
            Ok(0) => debug!("retention sweep: nothing to prune"),
            Ok(n) => info!("retention sweep removed {n} fingerprint(s)"),
            Err(e) => warn!("retention sweep failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelRoute;
    use crate::notify::tests::{FakeChannel, route};
    use crate::store::{FingerprintMap, record_notification};
    use alerts_core::traits::NotifyChannel;
    use alerts_core::types::{Audience, Event};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source fake: fails on the listed call numbers (1-based), otherwise
    /// returns `batch` events with ids 101, 102, ... in creation order.
    struct FakeSource {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
        delay: Option<Duration>,
        batch: usize,
    }

    impl FakeSource {
        fn new(fail_on: Vec<usize>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_on,
                delay: None,
                batch: 1,
            })
        }

        fn with_batch(batch: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_on: vec![],
                delay: None,
                batch,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch_candidates(&self, _filter: &EventFilter) -> Result<Vec<Event>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_on.contains(&n) {
                return Err(AlertsError::source("connection refused"));
            }
            let base = Utc::now() - chrono::Duration::hours(1);
            Ok((0..self.batch)
                .map(|i| {
                    Event::new(
                        (101 + i).to_string(),
                        "Hot work",
                        base + chrono::Duration::minutes(i as i64),
                    )
                })
                .collect())
        }
    }

    /// Delivers, then requests shutdown, as a signal arriving mid-cycle would.
    struct CancellingChannel {
        token: CancellationToken,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl NotifyChannel for CancellingChannel {
        fn name(&self) -> &str {
            "email"
        }

        async fn send(&self, _event: &Event, _audience: &Audience) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            self.token.cancel();
            Ok(())
        }
    }

    fn engine(
        source: Arc<FakeSource>,
        channel: Arc<FakeChannel>,
        dir: &tempfile::TempDir,
    ) -> SchedulerEngine {
        let router = NotifyRouter::new(vec![route(channel)], Duration::from_secs(5));
        SchedulerEngine::new(
            source,
            DispatchCoordinator::new(router, chrono::Duration::days(3)),
            FingerprintStore::new(dir.path().join("sent_events.json")),
            EventFilter::default(),
        )
    }

    #[test]
    fn test_next_sleep_subtracts_elapsed() {
        let hour = Duration::from_secs(3600);
        assert_eq!(next_sleep(hour, Duration::from_secs(600)), Duration::from_secs(3000));
    }

    #[test]
    fn test_next_sleep_floors_at_zero() {
        assert_eq!(
            next_sleep(Duration::from_secs(60), Duration::from_secs(90)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_source_failure_does_not_poison_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new(vec![1]);
        let email = FakeChannel::ok("email");
        let engine = engine(source.clone(), email.clone(), &dir);
        let cancel = CancellationToken::new();

        let first = engine.run_cycle(&cancel).await;
        assert!(matches!(first, Err(AlertsError::SourceUnavailable(_))));
        assert!(!engine.store().path().exists());

        let second = engine.run_cycle(&cancel).await.unwrap();
        assert_eq!(second.notified, 1);
        assert_eq!(email.sent_count(), 1);
        assert_eq!(engine.store().try_load().unwrap()["101"].notify_count, 1);
    }

    #[tokio::test]
    async fn test_saved_store_suppresses_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let email = FakeChannel::ok("email");
        let engine = engine(FakeSource::new(vec![]), email.clone(), &dir);
        let cancel = CancellationToken::new();

        engine.run_cycle(&cancel).await.unwrap();
        let report = engine.run_cycle(&cancel).await.unwrap();
        assert_eq!(report.skipped_not_due, 1);
        assert_eq!(email.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_write_store() {
        let dir = tempfile::tempdir().unwrap();
        let email = FakeChannel::ok("email");
        let router = NotifyRouter::new(vec![route(email.clone())], Duration::from_secs(5));
        let engine = SchedulerEngine::new(
            FakeSource::new(vec![]),
            DispatchCoordinator::new(router, chrono::Duration::days(3)).with_dry_run(true),
            FingerprintStore::new(dir.path().join("sent_events.json")),
            EventFilter::default(),
        );

        let report = engine.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.would_notify, 1);
        assert_eq!(email.sent_count(), 0);
        assert!(!engine.store().path().exists());
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource {
            calls: AtomicUsize::new(0),
            fail_on: vec![],
            delay: Some(Duration::from_secs(5)),
            batch: 1,
        });
        let engine = engine(source, FakeChannel::ok("email"), &dir)
            .with_source_timeout(Duration::from_millis(20));

        let result = engine.run_cycle(&CancellationToken::new()).await;
        assert!(matches!(result, Err(AlertsError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_run_loop_survives_failures_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::new(vec![1, 2]);
        let email = FakeChannel::ok("email");
        let mut engine =
            engine(source.clone(), email.clone(), &dir).with_frequency(Duration::from_millis(10));

        let shutdown = CancellationToken::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { engine.run(shutdown).await })
        };

        for _ in 0..200 {
            if source.calls() >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop")
            .unwrap();

        assert!(source.calls() >= 3);
        assert_eq!(email.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_retention_sweep_prunes_old_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(FakeSource::new(vec![]), FakeChannel::ok("email"), &dir)
            .with_retention(Some(chrono::Duration::days(30)), Duration::from_secs(3600));

        let mut map = FingerprintMap::new();
        let old = Utc::now() - chrono::Duration::days(60);
        record_notification(&mut map, "7", old, BTreeSet::from(["email".to_string()]));
        engine.store().save(&map).unwrap();

        engine.maybe_sweep();
        assert!(engine.store().try_load().unwrap().is_empty());
        assert!(engine.last_sweep.is_some());
    }

    #[tokio::test]
    async fn test_store_write_failure_surfaces_and_next_cycle_redelivers() {
        let dir = tempfile::tempdir().unwrap();
        let email = FakeChannel::ok("email");
        let router = NotifyRouter::new(vec![route(email.clone())], Duration::from_secs(5));
        let blocked = dir.path().join("sent_events.json");
        std::fs::create_dir(&blocked).unwrap();
        let engine = SchedulerEngine::new(
            FakeSource::new(vec![]),
            DispatchCoordinator::new(router, chrono::Duration::days(3)),
            FingerprintStore::new(blocked.clone()),
            EventFilter::default(),
        );
        let cancel = CancellationToken::new();

        let first = engine.run_cycle(&cancel).await;
        assert!(matches!(first, Err(AlertsError::StoreWrite(_))));
        assert_eq!(email.sent_count(), 1);

        let second = engine.run_cycle(&cancel).await;
        assert!(matches!(second, Err(AlertsError::StoreWrite(_))));
        assert_eq!(email.sent_count(), 2);
        assert!(blocked.is_dir());
    }

    #[tokio::test]
    async fn test_run_loop_continues_after_store_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let email = FakeChannel::ok("email");
        let router = NotifyRouter::new(vec![route(email.clone())], Duration::from_secs(5));
        let blocked = dir.path().join("sent_events.json");
        std::fs::create_dir(&blocked).unwrap();
        let source = FakeSource::new(vec![]);
        let mut engine = SchedulerEngine::new(
            source.clone(),
            DispatchCoordinator::new(router, chrono::Duration::days(3)),
            FingerprintStore::new(blocked.clone()),
            EventFilter::default(),
        )
        .with_frequency(Duration::from_millis(10));

        let shutdown = CancellationToken::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { engine.run(shutdown).await })
        };

        for _ in 0..200 {
            if email.sent_count() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop")
            .unwrap();

        assert!(source.calls() >= 3);
        assert!(email.sent_count() >= 3);
    }

    #[tokio::test]
    async fn test_interrupted_cycle_saves_delivered_events() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let channel = Arc::new(CancellingChannel {
            token: cancel.clone(),
            sent: AtomicUsize::new(0),
        });
        let audience = Audience::new("ops", vec!["ops@example.com".into()]);
        let router = NotifyRouter::new(
            vec![ChannelRoute::new(channel.clone(), audience)],
            Duration::from_secs(5),
        );
        let engine = SchedulerEngine::new(
            FakeSource::with_batch(3),
            DispatchCoordinator::new(router, chrono::Duration::days(3)),
            FingerprintStore::new(dir.path().join("sent_events.json")),
            EventFilter::default(),
        );

        let report = engine.run_cycle(&cancel).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.notified, 1);
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);

        let saved = engine.store().try_load().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved["101"].notify_count, 1);
    }
}
