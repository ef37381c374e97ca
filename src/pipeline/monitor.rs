//! The poll loop: fetch → diff → notify → persist, on a fixed interval.
//!
//! The monitor owns the only in-flight copy of the snapshot. It advances
//! that copy only after the store accepted the new snapshot, so a failed
//! write means the next cycle re-detects (and re-announces) the same items.
//! Every error is absorbed at the cycle boundary; the loop stops only when
//! the shutdown future resolves, and only while idle.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Config, Snapshot};
use crate::services::{ListingSource, Message, NotificationSink};
use crate::storage::SnapshotStore;
use crate::utils::log as display;

use super::diff::{ColdStartPolicy, DiffCalculator};
use super::dispatch::Dispatcher;
use super::retry::RetryPolicy;
use super::sanity::{SanityCheck, SanityConfig};

/// Where the monitor is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Diffing,
    Notifying,
    Persisting,
    Error,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Fetching => "FETCHING",
            Self::Diffing => "DIFFING",
            Self::Notifying => "NOTIFYING",
            Self::Persisting => "PERSISTING",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    /// Records returned by the source
    pub fetched: usize,
    /// Records without a usable identity
    pub skipped: usize,
    /// Listings detected as new
    pub new_listings: usize,
    /// New listings withheld on a suppressed cold start
    pub suppressed: usize,
    /// Tracked listings that disappeared
    pub removed: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Whether the snapshot was written and advanced
    pub persisted: bool,
    pub cold_start: bool,
}

impl CycleReport {
    fn summary_items(&self) -> Vec<(&'static str, String)> {
        vec![
            ("fetched", self.fetched.to_string()),
            ("new", self.new_listings.to_string()),
            ("suppressed", self.suppressed.to_string()),
            ("removed", self.removed.to_string()),
            ("skipped", self.skipped.to_string()),
            ("delivered", self.delivered.to_string()),
            ("failed", self.failed.to_string()),
            ("persisted", self.persisted.to_string()),
        ]
    }
}

/// Poll loop settings derived from the application config.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub fetch_retry: RetryPolicy,
    pub cold_start: ColdStartPolicy,
    pub sanity: SanityConfig,
    pub notify_removed: bool,
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.monitor.interval(),
            fetch_timeout: config.scraper.timeout(),
            fetch_retry: RetryPolicy::from(&config.scraper.retry),
            cold_start: ColdStartPolicy::from_backfill(config.monitor.backfill_on_cold_start),
            sanity: SanityConfig::from(&config.monitor),
            notify_removed: config.monitor.notify_removed,
        }
    }
}

/// Single-worker poll loop.
pub struct Monitor {
    source: Arc<dyn ListingSource>,
    store: Arc<dyn SnapshotStore>,
    dispatcher: Dispatcher,
    diff: DiffCalculator,
    sanity: SanityCheck,
    settings: MonitorSettings,
    snapshot: Snapshot,
    state: CycleState,
}

impl Monitor {
    /// Build a monitor and load the persisted snapshot.
    pub async fn open(
        config: &Config,
        source: Arc<dyn ListingSource>,
        sink: Arc<dyn NotificationSink>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let dispatcher = Dispatcher::from_config(sink, &config.notifier);
        Self::with_parts(MonitorSettings::from(config), source, dispatcher, store).await
    }

    /// Build a monitor from explicit parts and load the persisted snapshot.
    pub async fn with_parts(
        settings: MonitorSettings,
        source: Arc<dyn ListingSource>,
        dispatcher: Dispatcher,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let snapshot = store.load().await;
        Self {
            source,
            store,
            dispatcher,
            diff: DiffCalculator::new(settings.cold_start),
            sanity: SanityCheck::new(settings.sanity.clone()),
            settings,
            snapshot,
            state: CycleState::Idle,
        }
    }

    /// The snapshot as of the last successfully persisted cycle.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    fn transition(&mut self, next: CycleState) {
        log::debug!("Cycle state: {} → {}", self.state, next);
        self.state = next;
    }

    /// Run one cycle. Errors abort the cycle before the snapshot is touched.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport {
            started_at: Some(Utc::now()),
            ..CycleReport::default()
        };

        self.transition(CycleState::Fetching);
        let (fetched, attempts) = self
            .settings
            .fetch_retry
            .run("Fetch listings", self.settings.fetch_timeout, || {
                self.source.fetch()
            })
            .await;
        let listings = fetched?;
        log::info!(
            "Fetched {} listings from {} ({} attempt(s))",
            listings.len(),
            self.source.source_name(),
            attempts
        );
        report.fetched = listings.len();
        self.sanity.validate(listings.len(), &self.snapshot)?;

        self.transition(CycleState::Diffing);
        let diff = self.diff.calculate(&self.snapshot, &listings);
        report.skipped = diff.skipped;
        report.new_listings = diff.new_listings.len();
        report.suppressed = diff.suppressed;
        report.removed = diff.removed.len();
        report.cold_start = diff.cold_start;
        if diff.cold_start {
            match self.settings.cold_start {
                ColdStartPolicy::Suppress => log::info!(
                    "Cold start: recording {} listings without notifying",
                    diff.snapshot.len()
                ),
                ColdStartPolicy::Backfill => log::info!(
                    "Cold start: backfilling {} listings",
                    diff.new_listings.len()
                ),
            }
        }

        self.transition(CycleState::Notifying);
        let mut messages: Vec<Message> = diff
            .new_listings
            .iter()
            .map(|n| Message::new_listing(&n.identity, &n.listing))
            .collect();
        if self.settings.notify_removed {
            messages.extend(diff.removed.iter().map(Message::removed));
        } else if !diff.removed.is_empty() {
            log::debug!("{} listing(s) no longer listed", diff.removed.len());
        }
        let dispatch = self.dispatcher.dispatch(messages).await;
        report.delivered = dispatch.delivered.len();
        report.failed = dispatch.failed.len();

        self.transition(CycleState::Persisting);
        match self.store.save(&diff.snapshot).await {
            Ok(()) => {
                self.snapshot = diff.snapshot;
                report.persisted = true;
            }
            Err(e) => {
                log::error!(
                    "{}; snapshot not advanced, the same items will be detected next cycle",
                    e
                );
            }
        }

        self.transition(CycleState::Idle);
        Ok(report)
    }

    /// Run one cycle, absorbing any error. Returns the report if the cycle
    /// got as far as persisting.
    pub async fn tick(&mut self) -> Option<CycleReport> {
        match self.run_cycle().await {
            Ok(report) => {
                log::info!("Cycle complete: {}", display::inline(&report.summary_items()));
                Some(report)
            }
            Err(e) => {
                let stage = self.state;
                self.transition(CycleState::Error);
                log::error!("Cycle aborted during {}: {}", stage, e);
                self.transition(CycleState::Idle);
                None
            }
        }
    }

    /// Poll until `shutdown` resolves. Shutdown is observed only between
    /// cycles, so a cycle is never left half-applied.
    pub async fn run<S>(mut self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        display::header("Listing watcher started");
        display::summary(
            "Monitor",
            &[
                ("source", self.source.source_name().to_string()),
                ("state", self.store.location()),
                ("interval", format!("{}s", self.settings.interval.as_secs())),
                ("tracked", self.snapshot.len().to_string()),
                ("cold start", self.snapshot.is_cold().to_string()),
            ],
        );

        tokio::pin!(shutdown);
        loop {
            self.tick().await;

            log::debug!(
                "Sleeping {}s until next cycle",
                self.settings.interval.as_secs()
            );
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    log::info!("Shutdown requested, stopping monitor");
                    break;
                }
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{Identity, Listing};
    use crate::storage::LocalSnapshotStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Source replaying scripted fetch results.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<Listing>>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<Listing>>>) -> Arc<Self> {
            Self::slow(script, Duration::ZERO)
        }

        fn slow(script: Vec<Result<Vec<Listing>>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl ListingSource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<Listing>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        fn source_name(&self) -> &str {
            "scripted"
        }
    }

    /// Sink recording delivered titles; one title can be made to always fail.
    #[derive(Default)]
    struct RecordingSink {
        failing_title: Option<String>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, message: &Message) -> Result<()> {
            if self.failing_title.as_deref() == Some(message.title.as_str()) {
                return Err(AppError::delivery("webhook returned 500", true));
            }
            self.sent.lock().unwrap().push(message.text());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    impl RecordingSink {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    /// Store wrapping a local file whose writes can be switched off.
    struct FlakyStore {
        inner: LocalSnapshotStore,
        fail_saves: AtomicBool,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotStore for FlakyStore {
        async fn load(&self) -> Snapshot {
            self.inner.load().await
        }

        async fn save(&self, snapshot: &Snapshot) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(AppError::persistence("flaky", "disk full"));
            }
            self.inner.save(snapshot).await
        }

        fn location(&self) -> String {
            self.inner.location()
        }
    }

    struct Harness {
        _tmp: TempDir,
        store: Arc<FlakyStore>,
        sink: Arc<RecordingSink>,
    }

    impl Harness {
        fn new(sink: RecordingSink) -> Self {
            let tmp = TempDir::new().unwrap();
            let store = Arc::new(FlakyStore {
                inner: LocalSnapshotStore::new(tmp.path().join("listings.json")),
                fail_saves: AtomicBool::new(false),
                saves: AtomicUsize::new(0),
            });
            Self {
                _tmp: tmp,
                store,
                sink: Arc::new(sink),
            }
        }

        async fn monitor(&self, source: Arc<ScriptedSource>, backfill: bool, min_listings: usize) -> Monitor {
            let settings = MonitorSettings {
                interval: Duration::from_secs(3600),
                fetch_timeout: Duration::from_secs(5),
                fetch_retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
                cold_start: ColdStartPolicy::from_backfill(backfill),
                sanity: SanityConfig {
                    min_listings,
                    max_drop_percent: None,
                    min_baseline: 10,
                },
                notify_removed: false,
            };
            let dispatcher = Dispatcher::new(
                self.sink.clone(),
                RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1)),
                Duration::from_secs(5),
                2,
            );
            Monitor::with_parts(settings, source, dispatcher, self.store.clone()).await
        }
    }

    fn listing(key: &str) -> Listing {
        Listing::new(format!("https://shop.test/p/{key}"), key.to_string())
    }

    fn batch(keys: &[&str]) -> Vec<Listing> {
        keys.iter().map(|k| listing(k)).collect()
    }

    fn tracked(monitor: &Monitor) -> Vec<String> {
        monitor
            .snapshot()
            .identities()
            .map(Identity::to_string)
            .collect()
    }

    fn sent_titles(sink: &RecordingSink) -> Vec<String> {
        let mut titles: Vec<String> = sink
            .sent()
            .iter()
            .filter_map(|text| text.lines().next())
            .map(|line| line.trim_start_matches("New listing: ").to_string())
            .collect();
        titles.sort();
        titles
    }

    #[tokio::test]
    async fn test_cold_start_suppressed_then_new_items() {
        let h = Harness::new(RecordingSink::default());
        let source = ScriptedSource::new(vec![Ok(batch(&["A", "B"])), Ok(batch(&["A", "C", "D"]))]);
        let mut monitor = h.monitor(source, false, 1).await;
        assert!(monitor.snapshot().is_cold());

        let first = monitor.run_cycle().await.unwrap();
        assert!(first.cold_start);
        assert_eq!(first.new_listings, 0);
        assert_eq!(first.suppressed, 2);
        assert!(h.sink.sent().is_empty());

        let second = monitor.run_cycle().await.unwrap();
        assert_eq!(second.new_listings, 2);
        assert_eq!(second.removed, 1);
        assert_eq!(sent_titles(&h.sink), vec!["C", "D"]);
        assert_eq!(
            tracked(&monitor),
            vec![
                "https://shop.test/p/A",
                "https://shop.test/p/C",
                "https://shop.test/p/D"
            ]
        );
        assert_eq!(monitor.state(), CycleState::Idle);
    }

    #[tokio::test]
    async fn test_cold_start_backfill() {
        let h = Harness::new(RecordingSink::default());
        let source = ScriptedSource::new(vec![Ok(batch(&["X", "Y"]))]);
        let mut monitor = h.monitor(source, true, 1).await;

        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(sent_titles(&h.sink), vec!["X", "Y"]);
    }

    #[tokio::test]
    async fn test_partial_notification_failure_still_advances() {
        let h = Harness::new(RecordingSink {
            failing_title: Some("C".into()),
            ..RecordingSink::default()
        });
        let source = ScriptedSource::new(vec![
            Ok(batch(&["A"])),
            Ok(batch(&["A", "B", "C", "D"])),
            Ok(batch(&["A", "B", "C", "D"])),
        ]);
        let mut monitor = h.monitor(source, false, 1).await;

        monitor.run_cycle().await.unwrap();
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.new_listings, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert!(report.persisted);
        assert_eq!(sent_titles(&h.sink), vec!["B", "D"]);
        assert_eq!(monitor.snapshot().len(), 4);

        // The exhausted item is not retried across cycles
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.new_listings, 0);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_sanity_threshold_aborts_cycle() {
        let h = Harness::new(RecordingSink::default());
        let source = ScriptedSource::new(vec![
            Ok(batch(&["A", "B", "C"])),
            Ok(batch(&["D"])),
        ]);
        let mut monitor = h.monitor(source, true, 2).await;

        monitor.run_cycle().await.unwrap();
        let before = monitor.snapshot().clone();
        let sent_before = h.sink.sent().len();
        let saves_before = h.store.saves.load(Ordering::SeqCst);

        let err = monitor.run_cycle().await.unwrap_err();
        assert!(matches!(err, AppError::SanityCheck { fetched: 1, minimum: 2 }));
        assert_eq!(monitor.snapshot(), &before);
        assert_eq!(h.sink.sent().len(), sent_before);
        assert_eq!(h.store.saves.load(Ordering::SeqCst), saves_before);
    }

    #[tokio::test]
    async fn test_scrape_failure_retains_snapshot() {
        let h = Harness::new(RecordingSink::default());
        let source = ScriptedSource::new(vec![
            Ok(batch(&["A"])),
            Err(AppError::scrape("connection reset")),
            Err(AppError::scrape("connection reset")),
        ]);
        let mut monitor = h.monitor(source.clone(), false, 1).await;

        monitor.run_cycle().await.unwrap();
        let before = monitor.snapshot().clone();

        assert!(monitor.tick().await.is_none());
        assert_eq!(monitor.snapshot(), &before);
        assert_eq!(monitor.state(), CycleState::Idle);
        // One initial call plus two attempts for the failed cycle
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_persistence_failure_redetects_next_cycle() {
        let h = Harness::new(RecordingSink::default());
        let source = ScriptedSource::new(vec![
            Ok(batch(&["A"])),
            Ok(batch(&["A", "B"])),
            Ok(batch(&["A", "B"])),
        ]);
        let mut monitor = h.monitor(source, false, 1).await;
        monitor.run_cycle().await.unwrap();

        h.store.fail_saves.store(true, Ordering::SeqCst);
        let report = monitor.run_cycle().await.unwrap();
        assert!(!report.persisted);
        assert_eq!(report.delivered, 1);
        assert!(!monitor.snapshot().contains("https://shop.test/p/B"));

        h.store.fail_saves.store(false, Ordering::SeqCst);
        let report = monitor.run_cycle().await.unwrap();
        assert!(report.persisted);
        assert_eq!(report.delivered, 1);
        assert_eq!(sent_titles(&h.sink), vec!["B", "B"]);
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let h = Harness::new(RecordingSink::default());
        let mut monitor = h
            .monitor(ScriptedSource::new(vec![Ok(batch(&["A", "B"]))]), false, 1)
            .await;
        monitor.run_cycle().await.unwrap();
        drop(monitor);

        let mut restarted = h
            .monitor(ScriptedSource::new(vec![Ok(batch(&["A", "B", "C"]))]), false, 1)
            .await;
        assert!(!restarted.snapshot().is_cold());

        let report = restarted.run_cycle().await.unwrap();
        assert!(!report.cold_start);
        assert_eq!(sent_titles(&h.sink), vec!["C"]);
    }

    #[tokio::test]
    async fn test_notify_removed() {
        let h = Harness::new(RecordingSink::default());
        let source = ScriptedSource::new(vec![Ok(batch(&["A", "B"])), Ok(batch(&["A"]))]);
        let mut monitor = h.monitor(source, false, 1).await;
        monitor.settings.notify_removed = true;

        monitor.run_cycle().await.unwrap();
        monitor.run_cycle().await.unwrap();
        assert_eq!(h.sink.sent().len(), 1);
        assert!(h.sink.sent()[0].starts_with("Listing removed: B"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_between_cycles() {
        let h = Harness::new(RecordingSink::default());
        let source = ScriptedSource::new(vec![Ok(batch(&["A"]))]);
        let monitor = h.monitor(source.clone(), false, 1).await;

        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        tokio::time::timeout(Duration::from_secs(5), monitor.run(shutdown))
            .await
            .expect("monitor did not stop");

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_during_cycle_waits_for_persist() {
        let h = Harness::new(RecordingSink::default());
        let source = ScriptedSource::slow(vec![Ok(batch(&["A", "B"]))], Duration::from_millis(100));
        let monitor = h.monitor(source.clone(), false, 1).await;

        let started = std::time::Instant::now();
        let shutdown = tokio::time::sleep(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), monitor.run(shutdown))
            .await
            .expect("monitor did not stop");

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.saves.load(Ordering::SeqCst), 1);

        let persisted = h.store.inner.load().await;
        assert!(!persisted.is_cold());
        assert!(persisted.contains("https://shop.test/p/A"));
        assert!(persisted.contains("https://shop.test/p/B"));
    }
}
