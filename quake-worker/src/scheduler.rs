use std::future::{self, Future};
use std::time;

use chrono::{DateTime, Utc};
use quake_common::health::HealthHandle;
use quake_common::metrics::{CYCLE_DURATION, FEED_FAILURES, RECORDS_DROPPED};
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::feed::{BoundingBox, EventFeed, FetchWindow};
use crate::normalize::normalize;
use crate::pipeline::{IngestionPipeline, Outcome, SkipReason};

/// Tally of what one successful cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub window: Option<FetchWindow>,
    /// Records the feed returned.
    pub fetched: usize,
    /// Features the feed client discarded plus records the normalizer rejected.
    pub dropped: usize,
    pub inserted: usize,
    pub already_known: usize,
    /// Stored without a place name.
    pub location_unresolved: usize,
    pub storage_failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Inserted => self.inserted += 1,
            Outcome::Skipped(SkipReason::AlreadyKnown) => self.already_known += 1,
            Outcome::Skipped(SkipReason::LocationUnresolved) => self.location_unresolved += 1,
            Outcome::Skipped(SkipReason::StorageError) => self.storage_failed += 1,
        }
    }

    /// Events newly written to the store this cycle, with or without a place name.
    pub fn stored(&self) -> usize {
        self.inserted + self.location_unresolved
    }
}

/// Drives fetch, normalize and ingest cycles over a moving fetch window.
///
/// Cycles never overlap: `run_cycle` takes `&mut self`, and the drivers run one cycle at a time.
pub struct Scheduler {
    feed: Box<dyn EventFeed>,
    pipeline: IngestionPipeline,
    bounding_box: BoundingBox,
    feed_timeout: time::Duration,
    interval: time::Duration,
    window_start: DateTime<Utc>,
    liveness: Option<HealthHandle>,
}

impl Scheduler {
    pub fn new(
        feed: Box<dyn EventFeed>,
        pipeline: IngestionPipeline,
        bounding_box: BoundingBox,
        feed_timeout: time::Duration,
        interval: time::Duration,
        window_start: DateTime<Utc>,
    ) -> Self {
        Self {
            feed,
            pipeline,
            bounding_box,
            feed_timeout,
            interval,
            window_start,
            liveness: None,
        }
    }

    /// Report liveness to `handle` as the scheduler makes progress.
    pub fn with_liveness(self, handle: HealthHandle) -> Self {
        Self {
            liveness: Some(handle),
            ..self
        }
    }

    /// Start of the next fetch window.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    fn report_healthy(&self) {
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy();
        }
    }

    /// Run a single cycle over `[window_start, now)`.
    ///
    /// A failed fetch is returned without moving the window, so the same range is requested
    /// again next cycle. Once the fetch succeeds the window advances, whatever happens to the
    /// individual events.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, FeedError> {
        let window = FetchWindow {
            start: self.window_start,
            end: Utc::now().max(self.window_start),
        };

        let batch = match self
            .feed
            .fetch(&window, &self.bounding_box, self.feed_timeout)
            .await
        {
            Ok(batch) => batch,
            Err(error) => {
                let labels = [("kind", error.kind())];
                metrics::counter!(FEED_FAILURES, &labels).increment(1);
                warn!(
                    "failed to fetch {}, the same window will be retried: {}",
                    window, error
                );
                return Err(error);
            }
        };

        let mut report = CycleReport {
            window: Some(window),
            fetched: batch.records.len(),
            dropped: batch.skipped,
            ..Default::default()
        };

        for record in &batch.records {
            let event = match normalize(record) {
                Ok(event) => event,
                Err(error) => {
                    warn!("dropping malformed record: {}", error);
                    report.dropped += 1;
                    continue;
                }
            };

            report.record(self.pipeline.process(event).await);
            self.report_healthy();
        }

        metrics::counter!(RECORDS_DROPPED).increment(report.dropped as u64);
        self.window_start = window.end;

        if report.stored() > 0 || report.dropped > 0 || report.storage_failed > 0 {
            info!("cycle over {} finished: {:?}", window, report);
        } else {
            info!("cycle over {} finished, no new events", window);
        }

        Ok(report)
    }

    /// Run exactly `cycles` cycles, sleeping between them. Zero runs nothing.
    pub async fn run_for(&mut self, cycles: usize) {
        self.drive(Some(cycles), future::pending::<()>()).await
    }

    /// Run cycles until `shutdown` resolves. Shutdown is honored between cycles; a cycle in
    /// progress is always finished.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.drive(None, shutdown).await
    }

    async fn drive<F>(&mut self, limit: Option<usize>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut completed = 0;

        loop {
            if limit.is_some_and(|limit| completed >= limit) {
                break;
            }

            let started = tokio::time::Instant::now();
            let result = self.run_cycle().await;

            let elapsed = started.elapsed();
            metrics::histogram!(CYCLE_DURATION).record(elapsed.as_secs_f64());
            self.report_healthy();

            completed += 1;
            if limit.is_some_and(|limit| completed >= limit) {
                break;
            }

            let pause = match result {
                // No catch-up: an overrunning cycle is followed immediately by the next one.
                Ok(_) => self.interval.saturating_sub(elapsed),
                Err(error) => {
                    // Already logged; the window stays put and is retried after a full interval.
                    debug!("cycle ended early ({})", error.kind());
                    self.interval
                }
            };
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping after {} cycles", completed);
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimiter;
    use crate::resolver::LocationResolver;
    use crate::test_utils::{raw_record, FakeFeed, FakeGeocoder, FakeResponse, TEST_BOUNDING_BOX};
    use quake_common::location_cache::LocationCache;
    use quake_common::store::EventStore;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use tokio::time::Instant;

    fn scheduler(
        db: SqlitePool,
        feed: &FakeFeed,
        geocoder: &FakeGeocoder,
        window_start: DateTime<Utc>,
    ) -> Scheduler {
        let resolver =
            LocationResolver::new(LocationCache::new(db.clone()), Box::new(geocoder.clone()), 2);
        let pipeline = IngestionPipeline::new(
            EventStore::new(db),
            resolver,
            RateLimiter::new(time::Duration::ZERO),
            time::Duration::from_secs(1),
        );

        Scheduler::new(
            Box::new(feed.clone()),
            pipeline,
            TEST_BOUNDING_BOX,
            time::Duration::from_secs(1),
            time::Duration::ZERO,
            window_start,
        )
    }

    /// A scheduler whose pipeline never gets to touch its database. Lazy pools open no
    /// connection, so these tests can run on a paused clock.
    fn offline_scheduler(
        feed: &FakeFeed,
        feed_timeout: time::Duration,
        interval: time::Duration,
    ) -> Scheduler {
        let db = SqlitePoolOptions::new()
            .connect_lazy("sqlite::memory:")
            .unwrap();
        let resolver = LocationResolver::new(
            LocationCache::new(db.clone()),
            Box::new(FakeGeocoder::new()),
            2,
        );
        let pipeline = IngestionPipeline::new(
            EventStore::new(db),
            resolver,
            RateLimiter::new(time::Duration::ZERO),
            time::Duration::from_secs(1),
        );

        Scheduler::new(
            Box::new(feed.clone()),
            pipeline,
            TEST_BOUNDING_BOX,
            feed_timeout,
            interval,
            two_hours_ago(),
        )
    }

    fn two_hours_ago() -> DateTime<Utc> {
        Utc::now() - chrono::Duration::hours(2)
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_failed_fetch_keeps_the_window(db: SqlitePool) {
        let feed = FakeFeed::new(vec![])
            .then(FakeResponse::Timeout)
            .then(FakeResponse::Unavailable);
        let geocoder = FakeGeocoder::new();
        let start = two_hours_ago();
        let mut scheduler = scheduler(db, &feed, &geocoder, start);

        let error = scheduler.run_cycle().await.unwrap_err();
        assert!(matches!(error, FeedError::Timeout(_)));
        assert_eq!(scheduler.window_start(), start);

        let error = scheduler.run_cycle().await.unwrap_err();
        assert_eq!(error.kind(), "service");
        assert_eq!(scheduler.window_start(), start);

        let report = scheduler.run_cycle().await.unwrap();
        let windows = feed.windows();

        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|window| window.start == start));
        assert_eq!(report.window, Some(windows[2]));
        assert_eq!(scheduler.window_start(), windows[2].end);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_successful_fetch_advances_the_window(db: SqlitePool) {
        let feed = FakeFeed::new(vec![]);
        let geocoder = FakeGeocoder::new();
        let mut scheduler = scheduler(db, &feed, &geocoder, two_hours_ago());

        scheduler.run_for(3).await;

        let windows = feed.windows();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1].start, windows[0].end);
        assert_eq!(windows[2].start, windows[1].end);
        assert!(windows.iter().all(|window| window.start <= window.end));
        assert_eq!(scheduler.window_start(), windows[2].end);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_malformed_record_is_isolated(db: SqlitePool) {
        let feed = FakeFeed::new(vec![
            raw_record("eq1", "2024-05-01T12:00:00Z", 39.90, 32.80),
            raw_record("eq2", "not a timestamp", 38.40, 27.10),
            raw_record("eq3", "2024-05-01T12:10:00Z", 36.20, 36.16),
        ]);
        let geocoder = FakeGeocoder::new();
        let store = EventStore::new(db.clone());
        let mut scheduler = scheduler(db, &feed, &geocoder, two_hours_ago());

        let report = scheduler.run_cycle().await.unwrap();

        assert_eq!(report.fetched, 3);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.inserted, 2);
        assert!(store.exists("eq1").await.unwrap());
        assert!(!store.exists("eq2").await.unwrap());
        assert!(store.exists("eq3").await.unwrap());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_events_are_processed_in_feed_order(db: SqlitePool) {
        let feed = FakeFeed::new(vec![
            raw_record("b", "2024-05-01T12:10:00Z", 38.40, 27.10),
            raw_record("a", "2024-05-01T12:00:00Z", 39.90, 32.80),
        ]);
        let geocoder = FakeGeocoder::new();
        let mut scheduler = scheduler(db, &feed, &geocoder, two_hours_ago());

        scheduler.run_cycle().await.unwrap();

        assert_eq!(geocoder.requested(), vec![(38.40, 27.10), (39.90, 32.80)]);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_rerun_is_idempotent(db: SqlitePool) {
        let feed = FakeFeed::new(vec![raw_record(
            "eq123",
            "2024-05-01T12:00:00Z",
            39.90,
            32.80,
        )]);
        let geocoder = FakeGeocoder::new();
        let store = EventStore::new(db.clone());
        let cache = LocationCache::new(db.clone());
        let mut scheduler = scheduler(db, &feed, &geocoder, two_hours_ago());

        let first = scheduler.run_cycle().await.unwrap();
        assert_eq!(first.inserted, 1);

        let second = scheduler.run_cycle().await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.already_known, 1);

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(cache.len().await.unwrap(), 1);
        assert_eq!(geocoder.calls(), 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_run_until_stops_between_cycles(db: SqlitePool) {
        let feed = FakeFeed::new(vec![]);
        let geocoder = FakeGeocoder::new();
        let mut scheduler = scheduler(db, &feed, &geocoder, two_hours_ago());

        scheduler.run_until(async {}).await;

        assert_eq!(feed.windows().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_waits_the_full_interval() {
        let feed = FakeFeed::new(vec![])
            .then(FakeResponse::Timeout)
            .then(FakeResponse::Timeout);
        let mut scheduler = offline_scheduler(
            &feed,
            time::Duration::from_secs(60),
            time::Duration::from_secs(30),
        );
        let started = Instant::now();

        scheduler.run_for(2).await;

        // Two requests hanging for their whole timeout, and a full interval between them even
        // though the first already overran it.
        assert_eq!(feed.windows().len(), 2);
        assert!(started.elapsed() >= time::Duration::from_secs(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_cycles_sleep_the_rest_of_the_interval() {
        let feed = FakeFeed::new(vec![]);
        let mut scheduler = offline_scheduler(
            &feed,
            time::Duration::from_secs(60),
            time::Duration::from_secs(30),
        );
        let started = Instant::now();

        scheduler.run_for(3).await;

        assert_eq!(feed.windows().len(), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= time::Duration::from_secs(60));
        assert!(elapsed < time::Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_for_zero_does_nothing() {
        let feed = FakeFeed::new(vec![]);
        let mut scheduler = offline_scheduler(
            &feed,
            time::Duration::from_secs(60),
            time::Duration::from_secs(30),
        );
        let start = scheduler.window_start();

        scheduler.run_for(0).await;

        assert!(feed.windows().is_empty());
        assert_eq!(scheduler.window_start(), start);
    }
}
