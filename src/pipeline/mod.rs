//! Crawl scheduler: ties scraper → storage together.
//!
//! ## Timing
//!
//! The loop wakes up every `tick_interval`. A tick crawls when no crawl has
//! succeeded yet, or when at least `min_interval` has passed since the start of
//! the last successful crawl. Otherwise the tick is skipped.
//!
//! ## Crawl
//!
//!   1. Fetch the page (expired-certificate fallback lives in the scraper)
//!   2. Extract stations + measurements, all rows or nothing
//!   3. Record the crawl start as the last success
//!   4. Hand the records to a background persistence task
//!
//! Persistence never blocks the loop. Each persistence task waits for the
//! previous one, so at most one batch writes to the store at a time.

use crate::health::HealthState;
use crate::scraper::MeasurementSource;
use crate::scraper::parsers::PageRecords;
use crate::storage::CrawlRunTotals;
use crate::storage::writer::ReconcilingWriter;
use crate::utils::{Timer, fmt_duration};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Blocking destination for one crawl's records.
pub trait RecordSink: Send + Sync + 'static {
    fn persist(&self, records: &PageRecords) -> CrawlRunTotals;
}

impl RecordSink for ReconcilingWriter {
    fn persist(&self, records: &PageRecords) -> CrawlRunTotals {
        let run_id = match self.repository().begin_crawl_run() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("unable to log crawl run: {:#}", e);
                None
            }
        };

        let stations = self.persist_stations(&records.stations);
        let measurements = self.persist_measurements(&records.measurements);

        let totals = CrawlRunTotals {
            stations_written: stations.written,
            measurements_inserted: measurements.inserted,
            measurements_backfilled: measurements.backfilled,
            failures: stations.failed + measurements.failed + measurements.check_failed,
        };

        if let Some(id) = run_id {
            if let Err(e) = self.repository().finish_crawl_run(id, totals) {
                warn!("unable to finish crawl run {}: {:#}", id, e);
            }
        }
        totals
    }
}

// ── Clock ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    /// No crawl has succeeded yet.
    Idle,
    CoolingDown { remaining: Duration },
    Ready,
}

#[derive(Debug, Clone)]
pub struct CrawlClock {
    min_interval: Duration,
    last_success: Option<Instant>,
}

impl CrawlClock {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_success: None,
        }
    }

    pub fn state(&self, now: Instant) -> CrawlState {
        match self.last_success {
            None => CrawlState::Idle,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed >= self.min_interval {
                    CrawlState::Ready
                } else {
                    CrawlState::CoolingDown {
                        remaining: self.min_interval - elapsed,
                    }
                }
            }
        }
    }

    pub fn record_success(&mut self, started_at: Instant) {
        self.last_success = Some(started_at);
    }

    #[cfg(test)]
    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped { remaining: Duration },
    Dispatched { stations: usize, measurements: usize },
    Failed,
}

pub struct Scheduler {
    source: Arc<dyn MeasurementSource>,
    sink: Arc<dyn RecordSink>,
    tick_interval: Duration,
    clock: CrawlClock,
    health: Arc<HealthState>,
    last_write: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn MeasurementSource>,
        sink: Arc<dyn RecordSink>,
        min_interval: Duration,
        tick_interval: Duration,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            source,
            sink,
            tick_interval,
            clock: CrawlClock::new(min_interval),
            health,
            last_write: None,
        }
    }

    #[cfg(test)]
    pub fn clock(&self) -> &CrawlClock {
        &self.clock
    }

    /// Tick until `shutdown` resolves. In-flight persistence is abandoned.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        info!(
            "scheduler started: tick every {}, at most one crawl per {}",
            fmt_duration(self.tick_interval),
            fmt_duration(self.clock.min_interval)
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received, stopping scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick(Instant::now()).await {
                        TickOutcome::Skipped { remaining } => {
                            debug!("next crawl possible in {}", fmt_duration(remaining));
                        }
                        TickOutcome::Dispatched { stations, measurements } => {
                            debug!(stations, measurements, "crawl dispatched");
                        }
                        TickOutcome::Failed => {}
                    }
                }
            }
        }
    }

    /// One timer tick: decide eligibility, then crawl or skip.
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        match self.clock.state(now) {
            CrawlState::CoolingDown { remaining } => {
                warn!(
                    "already crawled in the last {}, skipping run ({} left)",
                    fmt_duration(self.clock.min_interval),
                    fmt_duration(remaining)
                );
                return TickOutcome::Skipped { remaining };
            }
            CrawlState::Idle | CrawlState::Ready => {}
        }

        match self.crawl(now).await {
            Ok(records) => {
                let outcome = TickOutcome::Dispatched {
                    stations: records.stations.len(),
                    measurements: records.measurements.len(),
                };
                info!("crawling finished, writing entries in the background");
                self.dispatch(records);
                outcome
            }
            Err(e) => {
                error!("crawl failed: {:#}", e);
                TickOutcome::Failed
            }
        }
    }

    /// Crawl regardless of the clock and wait until the records are stored.
    pub async fn crawl_once(&mut self) -> Result<()> {
        let records = self.crawl(Instant::now()).await?;
        self.dispatch(records);
        self.flush().await;
        Ok(())
    }

    /// Wait for the most recent persistence task.
    pub async fn flush(&mut self) {
        if let Some(handle) = self.last_write.take() {
            if let Err(e) = handle.await {
                error!("persistence task failed: {}", e);
            }
        }
    }

    /// Fetch + extract. On success the clock moves to `started_at`.
    async fn crawl(&mut self, started_at: Instant) -> Result<PageRecords> {
        let _t = Timer::start("crawl");

        let fetched = self.source.fetch().await;
        self.health.set_fetch_ok(fetched.is_ok());
        let html = fetched.context("unable to fetch measurement page")?;

        let records = self
            .source
            .extract(&html)
            .context("unable to parse measurement page")?;

        self.clock.record_success(started_at);
        self.health.record_crawl();
        Ok(records)
    }

    fn dispatch(&mut self, records: PageRecords) {
        let previous = self.last_write.take();
        let sink = Arc::clone(&self.sink);

        self.last_write = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    error!("previous persistence task failed: {}", e);
                }
            }

            let _t = Timer::start("persisting crawl");
            match tokio::task::spawn_blocking(move || sink.persist(&records)).await {
                Ok(totals) => info!(
                    "stored {} stations, {} new and {} backfilled measurements, {} failures",
                    totals.stations_written,
                    totals.measurements_inserted,
                    totals.measurements_backfilled,
                    totals.failures
                ),
                Err(e) => error!("persistence task panicked: {}", e),
            }
        }));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
