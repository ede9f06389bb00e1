//! Reconciling writer.
//!
//! Stations are upserted by `website_id`. Measurements are inserted once per
//! `(station, date)`; a stored row that is missing a water level is completed
//! exactly once from a later crawl, and complete rows are never touched again.
//!
//! Every record is its own round trip. A failing record is logged and
//! skipped, the rest of the batch continues.

use crate::models::{Measurement, Station};
use crate::storage::Repository;
use crate::storage::queries::{
    INSERT_MEASUREMENT, INSERT_STATION, NULL_MEASUREMENT_EXISTS, QueryStore, REQUIRED,
    UPDATE_MEASUREMENT,
};
use anyhow::{Context, Result};
use duckdb::params;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationSummary {
    pub written: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeasurementSummary {
    pub inserted: usize,
    pub backfilled: usize,
    /// Rows whose key already held a complete measurement.
    pub unchanged: usize,
    /// Dropped because the incomplete-row check itself failed.
    pub check_failed: usize,
    pub failed: usize,
}

/// What happened to one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciled {
    Inserted,
    Backfilled,
    Unchanged,
}

pub struct ReconcilingWriter {
    repo: Arc<Repository>,
    queries: Arc<QueryStore>,
}

impl ReconcilingWriter {
    /// Fails when `queries` lacks any of the named queries the writer runs.
    pub fn new(repo: Arc<Repository>, queries: Arc<QueryStore>) -> Result<Self> {
        queries
            .require(&REQUIRED)
            .context("Named query set is incomplete")?;
        Ok(Self { repo, queries })
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    // ── Stations ──────────────────────────────────────────────────────────────

    pub fn persist_stations(&self, stations: &[Station]) -> StationSummary {
        let mut summary = StationSummary::default();

        for station in stations {
            debug!(station = %station.website_id, name = ?station.name, "writing station");
            match self.upsert_station(station) {
                Ok(()) => summary.written += 1,
                Err(e) => {
                    error!(station = %station.website_id, "unable to insert/update station: {:#}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "stations: {} written, {} failed",
            summary.written, summary.failed
        );
        summary
    }

    fn upsert_station(&self, station: &Station) -> Result<()> {
        let sql = self.queries.get(INSERT_STATION)?;
        let conn = self.repo.lock()?;
        conn.execute(
            sql,
            params![
                station.website_id,
                station.public_id,
                station.name,
                station.operator,
                station.location.to_wkt(),
            ],
        )?;
        Ok(())
    }

    // ── Measurements ──────────────────────────────────────────────────────────

    pub fn persist_measurements(&self, measurements: &[Measurement]) -> MeasurementSummary {
        let mut summary = MeasurementSummary::default();

        for m in measurements {
            debug!(station = %m.station, date = %m.date, "checking for incomplete data");

            let incomplete = match self.incomplete_exists(m) {
                Ok(found) => found,
                Err(e) => {
                    // The record is dropped for this crawl; a later crawl
                    // retries it only while the page still lists this date.
                    error!(station = %m.station, date = %m.date,
                        "unable to check for incomplete data, skipping: {:#}", e);
                    summary.check_failed += 1;
                    continue;
                }
            };

            let outcome = if incomplete {
                warn!(station = %m.station, date = %m.date,
                    "found incomplete measurement, completing it with crawled data");
                if !m.is_complete() {
                    debug!(station = %m.station, date = %m.date,
                        "crawled measurement is incomplete as well");
                }
                self.backfill(m).map(|_| Reconciled::Backfilled)
            } else {
                self.insert(m).map(|n| {
                    if n == 0 { Reconciled::Unchanged } else { Reconciled::Inserted }
                })
            };

            match outcome {
                Ok(Reconciled::Inserted) => summary.inserted += 1,
                Ok(Reconciled::Backfilled) => summary.backfilled += 1,
                Ok(Reconciled::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    error!(station = %m.station, date = %m.date,
                        "unable to write measurement: {:#}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "measurements: {} inserted, {} backfilled, {} unchanged, {} check failures, {} failed",
            summary.inserted, summary.backfilled, summary.unchanged, summary.check_failed, summary.failed
        );
        summary
    }

    fn incomplete_exists(&self, m: &Measurement) -> Result<bool> {
        let sql = self.queries.get(NULL_MEASUREMENT_EXISTS)?;
        let conn = self.repo.lock()?;
        let found: bool = conn.query_row(sql, params![m.station, m.date], |r| r.get(0))?;
        Ok(found)
    }

    fn backfill(&self, m: &Measurement) -> Result<usize> {
        let sql = self.queries.get(UPDATE_MEASUREMENT)?;
        let conn = self.repo.lock()?;
        Ok(conn.execute(
            sql,
            params![
                m.water_level_gok,
                m.water_level_nhn,
                m.classification,
                m.station,
                m.date,
            ],
        )?)
    }

    /// Conflict-tolerant insert; returns the number of rows written.
    fn insert(&self, m: &Measurement) -> Result<usize> {
        let sql = self.queries.get(INSERT_MEASUREMENT)?;
        let conn = self.repo.lock()?;
        Ok(conn.execute(
            sql,
            params![
                m.station,
                m.date,
                m.classification,
                m.water_level_nhn,
                m.water_level_gok,
            ],
        )?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
