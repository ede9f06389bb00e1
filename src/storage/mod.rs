pub mod queries;
pub mod writer;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

// measurements.station has no REFERENCES clause: DuckDB refuses to update a
// parent row that is still referenced, which would break the station upsert.
const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS stations (
    website_id  VARCHAR PRIMARY KEY,
    public_id   VARCHAR NOT NULL,
    name        VARCHAR,
    operator    VARCHAR,
    -- WKT, POINT(longitude latitude)
    location    VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS measurements (
    station          VARCHAR NOT NULL,
    date             DATE    NOT NULL,
    classification   VARCHAR,
    water_level_nhn  DOUBLE,
    water_level_gok  DOUBLE,
    UNIQUE (station, date)
);

CREATE SEQUENCE IF NOT EXISTS crawl_run_ids START 1;

CREATE TABLE IF NOT EXISTS crawl_runs (
    id                     BIGINT PRIMARY KEY DEFAULT nextval('crawl_run_ids'),
    started_at             TIMESTAMP NOT NULL,
    finished_at            TIMESTAMP,
    status                 VARCHAR NOT NULL DEFAULT 'running',
    stations_written       INTEGER DEFAULT 0,
    measurements_inserted  INTEGER DEFAULT 0,
    measurements_backfilled INTEGER DEFAULT 0,
    failures               INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_measurements_date ON measurements (date);
"#;

/// Outcome of one crawl, as written to `crawl_runs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlRunTotals {
    pub stations_written: usize,
    pub measurements_inserted: usize,
    pub measurements_backfilled: usize,
    pub failures: usize,
}

// ── Repository ────────────────────────────────────────────────────────────────

/// DuckDB handle shared between the writer, the health probe and the CLI.
pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Exclusive access to the connection for one round trip.
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.lock()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    pub fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        let one: i32 = conn.query_row("SELECT 1", [], |r| r.get(0))?;
        anyhow::ensure!(one == 1, "unexpected ping result {}", one);
        Ok(())
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn station_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM stations")
    }

    pub fn measurement_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM measurements")
    }

    /// Rows still waiting for a backfill.
    pub fn incomplete_count(&self) -> Result<i64> {
        self.count(
            "SELECT COUNT(*) FROM measurements \
             WHERE water_level_nhn IS NULL OR water_level_gok IS NULL",
        )
    }

    fn count(&self, sql: &str) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row(sql, [], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT MIN(date), MAX(date) FROM measurements", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })?)
    }

    // ── Crawl run log ─────────────────────────────────────────────────────────

    pub fn begin_crawl_run(&self) -> Result<i64> {
        let conn = self.lock()?;
        let id: i64 = conn.query_row(
            "INSERT INTO crawl_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_crawl_run(&self, run_id: i64, totals: CrawlRunTotals) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"UPDATE crawl_runs SET
               finished_at = ?, status = ?,
               stations_written = ?, measurements_inserted = ?,
               measurements_backfilled = ?, failures = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if totals.failures == 0 { "success" } else { "partial" },
                totals.stations_written as i64,
                totals.measurements_inserted as i64,
                totals.measurements_backfilled as i64,
                totals.failures as i64,
                run_id,
            ],
        )?;
        Ok(())
    }
}
