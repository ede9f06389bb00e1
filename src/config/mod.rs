use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

/// Where the measurement page lives and how to request it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub url: String,

    /// Leading part of the `id` attribute of every table row holding a station.
    #[serde(default = "default_row_id_prefix")]
    pub row_id_prefix: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Crawl timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Minimum time between two successful crawls.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    /// How often the scheduler wakes up to check eligibility.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// External named-query file. The bundled queries are used when unset.
    #[serde(default)]
    pub queries_path: Option<PathBuf>,
}

/// Health probe listener
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_source_url() -> String {
    "https://www.grundwasserstandonline.nlwkn.niedersachsen.de/Messwerte".to_string()
}
fn default_row_id_prefix() -> String {
    "ctl00_MainContent_rgMesswerte_ctl00__".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    "groundwater-crawler/0.1 (groundwater level ingestion)".to_string()
}
fn default_min_interval_secs() -> u64 {
    6 * 60 * 60
}
fn default_tick_interval_secs() -> u64 {
    5 * 60
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/groundwater.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            row_id_prefix: default_row_id_prefix(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
            queries_path: None,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl ScheduleConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("GWL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.source.url)
            .with_context(|| format!("source.url is not a valid URL: {}", self.source.url))?;
        anyhow::ensure!(
            !self.source.row_id_prefix.is_empty(),
            "source.row_id_prefix must not be empty"
        );
        anyhow::ensure!(
            self.schedule.tick_interval_secs > 0,
            "schedule.tick_interval_secs must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.schedule.min_interval(), Duration::from_secs(21_600));
        assert_eq!(cfg.schedule.tick_interval(), Duration::from_secs(300));
    }

    #[test]
    fn partial_sections_fall_back_to_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[schedule]\nmin_interval_secs = 60\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.schedule.min_interval_secs, 60);
        assert_eq!(cfg.schedule.tick_interval_secs, 300);
        assert_eq!(cfg.source.row_id_prefix, "ctl00_MainContent_rgMesswerte_ctl00__");
        assert!(cfg.storage.queries_path.is_none());
    }

    #[test]
    fn rejects_bad_url_and_zero_tick() {
        let mut cfg = AppConfig::default();
        cfg.source.url = "not a url".into();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.schedule.tick_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
