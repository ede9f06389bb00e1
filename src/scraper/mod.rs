pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::SourceConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use self::http_client::{FetchError, HttpClient, Transport, fetch_with_fallback};
use self::parsers::{ExtractError, PageRecords, extract};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable measurement page source.
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    /// Raw page body.
    async fn fetch(&self) -> Result<String, FetchError>;

    /// Turn a page body into records, all or nothing.
    fn extract(&self, html: &str) -> Result<PageRecords, ExtractError>;
}

// ── NLWKN groundwater page ────────────────────────────────────────────────────

pub struct GroundwaterScraper {
    transport: Arc<dyn Transport>,
    url: String,
    row_id_prefix: String,
}

impl GroundwaterScraper {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = HttpClient::new(config).context("Failed to build HTTP client")?;
        Ok(Self::with_transport(Arc::new(client), config))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: &SourceConfig) -> Self {
        Self {
            transport,
            url: config.url.clone(),
            row_id_prefix: config.row_id_prefix.clone(),
        }
    }
}

#[async_trait]
impl MeasurementSource for GroundwaterScraper {
    async fn fetch(&self) -> Result<String, FetchError> {
        info!("checking for new data on {}", self.url);
        fetch_with_fallback(self.transport.as_ref(), &self.url).await
    }

    fn extract(&self, html: &str) -> Result<PageRecords, ExtractError> {
        extract(html, &self.row_id_prefix)
    }
}
