use crate::config::SourceConfig;
use async_trait::async_trait;
use rustls::{CertificateError, Error as TlsError};
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure of a single GET, before any fallback decision.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed")]
    Request(#[source] BoxError),

    #[error("HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} failed")]
    Request {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("GET {url} failed after retrying without certificate verification")]
    InsecureRetry {
        url: String,
        #[source]
        source: TransportError,
    },
}

/// How a failed request should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Server certificate is expired and nothing else is wrong with it.
    ExpiredCertificate,
    Fatal,
}

/// Certificate verification mode for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVerification {
    Verify,
    SkipVerification,
}

// ── Transport ─────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and return the body of a 2xx response.
    async fn get_text(&self, url: &str, tls: TlsVerification) -> Result<String, TransportError>;
}

/// reqwest-backed transport holding one verifying and one non-verifying client.
pub struct HttpClient {
    secure: reqwest::Client,
    insecure: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &SourceConfig) -> Result<Self, reqwest::Error> {
        let builder = || {
            reqwest::Client::builder()
                .user_agent(&config.user_agent)
                .timeout(Duration::from_secs(config.timeout_secs))
                .gzip(true)
        };

        Ok(Self {
            secure: builder().build()?,
            insecure: builder().danger_accept_invalid_certs(true).build()?,
        })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn get_text(&self, url: &str, tls: TlsVerification) -> Result<String, TransportError> {
        let client = match tls {
            TlsVerification::Verify => &self.secure,
            TlsVerification::SkipVerification => &self.insecure,
        };

        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Request(Box::new(e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        resp.text()
            .await
            .map_err(|e| TransportError::Request(Box::new(e)))
    }
}

// ── Classification ────────────────────────────────────────────────────────────

/// Decide whether a failed request may be retried without verification.
///
/// Only an expired server certificate qualifies. Revoked certificates,
/// name mismatches, unknown issuers, HTTP status errors and plain network
/// failures are all fatal.
pub fn classify(err: &TransportError) -> FailureClass {
    match err {
        TransportError::Status(_) => FailureClass::Fatal,
        TransportError::Request(source) => match find_certificate_error(source.as_ref()) {
            Some(CertificateError::Expired) | Some(CertificateError::ExpiredContext { .. }) => {
                FailureClass::ExpiredCertificate
            }
            _ => FailureClass::Fatal,
        },
    }
}

/// Walk the source chain looking for a rustls certificate error.
///
/// `io::Error` hides its payload from `source()`, so it is unwrapped
/// explicitly with `get_ref()`.
fn find_certificate_error<'a>(
    err: &'a (dyn StdError + 'static),
) -> Option<&'a CertificateError> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(TlsError::InvalidCertificate(cert)) = e.downcast_ref::<TlsError>() {
            return Some(cert);
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if let Some(inner) = io.get_ref() {
                if let Some(cert) = find_certificate_error(inner) {
                    return Some(cert);
                }
            }
        }
        current = e.source();
    }
    None
}

// ── Fetch ─────────────────────────────────────────────────────────────────────

/// GET `url`, retrying exactly once without certificate verification when
/// the first attempt failed on an expired certificate.
pub async fn fetch_with_fallback(
    transport: &dyn Transport,
    url: &str,
) -> Result<String, FetchError> {
    debug!("GET {}", url);

    let err = match transport.get_text(url, TlsVerification::Verify).await {
        Ok(body) => return Ok(body),
        Err(e) => e,
    };

    match classify(&err) {
        FailureClass::Fatal => Err(FetchError::Request {
            url: url.to_string(),
            source: err,
        }),
        FailureClass::ExpiredCertificate => {
            warn!(
                url,
                "server certificate expired, retrying without certificate verification"
            );
            transport
                .get_text(url, TlsVerification::SkipVerification)
                .await
                .map_err(|source| FetchError::InsecureRetry {
                    url: url.to_string(),
                    source,
                })
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
