//! Health probe.
//!
//! `GET /health` answers 200 when the last page fetch succeeded and the
//! database responds, 503 otherwise. Every other path is a 404.
//!
//! The server is `tiny_http` on a dedicated thread, so a slow database ping
//! never stalls the crawl loop.

use crate::storage::Repository;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

// ── Shared state ──────────────────────────────────────────────────────────────

/// Written by the scheduler, read by the probe.
#[derive(Debug)]
pub struct HealthState {
    fetch_ok: AtomicBool,
    last_crawl: Mutex<Option<DateTime<Utc>>>,
}

impl Default for HealthState {
    fn default() -> Self {
        // Nothing has failed before the first fetch.
        Self {
            fetch_ok: AtomicBool::new(true),
            last_crawl: Mutex::new(None),
        }
    }
}

impl HealthState {
    pub fn set_fetch_ok(&self, ok: bool) {
        self.fetch_ok.store(ok, Ordering::Relaxed);
    }

    pub fn fetch_ok(&self) -> bool {
        self.fetch_ok.load(Ordering::Relaxed)
    }

    pub fn record_crawl(&self) {
        if let Ok(mut last) = self.last_crawl.lock() {
            *last = Some(Utc::now());
        }
    }

    pub fn last_crawl(&self) -> Option<DateTime<Utc>> {
        self.last_crawl.lock().ok().and_then(|last| *last)
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct HealthReport {
    pub fetch_ok: bool,
    pub database_ok: bool,
    pub last_crawl: Option<DateTime<Utc>>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.fetch_ok && self.database_ok
    }
}

// ── Probe ─────────────────────────────────────────────────────────────────────

type JsonResponse = Response<Cursor<Vec<u8>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Health,
    NotFound,
}

fn route(method: &Method, url: &str) -> Route {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    match (method, path) {
        (Method::Get, "/health" | "/health/") => Route::Health,
        _ => Route::NotFound,
    }
}

pub struct HealthProbe {
    state: Arc<HealthState>,
    repo: Arc<Repository>,
}

impl HealthProbe {
    pub fn new(state: Arc<HealthState>, repo: Arc<Repository>) -> Self {
        Self { state, repo }
    }

    pub fn report(&self) -> HealthReport {
        let database_ok = match self.repo.ping() {
            Ok(()) => true,
            Err(e) => {
                warn!("database ping failed: {:#}", e);
                false
            }
        };

        HealthReport {
            fetch_ok: self.state.fetch_ok(),
            database_ok,
            last_crawl: self.state.last_crawl(),
        }
    }

    /// Bind the listener. Failing here is fatal for the process.
    pub fn bind(addr: SocketAddr) -> Result<Server> {
        let server = Server::http(addr)
            .map_err(|e| anyhow!("unable to start health check listener on {}: {}", addr, e))?;
        info!("health check listening on http://{}", addr);
        Ok(server)
    }

    /// Serve `server` on its own thread until the process exits.
    pub fn spawn(self, server: Server) -> Result<JoinHandle<()>> {
        Ok(thread::Builder::new()
            .name("health".into())
            .spawn(move || self.serve(server))?)
    }

    fn serve(&self, server: Server) {
        for request in server.incoming_requests() {
            let response = self.respond(request.method(), request.url());
            debug!(method = %request.method(), url = request.url(), "health request");
            if let Err(e) = request.respond(response) {
                debug!("failed to send health response: {}", e);
            }
        }
    }

    fn respond(&self, method: &Method, url: &str) -> JsonResponse {
        match route(method, url) {
            Route::Health => {
                let report = self.report();
                let status = if report.healthy() { 200 } else { 503 };
                json_response(status, serde_json::to_value(&report))
            }
            Route::NotFound => json_response(404, Ok(serde_json::json!({ "error": "not found" }))),
        }
    }
}

fn json_response(status: u16, body: serde_json::Result<serde_json::Value>) -> JsonResponse {
    let (status, body) = match body.and_then(|v| serde_json::to_vec(&v)) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            warn!("unable to encode health response: {}", e);
            (500, br#"{"error":"encoding failed"}"#.to_vec())
        }
    };

    let response = Response::from_data(body).with_status_code(StatusCode::from(status));
    match Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(state: Arc<HealthState>) -> SocketAddr {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let server = HealthProbe::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        HealthProbe::new(state, repo).spawn(server).unwrap();
        addr
    }

    async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
        let resp = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.text().await.unwrap())
    }

    #[test]
    fn routing() {
        assert_eq!(route(&Method::Get, "/health"), Route::Health);
        assert_eq!(route(&Method::Get, "/health/"), Route::Health);
        assert_eq!(route(&Method::Get, "/health?verbose=1"), Route::Health);
        assert_eq!(route(&Method::Post, "/health"), Route::NotFound);
        assert_eq!(route(&Method::Get, "/"), Route::NotFound);
        assert_eq!(route(&Method::Get, "/healthz"), Route::NotFound);
    }

    #[tokio::test]
    async fn healthy_when_fetch_and_database_are_fine() {
        let state = Arc::new(HealthState::default());
        state.record_crawl();
        let addr = start(state);

        let (status, body) = get(addr, "/health").await;
        assert_eq!(status, 200, "{body}");
        let report: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["fetch_ok"], true);
        assert_eq!(report["database_ok"], true);
        assert!(report["last_crawl"].is_string(), "{body}");
    }

    #[tokio::test]
    async fn query_string_is_ignored() {
        let addr = start(Arc::new(HealthState::default()));
        let (status, _) = get(addr, "/health?x=1").await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn unhealthy_after_failed_fetch() {
        let state = Arc::new(HealthState::default());
        state.set_fetch_ok(false);
        let addr = start(state);

        let (status, body) = get(addr, "/health").await;
        assert_eq!(status, 503, "{body}");
        assert!(body.contains(r#""last_crawl":null"#), "{body}");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let addr = start(Arc::new(HealthState::default()));
        assert_eq!(get(addr, "/metrics").await.0, 404);
    }
}
