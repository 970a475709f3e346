//! Logging initialization and the node's probe endpoint.
//!
//! Logs go through a `tracing-subscriber` registry filtered by `RUST_LOG`, an
//! explicit directive, or [`DEFAULT_LOG_FILTER`], in that order. When a
//! metrics address is configured, a small axum server exposes the Prometheus
//! registry alongside liveness and readiness probes.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Filter used when neither `RUST_LOG` nor an explicit filter is given.
pub const DEFAULT_LOG_FILTER: &str = "info,tessera=debug";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Logging already initialized: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Logging and probe endpoint settings.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Log filter directive, used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    /// Serve `/metrics`, `/health` and `/ready` on this address.
    pub metrics_addr: Option<SocketAddr>,
}

impl TelemetryConfig {
    fn filter(&self) -> Result<EnvFilter, TelemetryError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directive = self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
        Ok(EnvFilter::try_new(directive)?)
    }
}

/// Install the global subscriber and start the probe endpoint if configured.
///
/// Must be called from within a tokio runtime when `metrics_addr` is set.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let subscriber = Registry::default().with(config.filter()?).with(
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true),
    );
    tracing::subscriber::set_global_default(subscriber)?;

    let probes = Arc::new(Probes::default());
    let server = config
        .metrics_addr
        .map(|addr| tokio::spawn(serve_probes(addr, probes.clone())));

    Ok(TelemetryGuard { server, probes })
}

/// Owns the probe endpoint; dropping it stops the server.
pub struct TelemetryGuard {
    server: Option<JoinHandle<()>>,
    probes: Arc<Probes>,
}

impl TelemetryGuard {
    /// Report readiness on `/ready`. Set once the service is receiving.
    pub fn set_ready(&self, ready: bool) {
        self.probes.ready.store(ready, Ordering::SeqCst);
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Probe endpoint
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Probes {
    ready: AtomicBool,
}

#[derive(Serialize)]
struct ProbeStatus {
    status: &'static str,
    ready: bool,
}

async fn serve_probes(addr: SocketAddr, probes: Arc<Probes>) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics endpoint");
            return;
        }
    };
    info!(%addr, "Metrics endpoint listening");

    if let Err(e) = axum::serve(listener, probe_router(probes)).await {
        error!(error = %e, "Metrics endpoint stopped");
    }
}

fn probe_router(probes: Arc<Probes>) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .route("/health", get(liveness))
        .route("/ready", get(readiness))
        .with_state(probes)
}

/// Prometheus text exposition of the default registry.
async fn scrape() -> Response {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    match encoder.encode(&prometheus::gather(), &mut body) {
        Ok(()) => ([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn liveness(State(probes): State<Arc<Probes>>) -> Json<ProbeStatus> {
    Json(ProbeStatus {
        status: "ok",
        ready: probes.ready.load(Ordering::SeqCst),
    })
}

async fn readiness(State(probes): State<Arc<Probes>>) -> (StatusCode, Json<ProbeStatus>) {
    if probes.ready.load(Ordering::SeqCst) {
        let status = ProbeStatus {
            status: "ready",
            ready: true,
        };
        (StatusCode::OK, Json(status))
    } else {
        let status = ProbeStatus {
            status: "starting",
            ready: false,
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}
