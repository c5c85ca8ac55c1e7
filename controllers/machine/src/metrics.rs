//! Metrics and probes endpoint.
//!
//! Serves `/metrics` in the Prometheus text format and `/healthz` for the
//! liveness probe. Metric names follow Prometheus conventions (`_total`
//! suffix for counters).

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::info;

use crate::error::ActuatorError;

/// Machine operation counters
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    operations: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Register the controller metrics in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let operations = IntCounterVec::new(
            Opts::new(
                "libvirt_machine_operations_total",
                "Machine operations (by operation, result)",
            ),
            &["operation", "result"],
        )?;
        registry.register(Box::new(operations.clone()))?;
        Ok(Self { registry, operations })
    }

    /// Count one `operation` that ended with `result`
    pub fn record(&self, operation: &str, result: &str) {
        self.operations.with_label_values(&[operation, result]).inc();
    }

    /// Current value of a counter
    #[cfg(test)]
    pub fn count(&self, operation: &str, result: &str) -> u64 {
        self.operations.with_label_values(&[operation, result]).get()
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

async fn metrics_handler(State(metrics): State<Metrics>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Routes of the metrics endpoint
pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(metrics)
}

/// Serve the metrics endpoint on `addr` until the process exits
pub async fn serve(addr: SocketAddr, metrics: Metrics) -> Result<(), ActuatorError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ActuatorError::Metrics(format!("failed to bind {addr}: {e}")))?;
    info!("Metrics endpoint listening on {}", addr);
    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ActuatorError::Metrics(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_render_counts() {
        let metrics = Metrics::new().unwrap();
        metrics.record("create", "success");
        metrics.record("create", "success");
        metrics.record("delete", "error");

        assert_eq!(metrics.count("create", "success"), 2);
        let text = metrics.render().unwrap();
        assert!(text.contains("libvirt_machine_operations_total{operation=\"create\",result=\"success\"} 2"));
        assert!(text.contains("libvirt_machine_operations_total{operation=\"delete\",result=\"error\"} 1"));
    }

    async fn get_path(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_endpoints() {
        let metrics = Metrics::new().unwrap();
        metrics.record("update", "success");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(metrics)).await });

        let health = get_path(addr, "/healthz").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.ends_with("ok"));

        let body = get_path(addr, "/metrics").await;
        assert!(body.contains("libvirt_machine_operations_total{operation=\"update\",result=\"success\"} 1"));
    }
}
