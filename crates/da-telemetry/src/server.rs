//! Prometheus exposition over HTTP.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use tokio::sync::watch;

use crate::TelemetryError;

/// Encode all metrics of `registry` as Prometheus text format.
pub fn encode_registry(registry: &Registry) -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsEncode(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsEncode(e.to_string()))
}

/// Router exposing `/metrics` and `/health`.
pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move { render(&registry) }
            }),
        )
}

fn render(registry: &Registry) -> Response {
    match encode_registry(registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Serve the metrics router on `0.0.0.0:port` until `shutdown` flips.
pub async fn serve_metrics(
    registry: Registry,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TelemetryError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| TelemetryError::Server(format!("bind {addr}: {e}")))?;

    tracing::info!(addr = %addr, "Metrics server listening");

    axum::serve(listener, metrics_router(registry))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| TelemetryError::Server(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{IntCounter, Opts};

    fn registry_with_counter() -> (Registry, IntCounter) {
        let registry = Registry::new();
        let counter =
            IntCounter::with_opts(Opts::new("test_events_total", "Test events")).unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        (registry, counter)
    }

    #[test]
    fn test_encode_registry() {
        let (registry, counter) = registry_with_counter();
        counter.inc_by(3);
        let text = encode_registry(&registry).unwrap();
        assert!(text.contains("test_events_total 3"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (registry, counter) = registry_with_counter();
        counter.inc();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, metrics_router(registry)).await;
        });

        let body = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("test_events_total 1"));
    }
}
