//! # DA Telemetry
//!
//! Observability plumbing for the batcher process.
//!
//! ## Components
//!
//! - **Logging**: `tracing` subscriber with env-filter, pretty or JSON output
//! - **Metrics**: Prometheus text exposition served over HTTP at `/metrics`
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DA_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `DA_JSON_LOGS` | `false` (`true` in containers) | JSON formatted logs |
//! | `DA_METRICS_PORT` | `9100` | Prometheus metrics port |
//! | `DA_SERVICE_NAME` | `da-batcher` | Service name attached to startup logs |

mod config;
mod logging;
mod server;
mod timer;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use server::{encode_registry, metrics_router, serve_metrics};
pub use timer::HistogramTimer;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logger: {0}")]
    LoggerInit(String),

    #[error("Failed to encode metrics: {0}")]
    MetricsEncode(String),

    #[error("Metrics server failed: {0}")]
    Server(String),
}
