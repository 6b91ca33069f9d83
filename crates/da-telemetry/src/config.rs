//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics exposition.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for logs
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Prometheus metrics port
    pub metrics_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "da-batcher".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            metrics_port: 9100,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DA_SERVICE_NAME`: Service name (default: da-batcher)
    /// - `DA_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `DA_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    /// - `DA_METRICS_PORT`: Prometheus metrics port (default: 9100)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("DA_SERVICE_NAME").unwrap_or_else(|_| "da-batcher".to_string()),

            log_level: env::var("DA_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("DA_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            metrics_port: env::var("DA_METRICS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "da-batcher");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.metrics_port, 9100);
        assert!(!config.json_logs);
    }
}
