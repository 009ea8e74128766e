//! Errors raised while installing logging or exporting metrics.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Telemetry failures; none of them are fatal once the process is running.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global tracing subscriber is already installed, or installing one failed.
    #[error("tracing subscriber could not be installed")]
    Subscriber {
        /// Underlying installation error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A collector definition was rejected.
    #[error("metric collector definition rejected")]
    Collector {
        /// Metric name.
        name: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// A collector could not be added to the registry.
    #[error("metric collector registration rejected")]
    Register {
        /// Metric name.
        name: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// The text exposition could not be produced.
    #[error("metric exposition failed")]
    Exposition {
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// The exposition was not UTF-8.
    #[error("metric exposition was not utf-8")]
    ExpositionUtf8 {
        /// Underlying conversion error.
        #[source]
        source: std::string::FromUtf8Error,
    },
}
