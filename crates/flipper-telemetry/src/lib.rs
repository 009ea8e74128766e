#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]

//! Logging and metrics shared by the Flipper crates.
//! Layout: init.rs (subscriber installation), metrics.rs (Prometheus registry), error.rs.

pub mod error;
pub mod init;
pub mod metrics;

pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{FetchOrigin, Metrics, MetricsSnapshot};
