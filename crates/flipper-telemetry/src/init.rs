//! Tracing subscriber installation.
//!
//! `RUST_LOG` wins over the configured level; an unparsable level falls back
//! to [`DEFAULT_LOG_LEVEL`]. The build identifier is kept for the lifetime of
//! the process so log lines and health output agree on it.

use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TelemetryError};

/// Filter directive used when neither `RUST_LOG` nor the configuration sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Identifier reported before logging is initialised.
const UNKNOWN_BUILD: &str = "dev";

static BUILD: OnceCell<String> = OnceCell::new();

/// Subscriber settings resolved from configuration.
#[derive(Debug, Clone, Copy)]
pub struct LoggingConfig<'a> {
    /// Filter directive such as `info` or `flipper_tasks=debug,info`.
    pub level: &'a str,
    /// Line encoding.
    pub format: LogFormat,
    /// Build identifier logged at startup.
    pub build_sha: &'a str,
}

/// Line encodings supported by the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

impl LogFormat {
    /// Pretty output for debug builds, JSON otherwise.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }

    /// Format named in configuration; unknown names fall back to [`LogFormat::infer`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" | "text" => Self::Pretty,
            "compact" => Self::Compact,
            _ => Self::infer(),
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError::Subscriber`] when a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig<'_>) -> Result<()> {
    let registry = tracing_subscriber::registry().with(directives(config.level));
    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_target(false))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_target(false))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false))
            .try_init(),
    };
    installed.map_err(|source| TelemetryError::Subscriber { source })?;

    let _ = BUILD.set(config.build_sha.to_owned());
    info!(build_sha = config.build_sha, format = ?config.format, "logging initialised");
    Ok(())
}

/// Build identifier recorded by [`init_logging`].
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD.get().map_or(UNKNOWN_BUILD, String::as_str)
}

fn directives(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
    })
}
