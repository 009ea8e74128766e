//! # Design
//!
//! - Centralize application-level errors for bootstrap and orchestration.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;

use flipper_core::{FetchError, SourceError, StoreError};
use flipper_tasks::TaskError;
use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Result alias for recommendation list builds.
pub type RecommendationResult<T> = Result<T, RecommendationError>;

/// Errors raised while building a recommendation list.
#[derive(Debug, Error)]
pub enum RecommendationError {
    /// No source fics, or no corpus author shares any of them.
    #[error("nothing to build recommendations from")]
    EmptySource {
        /// List name.
        list: String,
    },
    /// Candidate selection failed.
    #[error("recommendation retrieval failed")]
    Source {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying retrieval error.
        #[source]
        source: SourceError,
    },
    /// Reading or writing the corpus failed.
    #[error("recommendation storage failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
    /// The author refresh crawl could not be started.
    #[error("author refresh failed")]
    Task {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying engine error.
        #[source]
        source: TaskError,
    },
}

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        #[source]
        source: flipper_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        #[source]
        source: flipper_telemetry::TelemetryError,
    },
    /// Database setup failed.
    #[error("database operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        #[source]
        source: flipper_data::DataError,
    },
    /// Store access failed.
    #[error("store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        #[source]
        source: StoreError,
    },
    /// Retrieval failed.
    #[error("retrieval failed")]
    Source {
        /// Operation identifier.
        operation: &'static str,
        /// Source retrieval error.
        #[source]
        source: SourceError,
    },
    /// Page task operations failed.
    #[error("page task operation failed")]
    Task {
        /// Operation identifier.
        operation: &'static str,
        /// Source engine error.
        #[source]
        source: TaskError,
    },
    /// The upstream fetcher could not be built.
    #[error("page fetcher setup failed")]
    Fetch {
        /// Operation identifier.
        operation: &'static str,
        /// Source fetch error.
        #[source]
        source: FetchError,
    },
    /// Recommendation list build failed.
    #[error("recommendation build failed")]
    Recommendation {
        /// Operation identifier.
        operation: &'static str,
        /// Source build error.
        #[source]
        source: RecommendationError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        #[source]
        source: io::Error,
    },
    /// A background follow-up task panicked or was aborted.
    #[error("background task failed")]
    Join {
        /// Operation identifier.
        operation: &'static str,
        /// Source join error.
        #[source]
        source: tokio::task::JoinError,
    },
    /// A referenced record does not exist.
    #[error("record not found")]
    NotFound {
        /// Record kind.
        kind: &'static str,
        /// Record key.
        key: String,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: flipper_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: flipper_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn data(operation: &'static str, source: flipper_data::DataError) -> Self {
        Self::Data { operation, source }
    }

    pub(crate) const fn store(operation: &'static str, source: StoreError) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn retrieval(operation: &'static str, source: SourceError) -> Self {
        Self::Source { operation, source }
    }

    pub(crate) const fn task(operation: &'static str, source: TaskError) -> Self {
        Self::Task { operation, source }
    }

    pub(crate) const fn fetch(operation: &'static str, source: FetchError) -> Self {
        Self::Fetch { operation, source }
    }

    pub(crate) const fn recommendation(
        operation: &'static str,
        source: RecommendationError,
    ) -> Self {
        Self::Recommendation { operation, source }
    }

    pub(crate) const fn join(operation: &'static str, source: tokio::task::JoinError) -> Self {
        Self::Join { operation, source }
    }

    pub(crate) const fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// Human-readable reason suitable for front ends, including the root cause.
    #[must_use]
    pub fn reason(&self) -> String {
        let mut message = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            message.push_str(": ");
            message.push_str(&err.to_string());
            cause = err.source();
        }
        message
    }
}
