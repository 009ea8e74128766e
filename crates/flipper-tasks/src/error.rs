//! Error types for the page task engine.

use flipper_core::{FetchError, StoreError};
use thiserror::Error;
use uuid::Uuid;

use crate::model::UrlErrorKind;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// No task with the identifier exists.
    #[error("page task not found")]
    NotFound {
        /// Task identifier.
        task_id: Uuid,
    },
    /// The request cannot be executed.
    #[error("invalid page task request: {reason}")]
    InvalidRequest {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// The operation is not allowed in the task's current state.
    #[error("page task is not in a state that allows {operation}")]
    InvalidState {
        /// Operation identifier.
        operation: &'static str,
        /// Task identifier.
        task_id: Uuid,
    },
    /// The task store failed.
    #[error("page task store failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

/// Result alias for engine operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// Per-URL failures; contained in task state, never raised to callers.
#[derive(Debug, Error)]
pub enum UrlError {
    /// Cache-only fetch with no usable cached entry.
    #[error("page not in cache")]
    CacheMiss {
        /// Requested URL.
        url: String,
    },
    /// Upstream fetch failed.
    #[error("page fetch failed")]
    FetchFailed {
        /// Requested URL.
        url: String,
        /// Underlying fetch error.
        #[source]
        source: FetchError,
    },
    /// The fetched page was rejected by the page sink.
    #[error("fetched page was rejected: {0}")]
    Rejected(#[source] SinkError),
    /// The page cache failed.
    #[error("page cache failed")]
    Cache {
        /// Requested URL.
        url: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

impl UrlError {
    /// Classification stored in task state.
    #[must_use]
    pub const fn kind(&self) -> UrlErrorKind {
        match self {
            Self::CacheMiss { .. } => UrlErrorKind::CacheMiss,
            Self::FetchFailed { .. } | Self::Rejected(_) | Self::Cache { .. } => {
                UrlErrorKind::FetchFailed
            }
        }
    }

    /// Human-readable description including the root cause.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::CacheMiss { url } => format!("{url} is not cached"),
            Self::FetchFailed { url, source } => format!("{url}: {source}"),
            Self::Rejected(source) => source.to_string(),
            Self::Cache { url, .. } => format!("{url}: page cache unavailable"),
        }
    }
}

/// Raised by a [`crate::PageSink`] that cannot use a fetched page.
#[derive(Debug, Error)]
#[error("{url}: {reason}")]
pub struct SinkError {
    /// Page URL.
    pub url: String,
    /// Human-readable reason.
    pub reason: String,
}
