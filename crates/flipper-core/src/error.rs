//! Error types shared by retrieval sources, stores and page parsers.
//!
//! # Design
//! - Messages stay short and stable; context travels in fields.
//! - Retrieval errors carry a human-readable reason for front ends.

use std::error::Error;

use thiserror::Error;

/// Errors raised by a `FicSource` for a single retrieval call.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The request was contradictory or out of range; rejected before any I/O.
    #[error("invalid filter: {reason}")]
    InvalidFilter {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// The retrieval backend could not be reached or has no corpus loaded.
    #[error("retrieval source unavailable: {detail}")]
    SourceUnavailable {
        /// Operation identifier.
        operation: &'static str,
        /// Human-readable detail.
        detail: String,
    },
    /// The backing store failed while serving the request.
    #[error("retrieval store failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

impl SourceError {
    /// Build a [`SourceError::SourceUnavailable`] from any displayable cause.
    pub fn unavailable(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            operation,
            detail: detail.into(),
        }
    }

    /// Machine-readable discriminator used on the wire and in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidFilter { .. } => "invalid_filter",
            Self::SourceUnavailable { .. } | Self::Store { .. } => "source_unavailable",
        }
    }
}

/// Convenience alias for retrieval results.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised by `CacheStore` implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend rejected or failed the operation.
    #[error("store backend operation failed")]
    Backend {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A stored value could not be decoded into the requested type.
    #[error("stored value could not be decoded")]
    Decode {
        /// Key of the offending row.
        key: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// A value could not be encoded for storage.
    #[error("value could not be encoded")]
    Encode {
        /// Key the value was destined for.
        key: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Wrap an arbitrary backend error.
    pub fn backend(
        operation: &'static str,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by page parsers.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The page did not contain the expected structure.
    #[error("page could not be parsed")]
    Malformed {
        /// URL of the page.
        url: String,
        /// Human-readable reason.
        reason: String,
    },
}

/// Convenience alias for parser results.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised by `PageFetcher` implementations; every variant is transient.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the connection failed.
    #[error("page request failed")]
    Transport {
        /// Requested URL.
        url: String,
        /// Human-readable detail.
        detail: String,
    },
    /// Upstream answered with a non-success status.
    #[error("upstream returned status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The response body could not be read.
    #[error("page body could not be read")]
    Body {
        /// Requested URL.
        url: String,
        /// Human-readable detail.
        detail: String,
    },
}

impl FetchError {
    /// URL the failure belongs to.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Transport { url, .. } | Self::Status { url, .. } | Self::Body { url, .. } => url,
        }
    }
}

/// Convenience alias for fetch results.
pub type FetchResult<T> = Result<T, FetchError>;
