//! JSON bodies exchanged between `RemoteFicSource` and the service router.

use flipper_core::filter::known_reason;
use flipper_core::{Filter, SourceError, UserData};
use serde::{Deserialize, Serialize};

/// Route serving `FetchData`.
pub const FETCH_PATH: &str = "/v1/fics/fetch";
/// Route serving `GetCount`.
pub const COUNT_PATH: &str = "/v1/fics/count";

/// Body of both retrieval routes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievalRequest {
    /// Canonical retrieval request.
    pub filter: Filter,
    /// Exclusion side-channel.
    pub user_data: UserData,
}

/// Response of the count route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountResponse {
    /// Matching stories, ignoring paging.
    pub count: usize,
}

/// Error payload returned with non-success statuses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// `invalid_filter` or `source_unavailable`.
    pub kind: String,
    /// Validation reason for `invalid_filter`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Payload describing `err`.
    #[must_use]
    pub fn from_error(err: &SourceError) -> Self {
        let reason = match err {
            SourceError::InvalidFilter { reason } => Some((*reason).to_owned()),
            _ => None,
        };
        let message = match err {
            SourceError::SourceUnavailable { detail, .. } => detail.clone(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind().to_owned(),
            reason,
            message,
        }
    }

    /// Typed error equivalent to the payload.
    #[must_use]
    pub fn into_error(self, operation: &'static str) -> SourceError {
        match (self.kind.as_str(), self.reason) {
            ("invalid_filter", Some(reason)) => SourceError::InvalidFilter {
                reason: known_reason(&reason),
            },
            _ => SourceError::unavailable(operation, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipper_core::filter::REASON_RECORD_LIMIT;

    #[test]
    fn invalid_filter_survives_the_wire() {
        let err = SourceError::InvalidFilter {
            reason: REASON_RECORD_LIMIT,
        };
        let body = ErrorBody::from_error(&err);
        assert_eq!(body.kind, "invalid_filter");
        let json = serde_json::to_string(&body).unwrap();
        let decoded: ErrorBody = serde_json::from_str(&json).unwrap();
        match decoded.into_error("fetch") {
            SourceError::InvalidFilter { reason } => assert_eq!(reason, REASON_RECORD_LIMIT),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unavailable_keeps_its_detail() {
        let err = SourceError::unavailable("fetch", "corpus not loaded");
        let body = ErrorBody::from_error(&err);
        assert_eq!(body.kind, "source_unavailable");
        assert_eq!(body.reason, None);
        match body.into_error("fetch") {
            SourceError::SourceUnavailable { detail, .. } => {
                assert_eq!(detail, "corpus not loaded");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
