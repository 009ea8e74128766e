//! Event payloads and task lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Typed events surfaced by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A page task was accepted by the engine (fresh or resumed).
    TaskSubmitted {
        /// Task identifier.
        task_id: Uuid,
        /// Human-readable comment supplied by the caller.
        comment: String,
        /// Number of target URLs.
        total: usize,
    },
    /// A URL within a task reached a terminal state.
    TaskProgress {
        /// Task identifier.
        task_id: Uuid,
        /// URLs in a terminal state so far.
        finished: usize,
        /// Total URLs in the task.
        total: usize,
    },
    /// A task transitioned into a new lifecycle state.
    TaskStateChanged {
        /// Task identifier.
        task_id: Uuid,
        /// New lifecycle state.
        state: TaskState,
    },
    /// A URL failed terminally.
    UrlFailed {
        /// Task identifier.
        task_id: Uuid,
        /// URL that failed.
        url: String,
        /// Failure description.
        reason: String,
    },
    /// Free-text status line for logs and progress panes.
    Info {
        /// Message body.
        message: String,
    },
    /// Number of results the latest retrieval or reload produced.
    ResultCount {
        /// Result count.
        count: usize,
    },
    /// A recommendation list was (re)built.
    RecommendationsBuilt {
        /// List name.
        list: String,
        /// Stories placed in the list.
        count: usize,
    },
}

impl Event {
    /// Machine-friendly discriminator for consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TaskSubmitted { .. } => "task_submitted",
            Self::TaskProgress { .. } => "task_progress",
            Self::TaskStateChanged { .. } => "task_state_changed",
            Self::UrlFailed { .. } => "url_failed",
            Self::Info { .. } => "info",
            Self::ResultCount { .. } => "result_count",
            Self::RecommendationsBuilt { .. } => "recommendations_built",
        }
    }

    /// Completion percentage for progress events, `None` for everything else.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        match self {
            Self::TaskProgress { finished, total, .. } => {
                if *total == 0 {
                    return Some(100);
                }
                let pct = finished.saturating_mul(100) / total;
                Some(u8::try_from(pct.min(100)).unwrap_or(100))
            }
            _ => None,
        }
    }
}

/// Lifecycle states of a page task as seen by subscribers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, no sub-task started yet.
    Pending,
    /// At least one sub-task is executing.
    Running,
    /// Every URL finished successfully.
    Succeeded,
    /// Some URLs failed terminally, others succeeded.
    PartiallyFailed,
    /// Every URL failed terminally.
    Failed,
    /// Cancelled by the caller before every URL finished.
    Cancelled,
}

impl TaskState {
    /// Whether the task can no longer make progress without an explicit resume.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::PartiallyFailed | Self::Failed)
    }

    /// Stable label used in logs, metrics and persisted rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// An event with its bus-assigned identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Position in the bus sequence, starting at one.
    pub id: EventId,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_clamped_and_empty_tasks_are_complete() {
        let progress = |finished, total| Event::TaskProgress {
            task_id: Uuid::nil(),
            finished,
            total,
        };
        assert_eq!(progress(3, 10).percent(), Some(30));
        assert_eq!(progress(12, 10).percent(), Some(100));
        assert_eq!(progress(0, 0).percent(), Some(100));
        assert_eq!(Event::ResultCount { count: 1 }.percent(), None);
    }

    #[test]
    fn only_finished_states_are_terminal() {
        let terminal: Vec<_> = [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Succeeded,
            TaskState::PartiallyFailed,
            TaskState::Failed,
            TaskState::Cancelled,
        ]
        .into_iter()
        .filter(|state| state.is_terminal())
        .map(TaskState::as_str)
        .collect();
        assert_eq!(terminal, ["succeeded", "partially_failed", "failed"]);
    }

    #[test]
    fn events_serialize_with_their_kind_tag() {
        let event = Event::Info {
            message: "hello".into(),
        };
        let json = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(json["event"], event.kind());
        assert_eq!(json["message"], "hello");
    }
}
