//! Persisted page task records.

use chrono::{DateTime, Utc};
use flipper_events::TaskState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of URLs per sub-task.
pub const DEFAULT_SUB_TASK_SIZE: usize = 100;
/// Default number of extra attempts for a failing URL.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What the fetched pages describe; decides how they are ingested.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Fandom listing pages.
    Fandom,
    /// Author profile pages.
    Author,
    /// Pages that are only cached.
    #[default]
    Generic,
}

/// Policy for using the page cache.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve cached pages, fetch and cache the rest.
    #[default]
    UseCache,
    /// Always fetch and overwrite the cache.
    ForceRefresh,
    /// Never fetch; absent pages are cache misses.
    CacheOnly,
}

/// Lifecycle of one URL inside a task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    /// Waiting for a worker.
    #[default]
    Queued,
    /// A fetch is in flight.
    Fetching,
    /// Fetched (or served from cache) and ingested.
    Done,
    /// Failed, another attempt is pending.
    RetryQueued,
    /// Failed for good.
    Failed,
}

impl UrlStatus {
    /// Whether the URL needs no further work.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Classification of a per-URL failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UrlErrorKind {
    /// Cache-only fetch with no usable cached entry.
    CacheMiss,
    /// Network, status, body or ingestion failure.
    FetchFailed,
}

impl UrlErrorKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CacheMiss => "cache_miss",
            Self::FetchFailed => "fetch_failed",
        }
    }
}

/// Per-URL state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlEntry {
    /// Target URL.
    pub url: String,
    /// Current status.
    pub status: UrlStatus,
    /// Fetch attempts made so far.
    pub attempts: u32,
    /// Classification of the last failure.
    pub last_error_kind: Option<UrlErrorKind>,
    /// Description of the last failure.
    pub last_error: Option<String>,
}

impl UrlEntry {
    fn queued(url: String) -> Self {
        Self {
            url,
            status: UrlStatus::Queued,
            attempts: 0,
            last_error_kind: None,
            last_error: None,
        }
    }
}

/// Parameters of a new page task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    /// How fetched pages are ingested.
    pub kind: TaskKind,
    /// Caller-supplied description.
    pub comment: String,
    /// Target URLs, in order.
    pub urls: Vec<String>,
    /// URLs per sub-task.
    pub sub_task_size: usize,
    /// Extra attempts for a failing URL.
    pub max_retries: u32,
    /// Cache policy.
    pub cache_mode: CacheMode,
    /// Whether pages cached before `forced_cutoff` are refetched.
    pub allow_cache_refresh: bool,
    /// Cached pages older than this count as absent.
    pub forced_cutoff: Option<DateTime<Utc>>,
}

impl TaskRequest {
    /// Request with the default sub-task size, retries and cache policy.
    #[must_use]
    pub fn new(kind: TaskKind, comment: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            kind,
            comment: comment.into(),
            urls,
            sub_task_size: DEFAULT_SUB_TASK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            cache_mode: CacheMode::UseCache,
            allow_cache_refresh: true,
            forced_cutoff: None,
        }
    }

    /// Override the sub-task size.
    #[must_use]
    pub const fn sub_task_size(mut self, size: usize) -> Self {
        self.sub_task_size = size;
        self
    }

    /// Override the retry limit.
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Override the cache policy.
    #[must_use]
    pub const fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// Treat pages cached before `cutoff` as absent, unless refresh is disallowed.
    #[must_use]
    pub const fn forced_cutoff(mut self, cutoff: DateTime<Utc>, allow_refresh: bool) -> Self {
        self.forced_cutoff = Some(cutoff);
        self.allow_cache_refresh = allow_refresh;
        self
    }
}

/// A resumable batch of page fetches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageTask {
    /// Task identifier.
    pub id: Uuid,
    /// How fetched pages are ingested.
    pub kind: TaskKind,
    /// Caller-supplied description.
    pub comment: String,
    /// URLs per sub-task.
    pub sub_task_size: usize,
    /// Extra attempts for a failing URL.
    pub max_retries: u32,
    /// Cache policy.
    pub cache_mode: CacheMode,
    /// Whether pages cached before `forced_cutoff` are refetched.
    pub allow_cache_refresh: bool,
    /// Cached pages older than this count as absent.
    pub forced_cutoff: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub state: TaskState,
    /// Set when the caller cancelled the task.
    pub cancelled: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last resume time.
    pub resumed_at: Option<DateTime<Utc>>,
    /// Time the task reached its final state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Per-URL state, in submission order.
    pub entries: Vec<UrlEntry>,
}

impl PageTask {
    /// Fresh task for a request.
    #[must_use]
    pub fn from_request(request: TaskRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: request.kind,
            comment: request.comment,
            sub_task_size: request.sub_task_size,
            max_retries: request.max_retries,
            cache_mode: request.cache_mode,
            allow_cache_refresh: request.allow_cache_refresh,
            forced_cutoff: request.forced_cutoff,
            state: TaskState::Pending,
            cancelled: false,
            created_at: Utc::now(),
            resumed_at: None,
            finished_at: None,
            entries: request.urls.into_iter().map(UrlEntry::queued).collect(),
        }
    }

    /// Whether the task has stopped, either finally or by cancellation.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.state.is_terminal() || matches!(self.state, TaskState::Cancelled)
    }

    /// URLs in a terminal per-URL state.
    #[must_use]
    pub fn finished_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status.is_terminal())
            .count()
    }

    /// URLs with the given status.
    #[must_use]
    pub fn count(&self, status: UrlStatus) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status == status)
            .count()
    }

    /// Final state implied by the per-URL outcomes.
    #[must_use]
    pub fn outcome(&self) -> TaskState {
        let failed = self.count(UrlStatus::Failed);
        if failed == 0 {
            TaskState::Succeeded
        } else if failed == self.entries.len() {
            TaskState::Failed
        } else {
            TaskState::PartiallyFailed
        }
    }

    /// Put interrupted URLs back in the queue; finished URLs are untouched.
    pub fn requeue_interrupted(&mut self) -> usize {
        let mut requeued = 0;
        for entry in &mut self.entries {
            if matches!(entry.status, UrlStatus::Fetching | UrlStatus::RetryQueued) {
                entry.status = UrlStatus::Queued;
                requeued += 1;
            }
        }
        requeued
    }
}
