//! Settings model with documented defaults.

use serde::{Deserialize, Serialize};

/// Default number of concurrently executing sub-tasks.
pub const DEFAULT_WORKER_COUNT: usize = 4;
/// Default number of URLs per sub-task.
pub const DEFAULT_SUB_TASK_SIZE: usize = 100;
/// Default number of extra attempts for a failing URL.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default upstream request timeout.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
/// Default event replay capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1_024;
/// Default upstream user agent.
pub const DEFAULT_USER_AGENT: &str = concat!("flipper/", env!("CARGO_PKG_VERSION"));

/// Where retrievals are executed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SourceMode {
    /// Against the corpus in the local store.
    #[default]
    Local,
    /// Against a remote recommendation service.
    Remote {
        /// Base URL of the service.
        endpoint: String,
    },
}

/// How recommendation lists are built.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationMode {
    /// From the authors already in the corpus.
    #[default]
    Local,
    /// Refresh author pages through the crawl engine first.
    ServerFetch,
}

/// Crawl engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Sub-tasks executing at the same time.
    pub worker_count: usize,
    /// URLs per sub-task.
    pub sub_task_size: usize,
    /// Extra attempts for a failing URL.
    pub max_retries: u32,
    /// Delay between attempts for the same URL.
    pub retry_backoff_ms: u64,
    /// Upstream request timeout.
    pub fetch_timeout_secs: u64,
    /// User agent sent upstream.
    pub user_agent: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            sub_task_size: DEFAULT_SUB_TASK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: 0,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    /// Level used when `RUST_LOG` is unset.
    pub level: String,
    /// `json` or `pretty`; inferred from the build when unset.
    pub format: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}

/// Complete core configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Crawl engine settings.
    pub engine: EngineSettings,
    /// Event replay capacity.
    pub event_capacity: usize,
    /// Retrieval backend.
    pub source: SourceMode,
    /// Recommendation build strategy.
    pub recommendations: RecommendationMode,
    /// PostgreSQL connection string; in-memory stores when unset.
    pub database_url: Option<String>,
    /// Address to expose the local source as a recommendation service.
    pub service_bind: Option<String>,
    /// Logging settings.
    pub logging: LogSettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            source: SourceMode::Local,
            recommendations: RecommendationMode::Local,
            database_url: None,
            service_bind: None,
            logging: LogSettings::default(),
        }
    }
}
