//! Process-lifetime handles shared by the orchestrator and its components.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flipper_config::{CoreConfig, SourceMode};
use flipper_core::{
    CacheStore, FicSource, FilterBuilder, PageFetcher, PageParser, RngDeterminismManager,
};
use flipper_data::{MemoryStore, PgStore};
use flipper_events::EventBus;
use flipper_source::{LocalFicSource, RemoteFicSource};
use flipper_tasks::{EngineDeps, EngineOptions, PageTaskEngine, TaskKind, TaskRequest};
use flipper_telemetry::Metrics;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::sink::CorpusSink;

/// Connections opened per logical store.
const PG_POOL_SIZE: u32 = 8;

/// The four logical stores the core works with.
#[derive(Clone)]
pub struct Stores {
    /// Stories, fandoms, authors and recommendation lists.
    pub corpus: Arc<dyn CacheStore>,
    /// Cached upstream pages.
    pub pages: Arc<dyn CacheStore>,
    /// Page task state.
    pub tasks: Arc<dyn CacheStore>,
    /// Per-user state such as random sequence tokens.
    pub users: Arc<dyn CacheStore>,
}

impl Stores {
    /// Ephemeral in-memory stores.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            corpus: Arc::new(MemoryStore::new()),
            pages: Arc::new(MemoryStore::new()),
            tasks: Arc::new(MemoryStore::new()),
            users: Arc::new(MemoryStore::new()),
        }
    }

    /// PostgreSQL-backed stores sharing one pool, one namespace each.
    ///
    /// # Errors
    ///
    /// Returns an error when the database is unreachable or migrations fail.
    pub async fn postgres(database_url: &str) -> AppResult<Self> {
        let pool = PgStore::connect(database_url, PG_POOL_SIZE)
            .await
            .map_err(|err| AppError::data("stores.postgres", err))?;
        info!("postgres stores ready");
        Ok(Self {
            corpus: Arc::new(PgStore::new(pool.clone(), "corpus")),
            pages: Arc::new(PgStore::new(pool.clone(), "pages")),
            tasks: Arc::new(PgStore::new(pool.clone(), "tasks")),
            users: Arc::new(PgStore::new(pool, "users")),
        })
    }
}

/// Everything the core needs, constructed once and passed explicitly.
pub struct CoreContext {
    /// Effective configuration.
    pub config: CoreConfig,
    /// Logical stores.
    pub stores: Stores,
    /// Crawl engine.
    pub engine: PageTaskEngine,
    /// Retrieval source selected by configuration.
    pub source: Arc<dyn FicSource>,
    /// The local source when retrievals run in-process.
    pub local: Option<Arc<LocalFicSource>>,
    /// Random sequence state.
    pub rng: Arc<RngDeterminismManager>,
    /// Notification bus.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
    pinned_time: Option<DateTime<Utc>>,
}

impl CoreContext {
    /// Wire the engine, sink and retrieval source from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when metrics cannot be registered or the remote
    /// source cannot be configured.
    pub fn assemble(
        config: CoreConfig,
        stores: Stores,
        fetcher: Arc<dyn PageFetcher>,
        parser: Arc<dyn PageParser>,
    ) -> AppResult<Self> {
        let events = EventBus::with_capacity(config.event_capacity);
        let metrics = Metrics::new().map_err(|err| AppError::telemetry("metrics.new", err))?;
        let rng = Arc::new(RngDeterminismManager::new());

        let sink = Arc::new(CorpusSink::new(Arc::clone(&stores.corpus), parser));
        let engine = PageTaskEngine::new(
            EngineDeps {
                task_store: Arc::clone(&stores.tasks),
                page_cache: Arc::clone(&stores.pages),
                fetcher,
                sink: Some(sink),
                events: events.clone(),
                metrics: metrics.clone(),
            },
            EngineOptions {
                worker_count: config.engine.worker_count,
                retry_backoff: Duration::from_millis(config.engine.retry_backoff_ms),
            },
        );

        let (source, local): (Arc<dyn FicSource>, Option<Arc<LocalFicSource>>) =
            match &config.source {
                SourceMode::Local => {
                    let local = Arc::new(
                        LocalFicSource::new(Arc::clone(&stores.corpus), Arc::clone(&rng))
                            .with_metrics(metrics.clone())
                            .with_rng_store(Arc::clone(&stores.users)),
                    );
                    let source: Arc<dyn FicSource> = local.clone();
                    (source, Some(local))
                }
                SourceMode::Remote { endpoint } => {
                    let remote = RemoteFicSource::new(
                        endpoint,
                        Duration::from_secs(config.engine.fetch_timeout_secs),
                    )
                    .map_err(|err| AppError::retrieval("remote_source.new", err))?;
                    let source: Arc<dyn FicSource> = Arc::new(remote);
                    (source, None)
                }
            };

        Ok(Self {
            config,
            stores,
            engine,
            source,
            local,
            rng,
            events,
            metrics,
            pinned_time: None,
        })
    }

    /// Measure dead-story windows from a fixed instant instead of the clock.
    #[must_use]
    pub fn with_pinned_time(mut self, at: DateTime<Utc>) -> Self {
        self.pinned_time = Some(at);
        self
    }

    /// Filter builder for the current instant.
    #[must_use]
    pub fn filter_builder(&self) -> FilterBuilder {
        self.pinned_time
            .map_or_else(FilterBuilder::now, FilterBuilder::new)
    }

    /// Reference instant used by new filters.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.pinned_time.unwrap_or_else(Utc::now)
    }

    /// Task request carrying the configured sub-task size and retry limit.
    #[must_use]
    pub fn task_request(&self, kind: TaskKind, comment: String, urls: Vec<String>) -> TaskRequest {
        TaskRequest::new(kind, comment, urls)
            .sub_task_size(self.config.engine.sub_task_size)
            .max_retries(self.config.engine.max_retries)
    }
}
