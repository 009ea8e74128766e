//! In-process retrieval against a snapshot of the corpus store.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use flipper_core::service::keys;
use flipper_core::{
    CacheStore, FicSource, Filter, RngDeterminismManager, ScoredStory, SourceError, SourceResult,
    Story, UserData, list_json, put_json,
};
use flipper_telemetry::Metrics;
use tracing::{debug, info};

use crate::corpus::CorpusSnapshot;

/// `FicSource` evaluating filters against the last loaded corpus snapshot.
pub struct LocalFicSource {
    corpus: Arc<dyn CacheStore>,
    rng: Arc<RngDeterminismManager>,
    metrics: Option<Metrics>,
    rng_store: Option<Arc<dyn CacheStore>>,
    snapshot: RwLock<Option<Arc<CorpusSnapshot>>>,
}

impl LocalFicSource {
    /// Source reading stories from `corpus`; nothing is served until [`Self::reload`].
    #[must_use]
    pub fn new(corpus: Arc<dyn CacheStore>, rng: Arc<RngDeterminismManager>) -> Self {
        Self {
            corpus,
            rng,
            metrics: None,
            rng_store: None,
            snapshot: RwLock::new(None),
        }
    }

    /// Record retrieval outcomes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Persist the random sequence tokens to `store` whenever a request resets one.
    #[must_use]
    pub fn with_rng_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.rng_store = Some(store);
        self
    }

    /// Replace the snapshot with the current content of the corpus store.
    ///
    /// Returns the number of stories loaded.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Store`] when the corpus cannot be read.
    pub async fn reload(&self) -> SourceResult<usize> {
        let stories: Vec<Story> = list_json(self.corpus.as_ref(), keys::STORY_PREFIX)
            .await
            .map_err(|source| SourceError::Store {
                operation: "reload",
                source,
            })?;
        let snapshot = Arc::new(CorpusSnapshot::new(stories, Utc::now()));
        let loaded = snapshot.len();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        info!(stories = loaded, "corpus snapshot reloaded");
        Ok(loaded)
    }

    /// Stories in the current snapshot; zero when nothing is loaded.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.current().map_or(0, |snapshot| snapshot.len())
    }

    /// Current snapshot, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<CorpusSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn loaded(&self, operation: &'static str) -> SourceResult<Arc<CorpusSnapshot>> {
        self.current()
            .ok_or_else(|| SourceError::unavailable(operation, "corpus not loaded"))
    }

    fn record(&self, operation: &str, result: &SourceResult<impl Sized>) {
        if let Some(metrics) = &self.metrics {
            let outcome = match result {
                Ok(_) => "ok",
                Err(err) => err.kind(),
            };
            metrics.inc_retrieval(operation, outcome);
        }
    }

    async fn fetch(&self, filter: &Filter, user_data: &UserData) -> SourceResult<Vec<ScoredStory>> {
        filter.validate(user_data)?;
        let snapshot = self.loaded("fetch_data")?;
        let selected = snapshot.select(filter, user_data);
        let total = selected.len();

        let ordered = if filter.randomize {
            if filter.wipe_rng_sequence {
                self.rng.bust(&filter.rng_owner);
                self.persist_rng().await?;
            }
            let seed = self
                .rng
                .seed_for(&filter.rng_owner, &filter.rng_disambiguator);
            RngDeterminismManager::permute(seed, &selected)
        } else {
            selected
        };

        let page: Vec<ScoredStory> = ordered
            .into_iter()
            .skip(filter.offset())
            .take(filter.limit())
            .map(|candidate| candidate.to_scored())
            .collect();
        debug!(
            total,
            returned = page.len(),
            page = filter.page,
            randomize = filter.randomize,
            "local retrieval served"
        );
        Ok(page)
    }

    async fn persist_rng(&self) -> SourceResult<()> {
        let Some(store) = &self.rng_store else {
            return Ok(());
        };
        put_json(store.as_ref(), keys::RNG_STATE_KEY, &self.rng.snapshot())
            .await
            .map_err(|source| SourceError::Store {
                operation: "persist_rng",
                source,
            })
    }

    fn count(&self, filter: &Filter, user_data: &UserData) -> SourceResult<usize> {
        filter.validate(user_data)?;
        let snapshot = self.loaded("get_count")?;
        Ok(snapshot.count(filter, user_data))
    }
}

#[async_trait]
impl FicSource for LocalFicSource {
    async fn fetch_data(
        &self,
        filter: &Filter,
        user_data: &UserData,
    ) -> SourceResult<Vec<ScoredStory>> {
        let result = self.fetch(filter, user_data).await;
        self.record("fetch_data", &result);
        result
    }

    async fn get_count(&self, filter: &Filter, user_data: &UserData) -> SourceResult<usize> {
        let result = self.count(filter, user_data);
        self.record("get_count", &result);
        result
    }
}
