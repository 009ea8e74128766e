//! Process-lifetime coordinator for crawls, retrieval and recommendation lists.
//!
//! # Design
//! - Every collaborator comes from an explicit [`CoreContext`]; nothing is global.
//! - Crawls return a [`Crawl`] whose ingestion follow-up (fandom timestamps,
//!   source reload, result count) runs in the background once the task stops.
//! - Unfinished, non-cancelled tasks are resumed by [`CoreOrchestrator::init`].
//! - With a remote source the shuffle runs on the service, so a bust is kept
//!   as a pending reset and sent with the user's next random request.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use flipper_core::service::keys;
use flipper_core::{
    Author, Fandom, Filter, FilterBuilder, RecommendationList, RecommendationParams, RngSnapshot,
    ScoredStory, UserData, UserPreferences, get_json, list_json, put_json,
};
use flipper_events::Event;
use flipper_tasks::{CacheMode, PageTask, TaskHandle, TaskKind, UrlStatus};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::CoreContext;
use crate::error::{AppError, AppResult};
use crate::lists::parse_source_list;
use crate::recommendations::RecommendationBuilder;

/// Cache behaviour for a crawl.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Free-text description stored with the task.
    pub comment: String,
    /// Page cache policy.
    pub cache_mode: CacheMode,
    /// Cached pages older than this are treated as missing.
    pub forced_cutoff: Option<DateTime<Utc>>,
    /// Whether pages older than `forced_cutoff` may be refetched.
    pub allow_cache_refresh: bool,
}

impl CrawlOptions {
    /// Options with the given comment and the default cache policy.
    #[must_use]
    pub fn new(comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
            cache_mode: CacheMode::UseCache,
            forced_cutoff: None,
            allow_cache_refresh: true,
        }
    }

    /// Use a different cache mode.
    #[must_use]
    pub const fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// Treat pages cached before `cutoff` as stale.
    #[must_use]
    pub const fn forced_cutoff(mut self, cutoff: DateTime<Utc>, allow_refresh: bool) -> Self {
        self.forced_cutoff = Some(cutoff);
        self.allow_cache_refresh = allow_refresh;
        self
    }
}

/// A running crawl and its ingestion follow-up.
pub struct Crawl {
    task: TaskHandle,
    follow_up: JoinHandle<AppResult<PageTask>>,
}

impl Crawl {
    /// Engine handle for status polling and cancellation.
    #[must_use]
    pub const fn task(&self) -> &TaskHandle {
        &self.task
    }

    /// Wait for the task to stop and its results to be visible to retrieval.
    ///
    /// # Errors
    ///
    /// Returns an error when the follow-up failed to update the corpus or
    /// reload the source.
    pub async fn finished(self) -> AppResult<PageTask> {
        self.follow_up
            .await
            .map_err(|err| AppError::join("crawl.follow_up", err))?
    }
}

/// Owns the core for the lifetime of the process.
#[derive(Clone)]
pub struct CoreOrchestrator {
    ctx: Arc<CoreContext>,
    recommendations: RecommendationBuilder,
    resumed: Arc<Mutex<Vec<Crawl>>>,
    pending_resets: Arc<Mutex<BTreeSet<String>>>,
}

impl CoreOrchestrator {
    /// Restore random sequence state, load the corpus and resume interrupted crawls.
    ///
    /// # Errors
    ///
    /// Returns an error when the stores cannot be read, the corpus cannot be
    /// loaded or a task cannot be resumed.
    pub async fn init(ctx: CoreContext) -> AppResult<Self> {
        let ctx = Arc::new(ctx);
        let orchestrator = Self {
            recommendations: RecommendationBuilder::new(Arc::clone(&ctx)),
            ctx,
            resumed: Arc::new(Mutex::new(Vec::new())),
            pending_resets: Arc::new(Mutex::new(BTreeSet::new())),
        };

        let snapshot: Option<RngSnapshot> =
            get_json(orchestrator.ctx.stores.users.as_ref(), keys::RNG_STATE_KEY)
                .await
                .map_err(|err| AppError::store("init.rng_state", err))?;
        if let Some(snapshot) = snapshot {
            debug!(users = snapshot.tokens.len(), "random sequence state restored");
            orchestrator.ctx.rng.restore(snapshot);
        }
        let pending: Option<BTreeSet<String>> = get_json(
            orchestrator.ctx.stores.users.as_ref(),
            keys::RNG_PENDING_RESETS_KEY,
        )
        .await
        .map_err(|err| AppError::store("init.rng_pending_resets", err))?;
        if let Some(pending) = pending {
            *orchestrator.pending_resets() = pending;
        }

        orchestrator.reload_local("init").await?;

        let unfinished = orchestrator
            .ctx
            .engine
            .list_unfinished()
            .await
            .map_err(|err| AppError::task("init.list_unfinished", err))?;
        let mut crawls = Vec::new();
        for task in unfinished.into_iter().filter(|task| !task.cancelled) {
            let handle = orchestrator
                .ctx
                .engine
                .resume(task.id)
                .await
                .map_err(|err| AppError::task("init.resume", err))?;
            info!(task_id = %task.id, kind = ?task.kind, "resuming interrupted crawl");
            crawls.push(orchestrator.follow(handle));
        }
        if !crawls.is_empty() {
            orchestrator
                .ctx
                .events
                .info(format!("resumed {} interrupted crawl(s)", crawls.len()));
        }
        *orchestrator
            .resumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = crawls;

        info!(
            stories = ?orchestrator.ctx.local.as_ref().map(|local| local.loaded_count()),
            "core orchestrator ready"
        );
        Ok(orchestrator)
    }

    /// Shared context.
    #[must_use]
    pub const fn context(&self) -> &Arc<CoreContext> {
        &self.ctx
    }

    /// Crawls resumed by [`Self::init`]; each is handed out once.
    #[must_use]
    pub fn take_resumed(&self) -> Vec<Crawl> {
        std::mem::take(&mut *self.resumed.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Reload the local corpus and report how many stories are visible.
    ///
    /// # Errors
    ///
    /// Returns an error when the corpus or the retrieval source is unavailable.
    pub async fn load_data(&self) -> AppResult<usize> {
        self.reload_local("load_data").await?;
        self.result_count().await
    }

    /// Number of stories visible to the configured source; also published as an event.
    ///
    /// # Errors
    ///
    /// Returns an error when the retrieval source is unavailable.
    pub async fn result_count(&self) -> AppResult<usize> {
        let count = self
            .ctx
            .source
            .get_count(&Filter::unrestricted(self.ctx.now()), &UserData::default())
            .await
            .map_err(|err| AppError::retrieval("result_count", err))?;
        self.ctx.events.publish(Event::ResultCount { count });
        Ok(count)
    }

    /// Store the fandoms and crawl their listing pages.
    ///
    /// # Errors
    ///
    /// Returns an error when the fandoms cannot be stored or the task is rejected.
    pub async fn process_fandoms_as_task(
        &self,
        fandoms: &[Fandom],
        options: CrawlOptions,
    ) -> AppResult<Crawl> {
        let corpus = self.ctx.stores.corpus.as_ref();
        for fandom in fandoms {
            put_json(corpus, &keys::fandom(fandom.id), fandom)
                .await
                .map_err(|err| AppError::store("process_fandoms.store_fandom", err))?;
        }
        let urls = fandoms.iter().map(|fandom| fandom.url.clone()).collect();
        self.submit(TaskKind::Fandom, urls, options).await
    }

    /// Crawl every tracked fandom; `None` when nothing is tracked.
    ///
    /// # Errors
    ///
    /// Returns an error when the corpus cannot be read or the task is rejected.
    pub async fn load_tracked_fandoms(
        &self,
        forced_cutoff: Option<DateTime<Utc>>,
        cache_mode: CacheMode,
    ) -> AppResult<Option<Crawl>> {
        let fandoms: Vec<Fandom> = self.fandoms("load_tracked_fandoms").await?;
        let tracked: Vec<Fandom> = fandoms.into_iter().filter(|fandom| fandom.tracked).collect();
        if tracked.is_empty() {
            self.ctx.events.info("no tracked fandoms to refresh");
            return Ok(None);
        }
        let mut options = CrawlOptions::new(format!("refresh {} tracked fandom(s)", tracked.len()))
            .cache_mode(cache_mode);
        if let Some(cutoff) = forced_cutoff {
            options = options.forced_cutoff(cutoff, true);
        }
        let urls = tracked.iter().map(|fandom| fandom.url.clone()).collect();
        self.submit(TaskKind::Fandom, urls, options).await.map(Some)
    }

    /// Crawl the authors that contributed to a stored recommendation list.
    ///
    /// Returns `None` when none of the list's authors have a known page.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for unknown lists, and store or engine errors.
    pub async fn load_more_authors(
        &self,
        list_name: &str,
        cache_mode: CacheMode,
    ) -> AppResult<Option<Crawl>> {
        let corpus = self.ctx.stores.corpus.as_ref();
        let list: RecommendationList = get_json(corpus, &keys::reclist(list_name))
            .await
            .map_err(|err| AppError::store("load_more_authors.list", err))?
            .ok_or_else(|| AppError::NotFound {
                kind: "recommendation_list",
                key: list_name.to_owned(),
            })?;
        let mut urls = Vec::with_capacity(list.authors.len());
        for id in &list.authors {
            let author: Option<Author> = get_json(corpus, &keys::author(*id))
                .await
                .map_err(|err| AppError::store("load_more_authors.author", err))?;
            if let Some(author) = author.filter(|author| !author.url.is_empty()) {
                urls.push(author.url);
            }
        }
        if urls.is_empty() {
            return Ok(None);
        }
        let options =
            CrawlOptions::new(format!("load authors of {list_name}")).cache_mode(cache_mode);
        self.submit(TaskKind::Author, urls, options).await.map(Some)
    }

    /// Fetch and store one author page; `None` when the page could not be ingested.
    ///
    /// # Errors
    ///
    /// Returns an error when the task is rejected or the corpus cannot be read.
    pub async fn load_author(&self, url: &str) -> AppResult<Option<Author>> {
        let crawl = self
            .submit(
                TaskKind::Author,
                vec![url.to_owned()],
                CrawlOptions::new(format!("load author {url}")),
            )
            .await?;
        let task = crawl.finished().await?;
        if task.count(UrlStatus::Done) == 0 {
            warn!(url, state = task.state.as_str(), "author page not loaded");
            return Ok(None);
        }
        let authors: Vec<Author> = list_json(self.ctx.stores.corpus.as_ref(), keys::AUTHOR_PREFIX)
            .await
            .map_err(|err| AppError::store("load_author", err))?;
        Ok(authors.into_iter().find(|author| author.url == url))
    }

    /// Parse a plain-text source list and build a recommendation list from it.
    ///
    /// Unrecognized lines are reported as info events and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error when the list yields nothing to build from or the build fails.
    pub async fn process_list_into_recommendations(
        &self,
        name: &str,
        text: &str,
    ) -> AppResult<usize> {
        let list = parse_source_list(text);
        for line in &list.rejected {
            self.ctx
                .events
                .info(format!("skipped unrecognized source line: {line}"));
        }
        info!(
            list = name,
            sources = list.ids.len(),
            rejected = list.rejected.len(),
            "source list parsed"
        );
        self.build_recommendations(RecommendationParams::new(name, list.ids), true)
            .await
    }

    /// Build a recommendation list in the configured mode.
    ///
    /// # Errors
    ///
    /// Returns an error when the build fails.
    pub async fn build_recommendations(
        &self,
        params: RecommendationParams,
        clear_authors: bool,
    ) -> AppResult<usize> {
        self.recommendations
            .build(params, clear_authors)
            .await
            .map_err(|err| AppError::recommendation("build_recommendations", err))
    }

    /// Refresh the source authors upstream, then build the list.
    ///
    /// # Errors
    ///
    /// Returns an error when the build fails.
    pub async fn build_server_fetch(&self, params: RecommendationParams) -> AppResult<usize> {
        let count = self
            .recommendations
            .build_server_fetch(params)
            .await
            .map_err(|err| AppError::recommendation("build_server_fetch", err))?;
        self.result_count().await?;
        Ok(count)
    }

    /// Build a list from authors already in the corpus.
    ///
    /// # Errors
    ///
    /// Returns an error when the build fails.
    pub async fn build_local_version(
        &self,
        params: RecommendationParams,
        clear_authors: bool,
    ) -> AppResult<usize> {
        self.recommendations
            .build_local_version(params, clear_authors)
            .await
            .map_err(|err| AppError::recommendation("build_local_version", err))
    }

    /// The page of stories the preferences currently point at.
    ///
    /// # Errors
    ///
    /// Returns an error when the filter is rejected or the source is unavailable.
    pub async fn fetch_display_page(&self, prefs: &UserPreferences) -> AppResult<Vec<ScoredStory>> {
        let (filter, user_data) = self.ctx.filter_builder().build_display_filter(prefs);
        self.ctx
            .source
            .fetch_data(&filter, &user_data)
            .await
            .map_err(|err| AppError::retrieval("fetch_display_page", err))
    }

    /// Next random sample for the user.
    ///
    /// A scheduled bust is applied by this call and then cleared on `prefs`.
    /// With a remote source, a reset recorded by [`Self::bust_random_sequence`]
    /// is sent along and cleared once the service has answered.
    ///
    /// # Errors
    ///
    /// Returns an error when the filter is rejected, the source is unavailable
    /// or the random sequence state cannot be stored.
    pub async fn fetch_random_page(
        &self,
        prefs: &mut UserPreferences,
        sample_size: u32,
        quality_cutoff: u32,
    ) -> AppResult<Vec<ScoredStory>> {
        let (mut filter, user_data) =
            self.ctx
                .filter_builder()
                .build_random_sample_filter(prefs, sample_size, quality_cutoff);
        let pending_reset = self.pending_resets().contains(&filter.rng_owner);
        if pending_reset {
            filter.wipe_rng_sequence = true;
        }
        let page = self
            .ctx
            .source
            .fetch_data(&filter, &user_data)
            .await
            .map_err(|err| AppError::retrieval("fetch_random_page", err))?;
        if prefs.rng_bust_scheduled {
            prefs.rng_bust_scheduled = false;
            self.persist_rng("fetch_random_page").await?;
        }
        if pending_reset {
            self.pending_resets().remove(&filter.rng_owner);
            self.persist_pending_resets("fetch_random_page").await?;
        }
        Ok(page)
    }

    /// Number of full pages the preferences match.
    ///
    /// # Errors
    ///
    /// Returns an error when the filter is rejected or the source is unavailable.
    pub async fn page_count(&self, prefs: &UserPreferences) -> AppResult<usize> {
        let (filter, user_data) = self
            .ctx
            .filter_builder()
            .build_count_estimate_filter(prefs, prefs.page_size);
        let total = self
            .ctx
            .source
            .get_count(&filter, &user_data)
            .await
            .map_err(|err| AppError::retrieval("page_count", err))?;
        Ok(FilterBuilder::page_count(total, prefs.page_size))
    }

    /// Start a fresh random sequence for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the random sequence state cannot be stored.
    pub async fn bust_random_sequence(&self, user_id: &str) -> AppResult<()> {
        self.ctx.rng.bust(user_id);
        self.persist_rng("bust_random_sequence").await?;
        if self.ctx.local.is_none() {
            self.pending_resets().insert(user_id.to_owned());
            self.persist_pending_resets("bust_random_sequence").await?;
            debug!(user_id, "random sequence reset queued for the remote source");
        }
        Ok(())
    }

    async fn submit(
        &self,
        kind: TaskKind,
        urls: Vec<String>,
        options: CrawlOptions,
    ) -> AppResult<Crawl> {
        let mut request = self
            .ctx
            .task_request(kind, options.comment, urls)
            .cache_mode(options.cache_mode);
        if let Some(cutoff) = options.forced_cutoff {
            request = request.forced_cutoff(cutoff, options.allow_cache_refresh);
        }
        let handle = self
            .ctx
            .engine
            .submit(request)
            .await
            .map_err(|err| AppError::task("submit", err))?;
        Ok(self.follow(handle))
    }

    fn follow(&self, handle: TaskHandle) -> Crawl {
        let orchestrator = self.clone();
        let task = handle.clone();
        let follow_up = tokio::spawn(async move { orchestrator.finish_task(&handle).await });
        Crawl { task, follow_up }
    }

    /// Wait for a task and make its results visible.
    async fn finish_task(&self, handle: &TaskHandle) -> AppResult<PageTask> {
        let task = handle.wait().await;
        if task.cancelled || !task.is_settled() {
            debug!(
                task_id = %task.id,
                state = task.state.as_str(),
                "crawl stopped early; left for a later resume"
            );
            return Ok(task);
        }
        match task.kind {
            TaskKind::Fandom => {
                self.stamp_fandoms(&task).await?;
                self.reload_local("finish_task").await?;
            }
            TaskKind::Author => self.reload_local("finish_task").await?,
            TaskKind::Generic => {}
        }
        self.result_count().await?;
        info!(
            task_id = %task.id,
            state = task.state.as_str(),
            done = task.count(UrlStatus::Done),
            failed = task.count(UrlStatus::Failed),
            "crawl finished"
        );
        Ok(task)
    }

    /// Record the crawl time on every fandom whose page was ingested.
    async fn stamp_fandoms(&self, task: &PageTask) -> AppResult<()> {
        let done: BTreeSet<&str> = task
            .entries
            .iter()
            .filter(|entry| entry.status == UrlStatus::Done)
            .map(|entry| entry.url.as_str())
            .collect();
        if done.is_empty() {
            return Ok(());
        }
        let stamp = task.finished_at.unwrap_or_else(|| self.ctx.now());
        let corpus = self.ctx.stores.corpus.as_ref();
        for mut fandom in self.fandoms("stamp_fandoms").await? {
            if done.contains(fandom.url.as_str()) {
                fandom.last_update = Some(stamp);
                put_json(corpus, &keys::fandom(fandom.id), &fandom)
                    .await
                    .map_err(|err| AppError::store("stamp_fandoms", err))?;
            }
        }
        Ok(())
    }

    async fn fandoms(&self, operation: &'static str) -> AppResult<Vec<Fandom>> {
        list_json(self.ctx.stores.corpus.as_ref(), keys::FANDOM_PREFIX)
            .await
            .map_err(|err| AppError::store(operation, err))
    }

    async fn reload_local(&self, operation: &'static str) -> AppResult<()> {
        if let Some(local) = &self.ctx.local {
            local
                .reload()
                .await
                .map_err(|err| AppError::retrieval(operation, err))?;
        }
        Ok(())
    }

    fn pending_resets(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.pending_resets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn persist_pending_resets(&self, operation: &'static str) -> AppResult<()> {
        let pending = self.pending_resets().clone();
        put_json(
            self.ctx.stores.users.as_ref(),
            keys::RNG_PENDING_RESETS_KEY,
            &pending,
        )
        .await
        .map_err(|err| AppError::store(operation, err))
    }

    async fn persist_rng(&self, operation: &'static str) -> AppResult<()> {
        put_json(
            self.ctx.stores.users.as_ref(),
            keys::RNG_STATE_KEY,
            &self.ctx.rng.snapshot(),
        )
        .await
        .map_err(|err| AppError::store(operation, err))
    }
}
