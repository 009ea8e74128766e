//! Recommendation lists built from the favourites of like-minded authors.
//!
//! An author qualifies when enough of their favourites are among the list's
//! source fics: always at `always_pick_at` shared fics, otherwise at
//! `min_tag_count_match` shared fics if their favourites-to-matches ratio does
//! not exceed `pick_ratio`. Every non-source favourite of a qualifying author
//! gains one match.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use flipper_config::RecommendationMode;
use flipper_core::service::keys;
use flipper_core::{
    Author, AuthorId, Filter, RecommendationList, RecommendationParams, StoryId, UserData,
    get_json, list_json, put_json,
};
use flipper_events::Event;
use flipper_tasks::{CacheMode, TaskKind};
use tracing::{debug, info};

use crate::context::CoreContext;
use crate::error::{RecommendationError, RecommendationResult};

/// Match counts and contributing authors produced by scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorScoring {
    /// Story id to match count, source fics excluded.
    pub matches: BTreeMap<StoryId, u32>,
    /// Authors that qualified.
    pub authors: BTreeSet<AuthorId>,
}

/// Score `authors` against `params`, skipping the ids in `skip`.
#[must_use]
pub fn score_authors<'a>(
    authors: impl IntoIterator<Item = &'a Author>,
    params: &RecommendationParams,
    skip: &BTreeSet<AuthorId>,
) -> AuthorScoring {
    let mut scoring = AuthorScoring::default();
    for author in authors {
        if skip.contains(&author.id) {
            continue;
        }
        let shared = author.favourites.intersection(&params.sources).count();
        let shared = u32::try_from(shared).unwrap_or(u32::MAX);
        if shared == 0 || !qualifies(author, shared, params) {
            continue;
        }
        scoring.authors.insert(author.id);
        for fic in author.favourites.difference(&params.sources) {
            *scoring.matches.entry(*fic).or_insert(0) += 1;
        }
    }
    scoring
}

#[allow(clippy::cast_precision_loss)]
fn qualifies(author: &Author, shared: u32, params: &RecommendationParams) -> bool {
    if shared >= params.always_pick_at {
        return true;
    }
    if shared < params.min_tag_count_match {
        return false;
    }
    let ratio = author.favourites.len() as f64 / f64::from(shared);
    ratio <= params.pick_ratio
}

/// Builds and persists recommendation lists.
#[derive(Clone)]
pub struct RecommendationBuilder {
    ctx: Arc<CoreContext>,
}

impl RecommendationBuilder {
    /// Builder over the shared context.
    #[must_use]
    pub const fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx }
    }

    /// Build in the configured mode.
    ///
    /// # Errors
    ///
    /// See [`Self::build_server_fetch`] and [`Self::build_local_version`].
    pub async fn build(
        &self,
        params: RecommendationParams,
        clear_authors: bool,
    ) -> RecommendationResult<usize> {
        match self.ctx.config.recommendations {
            RecommendationMode::ServerFetch => self.build_server_fetch(params).await,
            RecommendationMode::Local => self.build_local_version(params, clear_authors).await,
        }
    }

    /// Refresh every author sharing a source fic, then rebuild the list from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`RecommendationError::EmptySource`] when there are no source
    /// fics or no known author shares any, and propagates store, engine and
    /// retrieval failures.
    pub async fn build_server_fetch(
        &self,
        params: RecommendationParams,
    ) -> RecommendationResult<usize> {
        if params.sources.is_empty() {
            return Err(RecommendationError::EmptySource { list: params.name });
        }
        let authors = self.authors("build_server_fetch").await?;
        let urls: Vec<String> = authors
            .iter()
            .filter(|author| !author.favourites.is_disjoint(&params.sources))
            .map(|author| author.url.clone())
            .collect();
        if urls.is_empty() {
            return Err(RecommendationError::EmptySource { list: params.name });
        }

        let request = self
            .ctx
            .task_request(
                TaskKind::Author,
                format!("refresh authors for {}", params.name),
                urls,
            )
            .cache_mode(CacheMode::ForceRefresh);
        let handle = self
            .ctx
            .engine
            .submit(request)
            .await
            .map_err(|source| RecommendationError::Task {
                operation: "build_server_fetch",
                source,
            })?;
        let task = handle.wait().await;
        info!(
            list = %params.name,
            task_id = %task.id,
            state = task.state.as_str(),
            "author refresh finished"
        );
        if let Some(local) = &self.ctx.local {
            local
                .reload()
                .await
                .map_err(|source| RecommendationError::Source {
                    operation: "build_server_fetch",
                    source,
                })?;
        }
        self.build_local_version(params, true).await
    }

    /// Build from the authors already in the corpus.
    ///
    /// With `clear_authors` unset, authors already in a stored list of the
    /// same name are kept and only new authors add matches.
    ///
    /// # Errors
    ///
    /// Returns [`RecommendationError::EmptySource`] when there are no source
    /// fics or no known author shares any, and propagates store and retrieval
    /// failures.
    pub async fn build_local_version(
        &self,
        params: RecommendationParams,
        clear_authors: bool,
    ) -> RecommendationResult<usize> {
        if params.sources.is_empty() {
            return Err(RecommendationError::EmptySource { list: params.name });
        }
        let corpus = self.ctx.stores.corpus.as_ref();
        let previous: Option<RecommendationList> = if clear_authors {
            None
        } else {
            get_json(corpus, &keys::reclist(&params.name))
                .await
                .map_err(|source| RecommendationError::Store {
                    operation: "load_list",
                    source,
                })?
        };
        let known = previous
            .as_ref()
            .map(|list| list.authors.clone())
            .unwrap_or_default();

        let authors = self.authors("build_local_version").await?;
        let scoring = score_authors(&authors, &params, &known);
        if scoring.authors.is_empty() && previous.is_none() {
            return Err(RecommendationError::EmptySource { list: params.name });
        }

        let mut matches = previous
            .as_ref()
            .map(|list| list.matches.clone())
            .unwrap_or_default();
        for (id, count) in scoring.matches {
            *matches.entry(id).or_insert(0) += count;
        }
        let mut contributing = known;
        contributing.extend(scoring.authors);

        let kept = self.present_in_corpus(matches).await?;
        let count = kept.len();
        let list = RecommendationList {
            params,
            matches: kept,
            authors: contributing,
            built_at: self.ctx.now(),
        };
        put_json(corpus, &keys::reclist(&list.params.name), &list)
            .await
            .map_err(|source| RecommendationError::Store {
                operation: "store_list",
                source,
            })?;

        info!(
            list = %list.params.name,
            stories = count,
            authors = list.authors.len(),
            "recommendation list built"
        );
        self.ctx.events.publish(Event::RecommendationsBuilt {
            list: list.params.name.clone(),
            count,
        });
        Ok(count)
    }

    async fn authors(&self, operation: &'static str) -> RecommendationResult<Vec<Author>> {
        list_json(self.ctx.stores.corpus.as_ref(), keys::AUTHOR_PREFIX)
            .await
            .map_err(|source| RecommendationError::Store { operation, source })
    }

    /// Keep the matched stories the retrieval source knows about.
    async fn present_in_corpus(
        &self,
        matches: BTreeMap<StoryId, u32>,
    ) -> RecommendationResult<BTreeMap<StoryId, u32>> {
        if matches.is_empty() {
            return Ok(matches);
        }
        let mut filter = Filter::unrestricted(self.ctx.now());
        filter.record_limit = i32::try_from(matches.len()).unwrap_or(i32::MAX);
        filter.recs_hash = matches;
        let stories = self
            .ctx
            .source
            .fetch_data(&filter, &UserData::default())
            .await
            .map_err(|source| RecommendationError::Source {
                operation: "select_candidates",
                source,
            })?;
        debug!(
            candidates = filter.recs_hash.len(),
            present = stories.len(),
            "recommendation candidates resolved"
        );
        Ok(stories
            .into_iter()
            .map(|scored| (scored.story.id, scored.score))
            .collect())
    }
}
