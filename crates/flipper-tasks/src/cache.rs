//! Page cache access and the cache policy applied to every fetch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flipper_core::service::keys;
use flipper_core::{CacheStore, CachedPage, PageFetcher, StoreResult, WebPage, get_json, put_json};
use flipper_telemetry::FetchOrigin;

use crate::error::UrlError;
use crate::model::{CacheMode, PageTask};

/// Typed view over the page cache store.
#[derive(Clone)]
pub struct PageCache {
    store: Arc<dyn CacheStore>,
}

impl PageCache {
    /// Wrap a store holding cached pages.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Cached copy of `url`, if any.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn lookup(&self, url: &str) -> StoreResult<Option<CachedPage>> {
        get_json(self.store.as_ref(), &keys::page(url)).await
    }

    /// Store a freshly fetched body.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn insert(
        &self,
        url: &str,
        content: String,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<CachedPage> {
        let page = CachedPage {
            url: url.to_owned(),
            content,
            fetched_at,
        };
        put_json(self.store.as_ref(), &keys::page(url), &page).await?;
        Ok(page)
    }
}

/// Cache settings of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Cache mode.
    pub mode: CacheMode,
    /// Pages cached before this instant are stale.
    pub forced_cutoff: Option<DateTime<Utc>>,
    /// Whether stale pages are refetched; when `false` they are served anyway.
    pub allow_refresh: bool,
}

impl CachePolicy {
    /// Policy of a task.
    #[must_use]
    pub const fn of(task: &PageTask) -> Self {
        Self {
            mode: task.cache_mode,
            forced_cutoff: task.forced_cutoff,
            allow_refresh: task.allow_cache_refresh,
        }
    }

    /// Whether a cached copy may be served.
    #[must_use]
    pub fn accepts(&self, cached: &CachedPage) -> bool {
        let stale = self
            .forced_cutoff
            .is_some_and(|cutoff| cached.fetched_at < cutoff);
        !(stale && self.allow_refresh)
    }
}

/// Obtain `url` under `policy`, caching network responses.
///
/// # Errors
///
/// Returns [`UrlError::CacheMiss`] for cache-only lookups without a usable
/// entry, [`UrlError::FetchFailed`] for upstream failures and
/// [`UrlError::Cache`] when the page cache itself fails.
pub async fn resolve(
    cache: &PageCache,
    fetcher: &dyn PageFetcher,
    url: &str,
    policy: CachePolicy,
) -> Result<(WebPage, FetchOrigin), UrlError> {
    if policy.mode != CacheMode::ForceRefresh {
        let cached = cache.lookup(url).await.map_err(|source| UrlError::Cache {
            url: url.to_owned(),
            source,
        })?;
        match cached {
            Some(page) if policy.accepts(&page) => {
                return Ok((page.into_page(), FetchOrigin::Cache));
            }
            _ if policy.mode == CacheMode::CacheOnly => {
                return Err(UrlError::CacheMiss {
                    url: url.to_owned(),
                });
            }
            _ => {}
        }
    }

    let body = fetcher
        .fetch(url)
        .await
        .map_err(|source| UrlError::FetchFailed {
            url: url.to_owned(),
            source,
        })?;
    let cached = cache
        .insert(url, body, Utc::now())
        .await
        .map_err(|source| UrlError::Cache {
            url: url.to_owned(),
            source,
        })?;
    let mut page = cached.into_page();
    page.from_cache = false;
    Ok((page, FetchOrigin::Network))
}
