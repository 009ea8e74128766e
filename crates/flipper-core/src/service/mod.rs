//! Traits implemented by storage, retrieval and parsing adapters.

pub mod keys;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{FetchResult, ParseResult, SourceResult, StoreError, StoreResult};
use crate::filter::{Filter, UserData};
use crate::model::{Author, FandomPage, ScoredStory, WebPage};

/// "Where stories live": executes a filter against some corpus.
#[async_trait]
pub trait FicSource: Send + Sync {
    /// Ordered page of stories selected by `filter`, bounded by its record
    /// limit and offset by its page index.
    async fn fetch_data(&self, filter: &Filter, user_data: &UserData)
    -> SourceResult<Vec<ScoredStory>>;

    /// Number of stories `filter` selects, ignoring paging.
    async fn get_count(&self, filter: &Filter, user_data: &UserData) -> SourceResult<usize>;
}

/// A stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Row key.
    pub key: String,
    /// JSON payload.
    pub value: Value,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Predicate applied to rows by [`CacheStore::query`].
pub type RowPredicate<'a> = &'a (dyn Fn(&Row) -> bool + Send + Sync);

/// Generic key/row storage used for the corpus, the page cache and task state.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a row by key.
    async fn get(&self, key: &str) -> StoreResult<Option<Row>>;

    /// Insert or replace a row; `updated_at` is set to the write time.
    async fn put(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Remove a row, returning whether it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Rows whose key starts with `prefix` and that satisfy `predicate`, in key order.
    async fn query(&self, prefix: &str, predicate: RowPredicate<'_>) -> StoreResult<Vec<Row>>;
}

/// Retrieves raw page bodies from upstream.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Body of the page at `url`.
    async fn fetch(&self, url: &str) -> FetchResult<String>;
}

/// Converts fetched upstream pages into corpus records.
pub trait PageParser: Send + Sync {
    /// Stories listed on a fandom page.
    ///
    /// # Errors
    ///
    /// Returns a parse error when the page has an unexpected shape.
    fn parse_fandom_page(&self, page: &WebPage) -> ParseResult<FandomPage>;

    /// Author profile with favourites.
    ///
    /// # Errors
    ///
    /// Returns a parse error when the page has an unexpected shape.
    fn parse_author_page(&self, page: &WebPage) -> ParseResult<Author>;
}

/// Read and decode a JSON row.
///
/// # Errors
///
/// Propagates backend failures and reports rows that do not decode as `T`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> StoreResult<Option<T>> {
    let Some(row) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_value(row.value)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            key: key.to_owned(),
            source,
        })
}

/// Encode and write a JSON row.
///
/// # Errors
///
/// Propagates backend failures and reports values that cannot be encoded.
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let value = serde_json::to_value(value).map_err(|source| StoreError::Encode {
        key: key.to_owned(),
        source,
    })?;
    store.put(key, value).await
}

/// Decode every row under `prefix`.
///
/// # Errors
///
/// Propagates backend failures and the first row that fails to decode.
pub async fn list_json<T: DeserializeOwned>(
    store: &dyn CacheStore,
    prefix: &str,
) -> StoreResult<Vec<T>> {
    let rows = store.query(prefix, &|_: &Row| true).await?;
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row.value).map_err(|source| StoreError::Decode {
                key: row.key,
                source,
            })
        })
        .collect()
}
