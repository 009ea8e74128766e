#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Domain model, retrieval filters, and storage/source interfaces shared by
//! every Flipper crate.
//!
//! Layout: `model/` (corpus records and user preferences), `filter/` (the
//! canonical `Filter`, its side-channel and the builder), `rng.rs`
//! (reproducible shuffles), `service/` (traits implemented by adapters),
//! `error.rs`.

pub mod error;
pub mod filter;
pub mod model;
pub mod rng;
pub mod service;

pub use error::{
    FetchError, FetchResult, ParseError, ParseResult, SourceError, SourceResult, StoreError,
    StoreResult,
};
pub use filter::builder::FilterBuilder;
pub use filter::{Filter, SlashFilter, SortMode, UserData};
pub use model::{
    Author, AuthorId, CachedPage, Fandom, FandomFilter, FandomId, FandomPage, FandomToken,
    FicMatch, RecommendationList, RecommendationParams, ScoredStory, Story, StoryId,
    UserFicList, UserPreferences, WebPage, WordcountFilter,
};
pub use rng::{RngDeterminismManager, RngSnapshot};
pub use service::{
    CacheStore, FicSource, PageFetcher, PageParser, Row, RowPredicate, get_json, list_json,
    put_json,
};
