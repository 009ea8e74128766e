#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]

//! Crawl task engine: splits URL batches into sub-tasks, fetches pages
//! through the page cache, retries failures and persists every transition so
//! interrupted runs can resume.
//!
//! Layout: model.rs (task records), cache.rs (cache policy), engine.rs
//! (worker pool and handles), http.rs (upstream fetcher), error.rs.

pub mod cache;
pub mod engine;
pub mod error;
pub mod http;
pub mod model;

pub use engine::{EngineDeps, EngineOptions, PageSink, PageTaskEngine, TaskHandle};
pub use error::{SinkError, TaskError, TaskResult, UrlError};
pub use http::HttpPageFetcher;
pub use model::{
    CacheMode, PageTask, TaskKind, TaskRequest, UrlEntry, UrlErrorKind, UrlStatus,
};
