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

//! Flipper core wiring: the orchestrator, recommendation builder and bootstrap.
//!
//! Layout: `context.rs` (stores and shared handles), `orchestrator.rs`,
//! `recommendations.rs`, `sink.rs` and `parser.rs` (page ingestion),
//! `lists.rs` (source list input), `bootstrap.rs`, `error.rs`.

/// Application bootstrap and shutdown.
pub mod bootstrap;
/// Explicitly constructed process context.
pub mod context;
/// Application error types.
pub mod error;
/// Plain-text source list parsing.
pub mod lists;
/// Core orchestration.
pub mod orchestrator;
/// JSON page parser.
pub mod parser;
/// Recommendation list building.
pub mod recommendations;
/// Page ingestion into the corpus.
pub mod sink;

pub use bootstrap::run_app;
pub use context::{CoreContext, Stores};
pub use error::{AppError, AppResult, RecommendationError, RecommendationResult};
pub use lists::{SourceList, parse_source_list};
pub use orchestrator::{CoreOrchestrator, Crawl, CrawlOptions};
pub use parser::JsonPageParser;
pub use recommendations::{AuthorScoring, RecommendationBuilder, score_authors};
pub use sink::CorpusSink;
