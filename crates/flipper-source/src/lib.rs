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

//! Story retrieval: the in-process `LocalFicSource`, the HTTP
//! `RemoteFicSource`, and the router that serves any `FicSource` remotely.
//!
//! Layout: `corpus.rs` (snapshot and selection), `local.rs`, `remote.rs`,
//! `service.rs` (axum router), `wire.rs` (request and error bodies).

pub mod corpus;
pub mod local;
pub mod remote;
pub mod service;
pub mod wire;

pub use corpus::CorpusSnapshot;
pub use local::LocalFicSource;
pub use remote::RemoteFicSource;
pub use service::{router, serve};
pub use wire::{CountResponse, ErrorBody, FETCH_PATH, COUNT_PATH, RetrievalRequest};
