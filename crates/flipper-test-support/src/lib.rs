#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (corpus builders), fetcher.rs (scripted upstream), postgres.rs (database discovery).

pub mod fetcher;
pub mod fixtures;
pub mod postgres;
