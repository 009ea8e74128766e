#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]

//! Key/row storage backends implementing `flipper_core::CacheStore`.
//! Layout: memory.rs (in-process store), postgres.rs (sqlx-backed store), error.rs.

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{DataError, DataResult};
pub use memory::MemoryStore;
pub use postgres::PgStore;
