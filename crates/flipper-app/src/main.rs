#![forbid(unsafe_code)]
#![warn(unused, clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]

//! Binary entrypoint that wires the Flipper core together and runs until
//! interrupted.

use flipper_app::{AppResult, run_app};

/// Bootstraps the core and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
