#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]

//! Typed configuration for the Flipper core.
//! Layout: model.rs (settings and defaults), loader.rs (YAML + environment), validate.rs, error.rs.

pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_PATH_ENV, load, load_from};
pub use model::{CoreConfig, EngineSettings, LogSettings, RecommendationMode, SourceMode};
