//! Storage backend failures and their mapping onto [`StoreError`].

use flipper_core::StoreError;
use thiserror::Error;

/// Result alias for backend setup.
pub type DataResult<T> = std::result::Result<T, DataError>;

/// Failures raised by the Postgres store.
#[derive(Debug, Error)]
pub enum DataError {
    /// The pool could not reach the database.
    #[error("could not connect to the key-value database")]
    Connect {
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },
    /// The schema could not be brought up to date.
    #[error("key-value schema migration did not apply")]
    Migrate {
        /// Migrator error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },
    /// A statement against the `kv_entries` table failed.
    #[error("key-value statement failed")]
    Statement {
        /// Store operation that issued the statement.
        operation: &'static str,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },
}

impl DataError {
    const fn operation(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "kv.connect",
            Self::Migrate { .. } => "kv.migrate",
            Self::Statement { operation, .. } => *operation,
        }
    }
}

impl From<DataError> for StoreError {
    fn from(error: DataError) -> Self {
        Self::backend(error.operation(), error)
    }
}

/// Adapter for `map_err` on store statements.
pub(crate) fn statement(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| DataError::Statement { operation, source }.into()
}
