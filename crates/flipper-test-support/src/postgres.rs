//! Discovery of an externally provided PostgreSQL instance for integration tests.

/// Environment variable naming the test database.
pub const TEST_DATABASE_URL_ENV: &str = "FLIPPER_TEST_DATABASE_URL";

/// Connection string supplied through `FLIPPER_TEST_DATABASE_URL`, if any.
///
/// Suites skip themselves when this returns `None`.
#[must_use]
pub fn external_database_url() -> Option<String> {
    std::env::var(TEST_DATABASE_URL_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
