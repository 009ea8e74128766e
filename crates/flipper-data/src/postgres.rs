//! PostgreSQL-backed `CacheStore`.
//!
//! Every logical store (corpus, page cache, task state, user state) shares the
//! `flipper.kv` table and is separated by its namespace column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flipper_core::{CacheStore, Row, RowPredicate, StoreResult};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row as _};
use tracing::debug;

use crate::error::{DataError, DataResult, statement};

const UPSERT_SQL: &str = r"
    INSERT INTO flipper.kv (namespace, key, value, updated_at)
    VALUES ($1, $2, $3, now())
    ON CONFLICT (namespace, key)
    DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
";

const SELECT_SQL: &str = r"
    SELECT key, value, updated_at
    FROM flipper.kv
    WHERE namespace = $1 AND key = $2
";

const DELETE_SQL: &str = r"
    DELETE FROM flipper.kv
    WHERE namespace = $1 AND key = $2
";

const SELECT_PREFIX_SQL: &str = r"
    SELECT key, value, updated_at
    FROM flipper.kv
    WHERE namespace = $1 AND left(key, char_length($2)) = $2
    ORDER BY key
";

/// Namespaced view over the shared `flipper.kv` table.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    namespace: String,
}

impl PgStore {
    /// Connect to `database_url` and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or migrations fail.
    pub async fn connect(database_url: &str, max_connections: u32) -> DataResult<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|source| DataError::Connect { source })?;
        Self::migrate(&pool).await?;
        Ok(pool)
    }

    /// Apply the embedded migrations to `pool`.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(pool: &PgPool) -> DataResult<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(pool)
            .await
            .map_err(|source| DataError::Migrate { source })
    }

    /// Store view scoped to `namespace`.
    #[must_use]
    pub fn new(pool: PgPool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    /// Namespace this view reads and writes.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<Row, sqlx::Error> {
    let Json(value): Json<Value> = row.try_get("value")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(Row {
        key: row.try_get("key")?,
        value,
        updated_at,
    })
}

#[async_trait]
impl CacheStore for PgStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Row>> {
        let row = sqlx::query(SELECT_SQL)
            .bind(&self.namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(statement("kv.get"))?;
        row.as_ref()
            .map(decode_row)
            .transpose()
            .map_err(statement("kv.get.decode"))
    }

    async fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        sqlx::query(UPSERT_SQL)
            .bind(&self.namespace)
            .bind(key)
            .bind(Json(value))
            .execute(&self.pool)
            .await
            .map_err(statement("kv.put"))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query(DELETE_SQL)
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(statement("kv.delete"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, prefix: &str, predicate: RowPredicate<'_>) -> StoreResult<Vec<Row>> {
        let rows = sqlx::query(SELECT_PREFIX_SQL)
            .bind(&self.namespace)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(statement("kv.query"))?;
        let mut matched = Vec::with_capacity(rows.len());
        for row in &rows {
            let row = decode_row(row).map_err(statement("kv.query.decode"))?;
            if predicate(&row) {
                matched.push(row);
            }
        }
        debug!(
            namespace = %self.namespace,
            prefix,
            scanned = rows.len(),
            matched = matched.len(),
            "kv prefix query"
        );
        Ok(matched)
    }
}
