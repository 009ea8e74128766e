use anyhow::{Context, Result};
use chrono::Utc;
use flipper_core::{CacheStore, Row};
use flipper_data::PgStore;
use flipper_test_support::postgres::external_database_url;
use serde_json::json;

async fn with_store<F, Fut>(test: F) -> Result<()>
where
    F: FnOnce(PgStore) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let Some(url) = external_database_url() else {
        eprintln!("skipping pg store tests: FLIPPER_TEST_DATABASE_URL not set");
        return Ok(());
    };
    let pool = PgStore::connect(&url, 2)
        .await
        .context("failed to prepare test database")?;
    let namespace = format!("test-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
    let store = PgStore::new(pool.clone(), namespace.clone());

    let result = test(store).await;

    sqlx::query("DELETE FROM flipper.kv WHERE namespace = $1")
        .bind(&namespace)
        .execute(&pool)
        .await
        .context("failed to clean namespace")?;
    pool.close().await;
    result
}

#[tokio::test]
async fn rows_round_trip_through_postgres() -> Result<()> {
    with_store(|store| async move {
        store.put("story:1", json!({"words": 10})).await?;
        store.put("story:2", json!({"words": 9_000})).await?;
        store.put("author:1", json!({"name": "a"})).await?;

        let row = store.get("story:1").await?.context("row missing")?;
        assert_eq!(row.value["words"], 10);

        let long = store
            .query("story:", &|row: &Row| row.value["words"].as_u64() > Some(100))
            .await?;
        assert_eq!(long.len(), 1);
        assert_eq!(long[0].key, "story:2");

        assert!(store.delete("story:1").await?);
        assert!(store.get("story:1").await?.is_none());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn namespaces_are_isolated() -> Result<()> {
    with_store(|store| async move {
        store.put("page:x", json!("cached")).await?;
        let other = PgStore::new(store.pool().clone(), format!("{}-other", store.namespace()));
        assert!(other.get("page:x").await?.is_none());
        Ok(())
    })
    .await
}
