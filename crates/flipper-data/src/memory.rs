//! In-process `CacheStore` used by tests and ephemeral runs.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use chrono::Utc;
use flipper_core::{CacheStore, Row, RowPredicate, StoreResult};
use serde_json::Value;
use tokio::sync::RwLock;

/// Ordered map of rows guarded by an async lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<String, Row>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store holds no rows.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Row>> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        let row = Row {
            key: key.to_owned(),
            value,
            updated_at: Utc::now(),
        };
        self.rows.write().await.insert(key.to_owned(), row);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.rows.write().await.remove(key).is_some())
    }

    async fn query(&self, prefix: &str, predicate: RowPredicate<'_>) -> StoreResult<Vec<Row>> {
        let rows = self.rows.read().await;
        let matched = rows
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, row)| row)
            .filter(|row| predicate(row))
            .cloned()
            .collect();
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("story:1").await.unwrap().is_none());

        store.put("story:1", json!({"id": 1})).await.unwrap();
        let row = store.get("story:1").await.unwrap().unwrap();
        assert_eq!(row.value["id"], 1);

        assert!(store.delete("story:1").await.unwrap());
        assert!(!store.delete("story:1").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn query_respects_prefix_and_predicate() {
        let store = MemoryStore::new();
        for (key, words) in [
            ("author:1", 0),
            ("story:1", 100),
            ("story:2", 5_000),
            ("story:3", 20_000),
            ("storyline", 1),
        ] {
            store.put(key, json!({ "words": words })).await.unwrap();
        }

        let long = store
            .query("story:", &|row: &Row| row.value["words"].as_u64() > Some(1_000))
            .await
            .unwrap();
        let keys: Vec<_> = long.iter().map(|row| row.key.as_str()).collect();
        assert_eq!(keys, ["story:2", "story:3"]);
        assert_eq!(store.len().await, 5);
    }

    #[tokio::test]
    async fn put_refreshes_timestamp() {
        let store = MemoryStore::new();
        store.put("page:a", json!("one")).await.unwrap();
        let first = store.get("page:a").await.unwrap().unwrap().updated_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.put("page:a", json!("two")).await.unwrap();
        let second = store.get("page:a").await.unwrap().unwrap();
        assert!(second.updated_at > first);
        assert_eq!(second.value, json!("two"));
    }
}
