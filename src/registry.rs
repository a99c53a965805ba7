//! Document registry (C9): an in-memory index of per-document,
//! per-collection chunk counts, rebuilt on startup by scanning the vector
//! store's distinct documents per collection.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::RagError;
use crate::models::{Collection, DocumentInfo};
use crate::store::{Predicate, VectorStore};

pub struct DocumentRegistry {
    store: Arc<dyn VectorStore>,
    entries: RwLock<HashMap<String, DocumentInfo>>,
}

impl DocumentRegistry {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store, entries: RwLock::new(HashMap::new()) }
    }

    /// Rebuilds the registry from the vector store's distinct documents per
    /// collection. Called once at startup.
    pub async fn rebuild(&self) -> Result<(), RagError> {
        let mut entries: HashMap<String, DocumentInfo> = HashMap::new();

        for collection in Collection::ALL {
            let documents = self.store.list_distinct(collection, "document").await?;
            for doc in documents {
                let count = self.store.count(collection, &vec![Predicate::DocumentIn(vec![doc.clone()])]).await?;
                let entry = entries.entry(doc.clone()).or_insert_with(|| DocumentInfo {
                    filename: doc.clone(),
                    chunk_counts: HashMap::new(),
                    first_ingest_time: None,
                });
                entry.chunk_counts.insert(collection.as_str().to_string(), count);
            }
        }

        *self.entries.write().await = entries;
        Ok(())
    }

    pub async fn has(&self, filename: &str) -> bool {
        self.entries.read().await.contains_key(filename)
    }

    pub async fn list(&self) -> Vec<DocumentInfo> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn get(&self, filename: &str) -> Option<DocumentInfo> {
        self.entries.read().await.get(filename).cloned()
    }

    pub async fn record(&self, filename: &str, collection: Collection, n_chunks: u64) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(filename.to_string()).or_insert_with(|| DocumentInfo {
            filename: filename.to_string(),
            chunk_counts: HashMap::new(),
            first_ingest_time: None,
        });
        entry.chunk_counts.insert(collection.as_str().to_string(), n_chunks);
        if entry.first_ingest_time.is_none() {
            entry.first_ingest_time = Some(Utc::now());
        }
    }

    /// Clears every collection in the vector store and the in-memory
    /// registry, returning the number of rows deleted per collection.
    pub async fn clear_all(&self) -> Result<Vec<(Collection, u64)>, RagError> {
        let mut deleted = Vec::new();
        for collection in Collection::ALL {
            let n = self.store.delete(collection, &vec![]).await?;
            deleted.push((collection, n));
        }
        self.entries.write().await.clear();
        Ok(deleted)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteVectorStore;
    use crate::store::UpsertItem;
    use sqlx::SqlitePool;

    async fn test_registry() -> DocumentRegistry {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool));
        DocumentRegistry::new(store)
    }

    #[tokio::test]
    async fn record_then_has_reports_presence() {
        let registry = test_registry().await;
        assert!(!registry.has("a.txt").await);
        registry.record("a.txt", Collection::Documents, 3).await;
        assert!(registry.has("a.txt").await);
    }

    #[tokio::test]
    async fn rebuild_reflects_store_contents() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool));
        store
            .upsert(
                Collection::Documents,
                vec![UpsertItem {
                    id: "a.txt::documents::000000".to_string(),
                    vector: vec![1.0, 0.0],
                    content: "hello".to_string(),
                    document: "a.txt".to_string(),
                    metadata: serde_json::json!({}),
                }],
            )
            .await
            .unwrap();

        let registry = DocumentRegistry::new(store);
        registry.rebuild().await.unwrap();
        assert!(registry.has("a.txt").await);
        let info = registry.get("a.txt").await.unwrap();
        assert_eq!(info.chunk_counts.get("documents"), Some(&1));
    }

    #[tokio::test]
    async fn clear_all_empties_registry() {
        let registry = test_registry().await;
        registry.record("a.txt", Collection::Documents, 3).await;
        registry.clear_all().await.unwrap();
        assert!(registry.list().await.is_empty());
    }
}
