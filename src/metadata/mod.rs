//! Index metadata storage / 索引元数据存储
//!
//! Callbacks resolve their index on every request, so lookups go
//! through a read-through cache that deletions evict.

pub mod sqlite;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::{Index, NewIndex};

pub use sqlite::SqliteMetadata;

#[async_trait]
pub trait MetadataDatabase: Send + Sync {
    /// Live indexes of a project, newest first / 项目下未删除的索引
    async fn get_indexes(&self, project_uuid: &str) -> Result<Vec<Index>>;

    /// Live index by public ID / 按公开 ID 查询
    async fn get_index(&self, public_id: &str) -> Result<Option<Index>>;

    async fn create_index(&self, new_index: NewIndex) -> Result<Index>;

    /// Soft delete, owner only; `false` when nothing matched / 软删除
    async fn delete_index(&self, public_id: &str, authz_id: &str) -> Result<bool>;
}

/// Read-through index cache / 索引缓存
///
/// A lookup only stores its row if no eviction happened while it was
/// reading the database.
#[derive(Default)]
pub struct MetadataCache {
    entries: RwLock<CacheEntries>,
}

#[derive(Default)]
struct CacheEntries {
    indexes: HashMap<String, Index>,
    /// Bumped on every eviction / 每次淘汰递增
    generation: u64,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_index(
        &self,
        database: &dyn MetadataDatabase,
        public_id: &str,
    ) -> Result<Option<Index>> {
        let generation = {
            let entries = self.entries.read();
            if let Some(index) = entries.indexes.get(public_id) {
                return Ok(Some(index.clone()));
            }
            entries.generation
        };

        let index = database.get_index(public_id).await?;
        if let Some(ref index) = index {
            let mut entries = self.entries.write();
            if entries.generation == generation {
                entries.indexes.insert(public_id.to_string(), index.clone());
            }
        }
        Ok(index)
    }

    pub fn evict(&self, public_id: &str) {
        let mut entries = self.entries.write();
        entries.indexes.remove(public_id);
        entries.generation = entries.generation.wrapping_add(1);
    }

    pub fn len(&self) -> usize {
        self.entries.read().indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().indexes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::sync::Arc;

    /// Deletes the index right after reading it, like a concurrent DELETE
    /// landing while the lookup is in flight / 读取后立即被并发删除
    struct DeletedMidLookup {
        inner: SqliteMetadata,
        cache: Arc<MetadataCache>,
    }

    #[async_trait]
    impl MetadataDatabase for DeletedMidLookup {
        async fn get_indexes(&self, project_uuid: &str) -> Result<Vec<Index>> {
            self.inner.get_indexes(project_uuid).await
        }

        async fn get_index(&self, public_id: &str) -> Result<Option<Index>> {
            let index = self.inner.get_index(public_id).await?;
            if let Some(ref index) = index {
                self.inner.delete_index(public_id, &index.authz_id).await?;
                self.cache.evict(public_id);
            }
            Ok(index)
        }

        async fn create_index(&self, new_index: NewIndex) -> Result<Index> {
            self.inner.create_index(new_index).await
        }

        async fn delete_index(&self, public_id: &str, authz_id: &str) -> Result<bool> {
            self.inner.delete_index(public_id, authz_id).await
        }
    }

    #[tokio::test]
    async fn test_eviction_during_lookup_is_not_overwritten() {
        let cache = Arc::new(MetadataCache::new());
        let racing = DeletedMidLookup {
            inner: SqliteMetadata::new(db::connect_in_memory().await),
            cache: cache.clone(),
        };
        let index = racing
            .create_index(NewIndex::generate("user", "project", "racing"))
            .await
            .unwrap();

        // the in-flight lookup still sees the row it read / 进行中的查询返回已读取的行
        assert!(cache.get_index(&racing, &index.public_id).await.unwrap().is_some());
        assert!(cache.is_empty());

        assert!(cache.get_index(&racing.inner, &index.public_id).await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_reads_through_and_evicts() {
        let database = SqliteMetadata::new(db::connect_in_memory().await);
        let cache = MetadataCache::new();

        let index = database
            .create_index(NewIndex::generate("user", "project", "cached"))
            .await
            .unwrap();

        assert!(cache.get_index(&database, "nope!").await.unwrap().is_none());
        assert!(cache.is_empty());

        let cached = cache.get_index(&database, &index.public_id).await.unwrap().unwrap();
        assert_eq!(cached.id, index.id);
        assert_eq!(cache.len(), 1);

        // served from cache even after the row is gone / 行删除后仍命中缓存
        database.delete_index(&index.public_id, "user").await.unwrap();
        assert!(cache.get_index(&database, &index.public_id).await.unwrap().is_some());

        cache.evict(&index.public_id);
        assert!(cache.get_index(&database, &index.public_id).await.unwrap().is_none());
    }
}
