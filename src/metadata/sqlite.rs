use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::MetadataDatabase;
use crate::error::{Error, Result};
use crate::models::{Index, NewIndex};

/// Attempts before giving up on a public ID collision / 公开 ID 冲突重试次数
const CREATE_ATTEMPTS: usize = 3;

const INDEX_COLUMNS: &str = "id, public_id, authz_id, project_uuid, name, \
    fetch_entries_key, fetch_chains_key, upsert_entries_key, insert_chains_key, \
    created_at, deleted_at";

pub struct SqliteMetadata {
    pool: SqlitePool,
}

impl SqliteMetadata {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert(&self, new_index: &NewIndex) -> std::result::Result<i64, sqlx::Error> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO indexes (
                public_id, authz_id, project_uuid, name,
                fetch_entries_key, fetch_chains_key, upsert_entries_key, insert_chains_key,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&new_index.public_id)
        .bind(&new_index.authz_id)
        .bind(&new_index.project_uuid)
        .bind(&new_index.name)
        .bind(&new_index.fetch_entries_key)
        .bind(&new_index.fetch_chains_key)
        .bind(&new_index.upsert_entries_key)
        .bind(&new_index.insert_chains_key)
        .bind(new_index.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl MetadataDatabase for SqliteMetadata {
    async fn get_indexes(&self, project_uuid: &str) -> Result<Vec<Index>> {
        let indexes = sqlx::query_as::<_, Index>(&format!(
            "SELECT {INDEX_COLUMNS} FROM indexes \
             WHERE project_uuid = ? AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(project_uuid)
        .fetch_all(&self.pool)
        .await?;

        Ok(indexes)
    }

    async fn get_index(&self, public_id: &str) -> Result<Option<Index>> {
        let index = sqlx::query_as::<_, Index>(&format!(
            "SELECT {INDEX_COLUMNS} FROM indexes WHERE public_id = ? AND deleted_at IS NULL"
        ))
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(index)
    }

    async fn create_index(&self, mut new_index: NewIndex) -> Result<Index> {
        let mut attempt = 0;
        let id = loop {
            attempt += 1;
            match self.insert(&new_index).await {
                Ok(id) => break id,
                Err(e) if is_unique_violation(&e) && attempt < CREATE_ATTEMPTS => {
                    tracing::debug!("Public ID collision on {}, retrying", new_index.public_id);
                    new_index.regenerate_public_id();
                }
                Err(e) => return Err(Error::from(e)),
            }
        };

        let index = sqlx::query_as::<_, Index>(&format!(
            "SELECT {INDEX_COLUMNS} FROM indexes WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Index created: {} ({})", index.public_id, index.name);
        Ok(index)
    }

    async fn delete_index(&self, public_id: &str, authz_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE indexes SET deleted_at = ? \
             WHERE public_id = ? AND authz_id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now().naive_utc())
        .bind(public_id)
        .bind(authz_id)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!("Index deleted: {}", public_id);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn database() -> SqliteMetadata {
        SqliteMetadata::new(db::connect_in_memory().await)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let database = database().await;
        let new_index = NewIndex::generate("user", "project", "Hello World!");
        let keys = new_index.fetch_entries_key.clone();
        let created_at = new_index.created_at;

        let index = database.create_index(new_index).await.unwrap();
        assert_eq!(index.name, "Hello World!");
        assert_eq!(index.fetch_entries_key, keys);
        assert_eq!(index.size, None);
        assert!(index.deleted_at.is_none());
        assert_eq!(index.created_at, created_at);

        let fetched = database.get_index(&index.public_id).await.unwrap().unwrap();
        assert_eq!(fetched.id, index.id);
        assert_eq!(fetched.insert_chains_key, index.insert_chains_key);
    }

    #[tokio::test]
    async fn test_public_id_collision_is_retried() {
        let database = database().await;
        let first = database
            .create_index(NewIndex::generate("user", "project", "first"))
            .await
            .unwrap();

        let mut clash = NewIndex::generate("user", "project", "second");
        clash.public_id = first.public_id.clone();
        let second = database.create_index(clash).await.unwrap();

        assert_ne!(second.public_id, first.public_id);
    }

    #[tokio::test]
    async fn test_list_by_project_newest_first() {
        let database = database().await;
        for name in ["a", "b", "c"] {
            database
                .create_index(NewIndex::generate("user", "project", name))
                .await
                .unwrap();
        }
        database
            .create_index(NewIndex::generate("user", "other", "elsewhere"))
            .await
            .unwrap();

        let names: Vec<_> = database
            .get_indexes("project")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_delete_is_soft_and_owner_only() {
        let database = database().await;
        let index = database
            .create_index(NewIndex::generate("owner", "project", "x"))
            .await
            .unwrap();

        assert!(!database.delete_index(&index.public_id, "intruder").await.unwrap());
        assert!(database.get_index(&index.public_id).await.unwrap().is_some());

        assert!(database.delete_index(&index.public_id, "owner").await.unwrap());
        assert!(database.get_index(&index.public_id).await.unwrap().is_none());
        assert!(database.get_indexes("project").await.unwrap().is_empty());

        // second delete finds nothing live / 重复删除
        assert!(!database.delete_index(&index.public_id, "owner").await.unwrap());
    }
}
