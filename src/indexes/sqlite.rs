//! SQLite indexes backend / SQLite 密文表后端
//!
//! Storage scheme:
//! - `index_lines`: one row per table line, keyed by (index_id, table_tag, uid), WITHOUT ROWID
//! - `index_sizes`: running byte count per index
//!
//! Compare-and-swap relies on conditional statements: `UPDATE ... WHERE value = ?`
//! for known lines and `INSERT ... ON CONFLICT DO NOTHING` for new ones. A
//! statement that touches no row means another writer won; the stored value is
//! then read back and returned as rejected. Each write batch runs in one
//! transaction, rolled back when the request is dropped mid-batch.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::path::Path;
use std::time::Duration;

use super::IndexesDatabase;
use crate::error::{Error, Result};
use crate::findex::{EncryptedTable, Table, Uid, UidSet, UpsertData};
use crate::models::Index;

/// UIDs per `IN (...)` query, below SQLite's bound parameter limit
const FETCH_CHUNK_SIZE: usize = 500;

pub struct SqliteIndexes {
    pool: SqlitePool,
}

impl SqliteIndexes {
    /// Open (or create) the indexes database file / 打开或创建密文表数据库
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let database = Self { pool };
        database.init().await?;

        tracing::info!("Indexes database opened: {:?} (WAL mode)", path);
        Ok(database)
    }

    /// Use an existing pool / 使用现有连接池
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let database = Self { pool };
        database.init().await?;
        Ok(database)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_lines (
                index_id INTEGER NOT NULL,
                table_tag INTEGER NOT NULL,
                uid BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (index_id, table_tag, uid)
            ) WITHOUT ROWID
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_sizes (
                index_id INTEGER PRIMARY KEY,
                size INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_uid(bytes: &[u8]) -> Result<Uid> {
    Uid::try_from(bytes).map_err(|e| Error::Internal(format!("corrupted line key: {e}")))
}

async fn add_size<'c, E>(executor: E, index_id: i64, added: i64) -> Result<()>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    if added == 0 {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO index_sizes (index_id, size) VALUES (?, ?) \
         ON CONFLICT(index_id) DO UPDATE SET size = size + excluded.size",
    )
    .bind(index_id)
    .bind(added)
    .execute(executor)
    .await?;
    Ok(())
}

async fn upsert_lines(
    conn: &mut SqliteConnection,
    index: &Index,
    data: UpsertData,
) -> Result<EncryptedTable> {
    let mut rejected = EncryptedTable::new();
    let mut added = 0i64;
    let tag = i64::from(Table::Entries.tag());

    for (uid, line) in data {
        let written = match &line.old_value {
            Some(old_value) => sqlx::query(
                "UPDATE index_lines SET value = ? \
                 WHERE index_id = ? AND table_tag = ? AND uid = ? AND value = ?",
            )
            .bind(&line.new_value)
            .bind(index.id)
            .bind(tag)
            .bind(uid.as_bytes())
            .bind(old_value)
            .execute(&mut *conn)
            .await?
            .rows_affected(),
            None => {
                let inserted = sqlx::query(
                    "INSERT INTO index_lines (index_id, table_tag, uid, value) VALUES (?, ?, ?, ?) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(index.id)
                .bind(tag)
                .bind(uid.as_bytes())
                .bind(&line.new_value)
                .execute(&mut *conn)
                .await?
                .rows_affected();
                if inserted > 0 {
                    added += line.new_value.len() as i64;
                }
                inserted
            }
        };

        if written > 0 {
            continue;
        }

        let existing: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT value FROM index_lines WHERE index_id = ? AND table_tag = ? AND uid = ?",
        )
        .bind(index.id)
        .bind(tag)
        .bind(uid.as_bytes())
        .fetch_optional(&mut *conn)
        .await?;

        match existing {
            Some((value,)) => {
                rejected.insert(uid, value);
            }
            None => tracing::warn!(
                "Upsert on index {} carries an old value for {:?} but nothing is stored",
                index.public_id,
                uid
            ),
        }
    }

    add_size(&mut *conn, index.id, added).await?;
    Ok(rejected)
}

async fn insert_lines(conn: &mut SqliteConnection, index: &Index, data: EncryptedTable) -> Result<()> {
    let tag = i64::from(Table::Chains.tag());
    let mut added = 0i64;

    for (uid, value) in data {
        added += value.len() as i64;
        sqlx::query(
            "INSERT INTO index_lines (index_id, table_tag, uid, value) VALUES (?, ?, ?, ?) \
             ON CONFLICT(index_id, table_tag, uid) DO UPDATE SET value = excluded.value",
        )
        .bind(index.id)
        .bind(tag)
        .bind(uid.as_bytes())
        .bind(value)
        .execute(&mut *conn)
        .await?;
    }

    add_size(&mut *conn, index.id, added).await
}

#[async_trait]
impl IndexesDatabase for SqliteIndexes {
    async fn set_size(&self, index: &mut Index) -> Result<()> {
        let size: Option<(i64,)> = sqlx::query_as("SELECT size FROM index_sizes WHERE index_id = ?")
            .bind(index.id)
            .fetch_optional(&self.pool)
            .await?;

        index.size = Some(size.map(|(s,)| s).unwrap_or(0));
        Ok(())
    }

    async fn fetch(&self, index: &Index, table: Table, uids: UidSet) -> Result<EncryptedTable> {
        let mut lines = EncryptedTable::with_capacity(uids.len());
        let uids: Vec<Uid> = uids.into_iter().collect();

        for chunk in uids.chunks(FETCH_CHUNK_SIZE) {
            let mut query = QueryBuilder::<Sqlite>::new("SELECT uid, value FROM index_lines WHERE index_id = ");
            query.push_bind(index.id);
            query.push(" AND table_tag = ");
            query.push_bind(i64::from(table.tag()));
            query.push(" AND uid IN (");
            let mut separated = query.separated(", ");
            for uid in chunk {
                separated.push_bind(uid.as_bytes().to_vec());
            }
            separated.push_unseparated(")");

            let rows: Vec<(Vec<u8>, Vec<u8>)> = query.build_query_as().fetch_all(&self.pool).await?;
            for (uid, value) in rows {
                lines.insert(decode_uid(&uid)?, value);
            }
        }

        Ok(lines)
    }

    async fn upsert_entries(&self, index: &Index, data: UpsertData) -> Result<EncryptedTable> {
        let mut tx = self.pool.begin().await?;
        let rejected = upsert_lines(&mut tx, index, data).await?;
        tx.commit().await?;

        if !rejected.is_empty() {
            tracing::debug!("Upsert on index {}: {} lines rejected", index.public_id, rejected.len());
        }
        Ok(rejected)
    }

    async fn insert_chains(&self, index: &Index, data: EncryptedTable) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_lines(&mut tx, index, data).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_all(&self, index: &Index, table: Table) -> Result<EncryptedTable> {
        let rows: Vec<(Vec<u8>, Vec<u8>)> = sqlx::query_as(
            "SELECT uid, value FROM index_lines WHERE index_id = ? AND table_tag = ?",
        )
        .bind(index.id)
        .bind(i64::from(table.tag()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(uid, value)| Ok((decode_uid(&uid)?, value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findex::UpsertLine;
    use crate::indexes::conformance;
    use crate::indexes::test_support::{index, uid};

    async fn database() -> SqliteIndexes {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteIndexes::with_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_present_lines_only() {
        conformance::fetch_returns_present_lines_only(&database().await).await;
    }

    #[tokio::test]
    async fn test_tables_and_indexes_are_isolated() {
        conformance::tables_and_indexes_are_isolated(&database().await).await;
    }

    #[tokio::test]
    async fn test_upsert_compare_and_swap() {
        conformance::upsert_compare_and_swap(&database().await).await;
    }

    #[tokio::test]
    async fn test_upsert_old_value_without_line_is_dropped() {
        conformance::upsert_old_value_without_line_is_dropped(&database().await).await;
    }

    #[tokio::test]
    async fn test_sizes() {
        conformance::sizes_count_new_entries_and_chains(&database().await).await;
    }

    #[tokio::test]
    async fn test_fetch_all() {
        conformance::fetch_all_dumps_one_table(&database().await).await;
    }

    #[tokio::test]
    async fn test_fetch_more_uids_than_one_chunk() {
        let db = database().await;
        let idx = index(1);

        let mut chains = EncryptedTable::new();
        let mut uids = UidSet::new();
        for i in 0..(FETCH_CHUNK_SIZE as u16 + 20) {
            let mut bytes = [0u8; 32];
            bytes[..2].copy_from_slice(&i.to_be_bytes());
            chains.insert(Uid(bytes), i.to_be_bytes().to_vec());
            uids.insert(Uid(bytes));
        }
        db.insert_chains(&idx, chains.clone()).await.unwrap();

        assert_eq!(db.fetch(&idx, Table::Chains, uids).await.unwrap(), chains);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexes").join("indexes.sqlite");
        let idx = index(7);

        {
            let db = SqliteIndexes::open(&path).await.unwrap();
            let mut data = UpsertData::new();
            data.insert(uid(1), UpsertLine::new(None, b"kept".to_vec()));
            db.upsert_entries(&idx, data).await.unwrap();
            db.close().await;
        }

        let db = SqliteIndexes::open(&path).await.unwrap();
        let uids: UidSet = [uid(1)].into_iter().collect();
        let fetched = db.fetch(&idx, Table::Entries, uids).await.unwrap();
        assert_eq!(fetched[&uid(1)], b"kept");
    }

    #[tokio::test]
    async fn test_concurrent_upserts_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let db = std::sync::Arc::new(SqliteIndexes::open(&dir.path().join("race.sqlite")).await.unwrap());
        let idx = index(1);

        let mut handles = Vec::new();
        for writer in 0..8u8 {
            let db = db.clone();
            let idx = idx.clone();
            handles.push(tokio::spawn(async move {
                let mut data = UpsertData::new();
                data.insert(uid(1), UpsertLine::new(None, vec![writer]));
                db.upsert_entries(&idx, data).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_empty() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_dropped_batch_leaves_writes_usable() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteIndexes::open(&dir.path().join("dropped.sqlite")).await.unwrap();
        let idx = index(1);

        let mut big = UpsertData::new();
        for i in 0..20_000u32 {
            let mut bytes = [0u8; 32];
            bytes[..4].copy_from_slice(&i.to_be_bytes());
            big.insert(Uid(bytes), UpsertLine::new(None, vec![1; 16]));
        }
        // client gone mid-batch / 批量写入中途被取消
        let _ = tokio::time::timeout(Duration::from_millis(20), db.upsert_entries(&idx, big)).await;

        for byte in 0..4u8 {
            let mut data = UpsertData::new();
            data.insert(uid(200 + byte), UpsertLine::new(None, vec![byte]));
            assert!(db.upsert_entries(&idx, data).await.unwrap().is_empty());

            let mut chains = EncryptedTable::new();
            chains.insert(uid(100 + byte), vec![byte]);
            db.insert_chains(&idx, chains).await.unwrap();
        }

        let entries = db.fetch_all(&idx, Table::Entries).await.unwrap();
        assert!(entries.len() == 4 || entries.len() == 20_004, "partial batch visible: {}", entries.len());
    }
}
