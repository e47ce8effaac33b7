//! Encrypted table storage / 密文表存储
//!
//! Backends store the Entries and Chains tables of every index side by
//! side; lines are keyed by `(index id, table, uid)` so indexes never
//! collide.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::findex::{EncryptedTable, Table, UidSet, UpsertData};
use crate::models::Index;

pub use memory::MemoryIndexes;
pub use sqlite::SqliteIndexes;

#[async_trait]
pub trait IndexesDatabase: Send + Sync {
    /// Fill `index.size` with the stored byte count / 填充索引大小
    async fn set_size(&self, index: &mut Index) -> Result<()>;

    async fn set_sizes(&self, indexes: &mut [Index]) -> Result<()> {
        for index in indexes.iter_mut() {
            self.set_size(index).await?;
        }
        Ok(())
    }

    /// Lines present among `uids` / 查询存在的行
    async fn fetch(&self, index: &Index, table: Table, uids: UidSet) -> Result<EncryptedTable>;

    /// Compare-and-swap Entry lines, returns the rejected ones with their stored value
    /// 比较并交换写入 Entry 行，返回被拒绝的行及其当前值
    async fn upsert_entries(&self, index: &Index, data: UpsertData) -> Result<EncryptedTable>;

    /// Unconditional Chain writes / 无条件写入 Chain 行
    async fn insert_chains(&self, index: &Index, data: EncryptedTable) -> Result<()>;

    /// Whole table dump / 导出整张表
    async fn fetch_all(&self, index: &Index, table: Table) -> Result<EncryptedTable>;
}

/// Available storage backends / 可用的存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexesBackend {
    Sqlite,
    Memory,
}

impl FromStr for IndexesBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(IndexesBackend::Sqlite),
            "memory" => Ok(IndexesBackend::Memory),
            other => Err(Error::Config(format!(
                "Unknown indexes database type `{other}` (please use `sqlite` or `memory`)"
            ))),
        }
    }
}

impl fmt::Display for IndexesBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexesBackend::Sqlite => write!(f, "sqlite"),
            IndexesBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Open the configured backend / 打开配置的存储后端
pub async fn open_backend(config: &AppConfig) -> Result<Arc<dyn IndexesDatabase>> {
    let backend: IndexesBackend = config.indexes.backend.parse()?;
    tracing::info!("Indexes database backend: {}", backend);

    let database: Arc<dyn IndexesDatabase> = match backend {
        IndexesBackend::Sqlite => Arc::new(SqliteIndexes::open(&config.get_indexes_db_path()).await?),
        IndexesBackend::Memory => {
            tracing::warn!("Memory backend selected, indexes are lost on restart");
            Arc::new(MemoryIndexes::new())
        }
    };
    Ok(database)
}
