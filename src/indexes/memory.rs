use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::IndexesDatabase;
use crate::error::Result;
use crate::findex::{EncryptedTable, Table, UidSet, UpsertData};
use crate::models::Index;

#[derive(Default)]
struct Tables {
    lines: HashMap<(i64, Table), EncryptedTable>,
    sizes: HashMap<i64, i64>,
}

/// Process-local backend / 进程内存后端
///
/// A whole upsert batch runs under one write lock.
#[derive(Default)]
pub struct MemoryIndexes {
    tables: RwLock<Tables>,
}

impl MemoryIndexes {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexesDatabase for MemoryIndexes {
    async fn set_size(&self, index: &mut Index) -> Result<()> {
        index.size = Some(self.tables.read().sizes.get(&index.id).copied().unwrap_or(0));
        Ok(())
    }

    async fn fetch(&self, index: &Index, table: Table, uids: UidSet) -> Result<EncryptedTable> {
        let tables = self.tables.read();
        let Some(lines) = tables.lines.get(&(index.id, table)) else {
            return Ok(EncryptedTable::new());
        };

        Ok(uids
            .into_iter()
            .filter_map(|uid| lines.get(&uid).map(|value| (uid, value.clone())))
            .collect())
    }

    async fn upsert_entries(&self, index: &Index, data: UpsertData) -> Result<EncryptedTable> {
        let mut rejected = EncryptedTable::new();
        let mut tables = self.tables.write();
        let mut added = 0i64;

        let lines = tables.lines.entry((index.id, Table::Entries)).or_default();
        for (uid, line) in data {
            let existing = lines.get(&uid);
            if existing.map(Vec::as_slice) == line.old_value.as_deref() {
                if existing.is_none() {
                    added += line.new_value.len() as i64;
                }
                lines.insert(uid, line.new_value);
            } else if let Some(existing) = existing {
                rejected.insert(uid, existing.clone());
            } else {
                tracing::warn!(
                    "Upsert on index {} carries an old value for {:?} but nothing is stored",
                    index.public_id,
                    uid
                );
            }
        }

        *tables.sizes.entry(index.id).or_insert(0) += added;
        Ok(rejected)
    }

    async fn insert_chains(&self, index: &Index, data: EncryptedTable) -> Result<()> {
        let mut tables = self.tables.write();
        let added: i64 = data.values().map(|value| value.len() as i64).sum();

        tables.lines.entry((index.id, Table::Chains)).or_default().extend(data);
        *tables.sizes.entry(index.id).or_insert(0) += added;
        Ok(())
    }

    async fn fetch_all(&self, index: &Index, table: Table) -> Result<EncryptedTable> {
        Ok(self
            .tables
            .read()
            .lines
            .get(&(index.id, table))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexes::conformance;

    #[tokio::test]
    async fn test_fetch_returns_present_lines_only() {
        conformance::fetch_returns_present_lines_only(&MemoryIndexes::new()).await;
    }

    #[tokio::test]
    async fn test_tables_and_indexes_are_isolated() {
        conformance::tables_and_indexes_are_isolated(&MemoryIndexes::new()).await;
    }

    #[tokio::test]
    async fn test_upsert_compare_and_swap() {
        conformance::upsert_compare_and_swap(&MemoryIndexes::new()).await;
    }

    #[tokio::test]
    async fn test_upsert_old_value_without_line_is_dropped() {
        conformance::upsert_old_value_without_line_is_dropped(&MemoryIndexes::new()).await;
    }

    #[tokio::test]
    async fn test_sizes() {
        conformance::sizes_count_new_entries_and_chains(&MemoryIndexes::new()).await;
    }

    #[tokio::test]
    async fn test_fetch_all() {
        conformance::fetch_all_dumps_one_table(&MemoryIndexes::new()).await;
    }
}
