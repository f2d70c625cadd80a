//! In-memory backend, used by tests and for ephemeral server runs. Whole
//! tables live behind one lock; pages are cut from the ordered row map, so
//! a small page size exercises the pager's continuation handling.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::storage::store::{
    ContinuationToken, Page, RowQuery, StoreError, TableRow, TableStore,
};

type Table = BTreeMap<(String, String), TableRow>;

pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, Table>>,
    page_size: usize,
    next_etag: AtomicU64,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            page_size,
            next_etag: AtomicU64::new(1),
        }
    }

    fn stamp(&self, row: &mut TableRow) {
        let tag = self.next_etag.fetch_add(1, Ordering::Relaxed);
        row.etag = Some(tag.to_string());
    }
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key_of(row: &TableRow) -> (String, String) {
    (row.partition_key.clone(), row.row_key.clone())
}

fn project_keys(row: &TableRow) -> TableRow {
    TableRow {
        partition_key: row.partition_key.clone(),
        row_key: row.row_key.clone(),
        etag: row.etag.clone(),
        properties: BTreeMap::new(),
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if tables.contains_key(table) {
            return Err(StoreError::TableExists);
        }
        tables.insert(table.to_string(), Table::new());
        Ok(())
    }

    async fn create_table_if_not_exists(&self, table: &str) -> Result<(), StoreError> {
        self.tables
            .write()
            .unwrap()
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().unwrap().contains_key(table))
    }

    async fn delete_table(&self, table: &str) -> Result<(), StoreError> {
        self.tables
            .write()
            .unwrap()
            .remove(table)
            .map(|_| ())
            .ok_or(StoreError::TableNotFound)
    }

    async fn retrieve(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<Option<TableRow>, StoreError> {
        let tables = self.tables.read().unwrap();
        let rows = tables.get(table).ok_or(StoreError::TableNotFound)?;
        Ok(rows.get(&(partition.to_string(), row.to_string())).cloned())
    }

    async fn insert(&self, table: &str, mut row: TableRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        let rows = tables.get_mut(table).ok_or(StoreError::TableNotFound)?;
        let key = key_of(&row);
        if rows.contains_key(&key) {
            return Err(StoreError::RowExists);
        }
        self.stamp(&mut row);
        rows.insert(key, row);
        Ok(())
    }

    async fn insert_or_replace(&self, table: &str, mut row: TableRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        let rows = tables.get_mut(table).ok_or(StoreError::TableNotFound)?;
        self.stamp(&mut row);
        rows.insert(key_of(&row), row);
        Ok(())
    }

    async fn delete_row(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        let rows = tables.get_mut(table).ok_or(StoreError::TableNotFound)?;
        rows.remove(&(partition.to_string(), row.to_string()))
            .map(|_| ())
            .ok_or(StoreError::RowNotFound)
    }

    async fn query_page(
        &self,
        table: &str,
        query: &RowQuery,
        continuation: Option<ContinuationToken>,
    ) -> Result<Page, StoreError> {
        let offset = match continuation {
            Some(token) => token
                .0
                .parse::<usize>()
                .map_err(|_| StoreError::Decode("bad continuation token".to_string()))?,
            None => 0,
        };
        let tables = self.tables.read().unwrap();
        let all = tables.get(table).ok_or(StoreError::TableNotFound)?;
        let matching: Vec<&TableRow> = all
            .values()
            .filter(|r| r.partition_key == query.partition)
            .collect();
        let rows: Vec<TableRow> = matching
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|r| {
                if query.keys_only {
                    project_keys(r)
                } else {
                    (*r).clone()
                }
            })
            .collect();
        let consumed = offset + rows.len();
        let continuation = if consumed < matching.len() {
            Some(ContinuationToken(consumed.to_string()))
        } else {
            None
        };
        Ok(Page { rows, continuation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn double_insert_is_a_conflict() {
        let store = MemoryTableStore::new();
        store.create_table("a").await.unwrap();
        let row = TableRow::new("User", "u1").with_text("Name", "nic");
        store.insert("a", row.clone()).await.unwrap();
        assert!(matches!(
            store.insert("a", row).await,
            Err(StoreError::RowExists)
        ));
    }

    #[tokio::test]
    async fn create_table_twice_fails_but_if_not_exists_does_not() {
        let store = MemoryTableStore::new();
        store.create_table("a").await.unwrap();
        assert!(matches!(
            store.create_table("a").await,
            Err(StoreError::TableExists)
        ));
        store.create_table_if_not_exists("a").await.unwrap();
    }

    #[tokio::test]
    async fn deleting_a_table_forgets_its_rows() {
        let store = MemoryTableStore::new();
        store.create_table("a").await.unwrap();
        store
            .insert("a", TableRow::new("User", "u1"))
            .await
            .unwrap();
        store.delete_table("a").await.unwrap();
        assert!(matches!(
            store.retrieve("a", "User", "u1").await,
            Err(StoreError::TableNotFound)
        ));
    }

    #[tokio::test]
    async fn keys_only_projection_strips_the_bag() {
        let store = MemoryTableStore::new();
        store.create_table("a").await.unwrap();
        store
            .insert("a", TableRow::new("User", "u1").with_text("Name", "nic"))
            .await
            .unwrap();
        let page = store
            .query_page("a", &RowQuery::keys_only("User"), None)
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert!(page.rows[0].properties.is_empty());
        assert_eq!(page.rows[0].row_key, "u1");
    }

    #[tokio::test]
    async fn replace_bumps_the_etag() {
        let store = MemoryTableStore::new();
        store.create_table("a").await.unwrap();
        store
            .insert("a", TableRow::new("User", "u1"))
            .await
            .unwrap();
        let first = store.retrieve("a", "User", "u1").await.unwrap().unwrap();
        store
            .insert_or_replace("a", TableRow::new("User", "u1"))
            .await
            .unwrap();
        let second = store.retrieve("a", "User", "u1").await.unwrap().unwrap();
        assert_ne!(first.etag, second.etag);
    }
}
