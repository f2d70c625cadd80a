//! The table-store abstraction: isolated tables of rows addressed by
//! (partition key, row key), single-row atomicity, paged queries with
//! continuation tokens. Backends implement [`TableStore`]; everything
//! above this module is backend-agnostic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table does not exist")]
    TableNotFound,
    #[error("row does not exist")]
    RowNotFound,
    #[error("table already exists")]
    TableExists,
    #[error("row already exists")]
    RowExists,
    #[error("malformed row: {0}")]
    Decode(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// A single typed property in a row's bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    Text(String),
    Int(i64),
    Time(DateTime<Utc>),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            PropertyValue::Time(t) => Some(*t),
            _ => None,
        }
    }
}

/// Typed envelope over an untyped property bag: composite key, concurrency
/// tag, payload. The codecs in [`crate::storage::entities`] give rows their
/// typed form; nothing here inspects the bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub partition_key: String,
    pub row_key: String,
    /// Concurrency tag, assigned by the backend on every write.
    pub etag: Option<String>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl TableRow {
    pub fn new(partition_key: &str, row_key: &str) -> Self {
        Self {
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
            etag: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_text(mut self, key: &str, value: &str) -> Self {
        self.properties
            .insert(key.to_string(), PropertyValue::Text(value.to_string()));
        self
    }

    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        self.properties
            .insert(key.to_string(), PropertyValue::Int(value));
        self
    }

    pub fn with_time(mut self, key: &str, value: DateTime<Utc>) -> Self {
        self.properties
            .insert(key.to_string(), PropertyValue::Time(value));
        self
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(PropertyValue::as_text)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(PropertyValue::as_int)
    }

    pub fn time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.properties.get(key).and_then(PropertyValue::as_time)
    }
}

/// A single-partition query.
#[derive(Debug, Clone)]
pub struct RowQuery {
    pub partition: String,
    /// Project keys only; returned rows carry empty property bags.
    pub keys_only: bool,
}

impl RowQuery {
    pub fn partition(partition: &str) -> Self {
        Self {
            partition: partition.to_string(),
            keys_only: false,
        }
    }

    pub fn keys_only(partition: &str) -> Self {
        Self {
            partition: partition.to_string(),
            keys_only: true,
        }
    }
}

/// Opaque cursor: more results exist beyond the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(pub(crate) String);

#[derive(Debug, Clone)]
pub struct Page {
    pub rows: Vec<TableRow>,
    pub continuation: Option<ContinuationToken>,
}

/// A partitioned wide-column store. Writes are atomic per row and nothing
/// more; multi-row sequences get no transactional help from the store.
/// Transient-fault retry is the backend's problem; callers treat any error
/// they see as retry-exhausted.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn create_table(&self, table: &str) -> Result<(), StoreError>;
    async fn create_table_if_not_exists(&self, table: &str) -> Result<(), StoreError>;
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError>;
    async fn delete_table(&self, table: &str) -> Result<(), StoreError>;
    async fn retrieve(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<Option<TableRow>, StoreError>;
    /// Fails with [`StoreError::RowExists`] if the key is taken.
    async fn insert(&self, table: &str, row: TableRow) -> Result<(), StoreError>;
    async fn insert_or_replace(&self, table: &str, row: TableRow) -> Result<(), StoreError>;
    async fn delete_row(&self, table: &str, partition: &str, row: &str)
        -> Result<(), StoreError>;
    /// One page of `query`, continuing from `continuation` if given. Row
    /// order is stable across pages.
    async fn query_page(
        &self,
        table: &str,
        query: &RowQuery,
        continuation: Option<ContinuationToken>,
    ) -> Result<Page, StoreError>;
}
