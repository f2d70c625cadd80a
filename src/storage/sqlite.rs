//! SQLite backend over sqlx. One physical table holds every logical
//! table's rows; property bags persist as JSON text. Query pages use
//! keyset pagination on the row key, which doubles as the continuation
//! token.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::storage::store::{
    ContinuationToken, Page, PropertyValue, RowQuery, StoreError, TableRow, TableStore,
};

pub struct SqliteTableStore {
    pool: SqlitePool,
    page_size: i64,
}

impl SqliteTableStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // In-memory databases live and die with their connection; pin them
        // to a single one.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            page_size: 1000,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size as i64;
        self
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query("CREATE TABLE IF NOT EXISTS store_tables (name TEXT PRIMARY KEY)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS store_rows (
                table_name TEXT NOT NULL,
                partition_key TEXT NOT NULL,
                row_key TEXT NOT NULL,
                etag TEXT NOT NULL,
                properties TEXT NOT NULL,
                PRIMARY KEY (table_name, partition_key, row_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn exists(&self, table: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM store_tables WHERE name = ?")
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn require(&self, table: &str) -> Result<(), StoreError> {
        if self.exists(table).await? {
            Ok(())
        } else {
            Err(StoreError::TableNotFound)
        }
    }
}

fn fresh_etag() -> String {
    Uuid::new_v4().simple().to_string()
}

fn encode_bag(row: &TableRow) -> Result<String, StoreError> {
    serde_json::to_string(&row.properties)
        .map_err(|e| StoreError::Decode(format!("unencodable property bag: {e}")))
}

fn decode_bag(raw: &str) -> Result<BTreeMap<String, PropertyValue>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode(format!("bad property bag: {e}")))
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT INTO store_tables (name) VALUES (?)")
            .bind(table)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::TableExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_table_if_not_exists(&self, table: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO store_tables (name) VALUES (?)")
            .bind(table)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        self.exists(table).await
    }

    async fn delete_table(&self, table: &str) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM store_tables WHERE name = ?")
            .bind(table)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::TableNotFound);
        }
        sqlx::query("DELETE FROM store_rows WHERE table_name = ?")
            .bind(table)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn retrieve(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<Option<TableRow>, StoreError> {
        self.require(table).await?;
        let found = sqlx::query(
            "SELECT etag, properties FROM store_rows \
             WHERE table_name = ? AND partition_key = ? AND row_key = ?",
        )
        .bind(table)
        .bind(partition)
        .bind(row)
        .fetch_optional(&self.pool)
        .await?;
        match found {
            Some(record) => Ok(Some(TableRow {
                partition_key: partition.to_string(),
                row_key: row.to_string(),
                etag: Some(record.get::<String, _>("etag")),
                properties: decode_bag(&record.get::<String, _>("properties"))?,
            })),
            None => Ok(None),
        }
    }

    async fn insert(&self, table: &str, row: TableRow) -> Result<(), StoreError> {
        self.require(table).await?;
        let result = sqlx::query(
            "INSERT INTO store_rows (table_name, partition_key, row_key, etag, properties) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(table)
        .bind(&row.partition_key)
        .bind(&row.row_key)
        .bind(fresh_etag())
        .bind(encode_bag(&row)?)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::RowExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_or_replace(&self, table: &str, row: TableRow) -> Result<(), StoreError> {
        self.require(table).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO store_rows \
             (table_name, partition_key, row_key, etag, properties) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(table)
        .bind(&row.partition_key)
        .bind(&row.row_key)
        .bind(fresh_etag())
        .bind(encode_bag(&row)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_row(
        &self,
        table: &str,
        partition: &str,
        row: &str,
    ) -> Result<(), StoreError> {
        self.require(table).await?;
        let deleted = sqlx::query(
            "DELETE FROM store_rows \
             WHERE table_name = ? AND partition_key = ? AND row_key = ?",
        )
        .bind(table)
        .bind(partition)
        .bind(row)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if deleted == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn query_page(
        &self,
        table: &str,
        query: &RowQuery,
        continuation: Option<ContinuationToken>,
    ) -> Result<Page, StoreError> {
        self.require(table).await?;
        let after = continuation.map(|t| t.0).unwrap_or_default();
        // Fetch one row past the page to learn whether a continuation is due.
        let mut records = sqlx::query(
            "SELECT row_key, etag, properties FROM store_rows \
             WHERE table_name = ? AND partition_key = ? AND row_key > ? \
             ORDER BY row_key LIMIT ?",
        )
        .bind(table)
        .bind(&query.partition)
        .bind(&after)
        .bind(self.page_size + 1)
        .fetch_all(&self.pool)
        .await?;
        let more = records.len() as i64 > self.page_size;
        if more {
            records.truncate(self.page_size as usize);
        }
        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let properties = if query.keys_only {
                BTreeMap::new()
            } else {
                decode_bag(&record.get::<String, _>("properties"))?
            };
            rows.push(TableRow {
                partition_key: query.partition.clone(),
                row_key: record.get::<String, _>("row_key"),
                etag: Some(record.get::<String, _>("etag")),
                properties,
            });
        }
        let continuation = if more {
            rows.last()
                .map(|r| ContinuationToken(r.row_key.clone()))
        } else {
            None
        };
        Ok(Page { rows, continuation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::pager::drain_all;

    async fn store() -> SqliteTableStore {
        let store = SqliteTableStore::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn rows_round_trip_including_unicode() {
        let store = store().await;
        store.create_table("g").await.unwrap();
        let row = TableRow::new("Metadata", "Metadata")
            .with_text("Name", "读书会 🧑‍🤝‍🧑 cafe\u{0301}")
            .with_int("Count", 3)
            .with_time("CreationTime", chrono::Utc::now());
        store.insert("g", row.clone()).await.unwrap();
        let stored = store
            .retrieve("g", "Metadata", "Metadata")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.properties, row.properties);
        assert!(stored.etag.is_some());
    }

    #[tokio::test]
    async fn insert_conflicts_and_upsert_replaces() {
        let store = store().await;
        store.create_table("g").await.unwrap();
        let row = TableRow::new("User", "u1").with_text("Name", "a");
        store.insert("g", row.clone()).await.unwrap();
        assert!(matches!(
            store.insert("g", row).await,
            Err(StoreError::RowExists)
        ));
        let replacement = TableRow::new("User", "u1").with_text("Name", "b");
        store.insert_or_replace("g", replacement).await.unwrap();
        let stored = store.retrieve("g", "User", "u1").await.unwrap().unwrap();
        assert_eq!(stored.text("Name"), Some("b"));
    }

    #[tokio::test]
    async fn pages_continue_across_the_whole_partition() {
        let store = store().await.with_page_size(4);
        store.create_table("g").await.unwrap();
        for i in 0..10 {
            store
                .insert("g", TableRow::new("Message", &format!("m{i:02}")))
                .await
                .unwrap();
        }
        // Another partition must not leak into the drain.
        store
            .insert("g", TableRow::new("User", "u1"))
            .await
            .unwrap();
        let rows = drain_all(&store, "g", &RowQuery::partition("Message"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 10);
        assert!(rows.windows(2).all(|w| w[0].row_key < w[1].row_key));
    }

    #[tokio::test]
    async fn dropping_a_table_drops_its_rows() {
        let store = store().await;
        store.create_table("g").await.unwrap();
        store
            .insert("g", TableRow::new("User", "u1"))
            .await
            .unwrap();
        store.delete_table("g").await.unwrap();
        assert!(matches!(
            store.delete_table("g").await,
            Err(StoreError::TableNotFound)
        ));
        // Re-creating the table must not resurrect old rows.
        store.create_table("g").await.unwrap();
        assert!(store.retrieve("g", "User", "u1").await.unwrap().is_none());
    }
}
