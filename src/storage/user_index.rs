//! Per-user reverse index: one table per user, one loose row per group
//! they belong to. Maintained separately from the authoritative
//! membership rows inside group tables; the two views are reconciled
//! lazily on read, never enforced synchronously.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::storage::keys::{self, partitions};
use crate::storage::pager::drain_all;
use crate::storage::store::{RowQuery, StoreError, TableRow, TableStore};

pub struct UserIndex {
    store: Arc<dyn TableStore>,
}

impl UserIndex {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// Records a membership. Idempotent: a row already present, or a
    /// concurrent insert racing this one, is a no-op.
    pub async fn add(
        &self,
        user_id: Uuid,
        group_id: Uuid,
        join_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let table = keys::user_table(user_id);
        self.store.create_table_if_not_exists(&table).await?;

        let row_key = keys::id_string(group_id);
        if self
            .store
            .retrieve(&table, partitions::GROUP, &row_key)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let row = TableRow::new(partitions::GROUP, &row_key).with_time("JoinTime", join_time);
        match self.store.insert(&table, row).await {
            Ok(()) | Err(StoreError::RowExists) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Removes a membership row. An absent table or row is already the
    /// desired state and counts as success.
    pub async fn remove(&self, user_id: Uuid, group_id: Uuid) -> Result<(), StoreError> {
        let table = keys::user_table(user_id);
        if !self.store.table_exists(&table).await? {
            return Ok(());
        }
        match self
            .store
            .delete_row(&table, partitions::GROUP, &keys::id_string(group_id))
            .await
        {
            Ok(()) | Err(StoreError::RowNotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Ids of every group the user belongs to, per the reverse index.
    /// Fails with [`StoreError::TableNotFound`] for an unknown user.
    pub async fn list_group_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let table = keys::user_table(user_id);
        if !self.store.table_exists(&table).await? {
            return Err(StoreError::TableNotFound);
        }
        let rows = drain_all(
            self.store.as_ref(),
            &table,
            &RowQuery::keys_only(partitions::GROUP),
        )
        .await?;
        rows.iter().map(|row| keys::parse_id(&row.row_key)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryTableStore;

    fn index() -> UserIndex {
        UserIndex::new(Arc::new(MemoryTableStore::new()))
    }

    #[tokio::test]
    async fn adding_the_same_group_twice_keeps_one_row() {
        let index = index();
        let user_id = Uuid::new_v4();
        let group_id = Uuid::new_v4();
        index.add(user_id, group_id, Utc::now()).await.unwrap();
        index.add(user_id, group_id, Utc::now()).await.unwrap();
        assert_eq!(index.list_group_ids(user_id).await.unwrap(), vec![group_id]);
    }

    #[tokio::test]
    async fn removing_from_an_absent_table_is_a_success() {
        let index = index();
        index
            .remove(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn removing_an_absent_row_is_a_success() {
        let index = index();
        let user_id = Uuid::new_v4();
        index.add(user_id, Uuid::new_v4(), Utc::now()).await.unwrap();
        index.remove(user_id, Uuid::new_v4()).await.unwrap();
        assert_eq!(index.list_group_ids(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_an_unknown_user_is_table_not_found() {
        let index = index();
        assert!(matches!(
            index.list_group_ids(Uuid::new_v4()).await,
            Err(StoreError::TableNotFound)
        ));
    }

    #[tokio::test]
    async fn removed_groups_disappear_from_the_listing() {
        let index = index();
        let user_id = Uuid::new_v4();
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();
        index.add(user_id, keep, Utc::now()).await.unwrap();
        index.add(user_id, drop, Utc::now()).await.unwrap();
        index.remove(user_id, drop).await.unwrap();
        assert_eq!(index.list_group_ids(user_id).await.unwrap(), vec![keep]);
    }
}
