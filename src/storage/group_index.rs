//! Denormalized group list: one summary row per group in a shared table,
//! so listing groups never touches the per-group tables. Updated
//! best-effort after primary writes; a stale entry is corrected by the
//! next successful mutation of its group.

use std::sync::Arc;

use log::{error, warn};
use uuid::Uuid;

use crate::common::models::Group;
use crate::storage::entities::{GroupEntry, GroupMetadata};
use crate::storage::keys::{self, partitions, ALL_GROUPS_TABLE};
use crate::storage::pager::drain_all;
use crate::storage::store::{RowQuery, StoreError, TableStore};

pub struct GroupIndex {
    store: Arc<dyn TableStore>,
}

impl GroupIndex {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// Insert-or-replace the group's summary row. Failures are logged and
    /// swallowed; a caller's primary operation never fails on this.
    pub async fn upsert(&self, group_id: Uuid, metadata: &GroupMetadata, count: i64) {
        let entry = GroupEntry {
            name: metadata.name.clone(),
            count,
            creation_time: metadata.creation_time,
        };
        let result: Result<(), StoreError> = async {
            self.store.create_table_if_not_exists(ALL_GROUPS_TABLE).await?;
            self.store
                .insert_or_replace(ALL_GROUPS_TABLE, entry.to_row(group_id))
                .await
        }
        .await;
        if let Err(e) = result {
            // Not fatal. We'll catch it on the next group update.
            warn!(
                "Failed to update the group list entry for {} ('{}'): {}",
                group_id.simple(),
                metadata.name,
                e
            );
        }
    }

    /// Best-effort retrieve-then-delete of the summary row.
    pub async fn remove(&self, group_id: Uuid) {
        let row_key = keys::id_string(group_id);
        match self
            .store
            .retrieve(ALL_GROUPS_TABLE, partitions::GROUP, &row_key)
            .await
        {
            Ok(Some(_)) => {
                if let Err(e) = self
                    .store
                    .delete_row(ALL_GROUPS_TABLE, partitions::GROUP, &row_key)
                    .await
                {
                    error!(
                        "Located, but could not delete, group list entry {}: {}",
                        row_key, e
                    );
                }
            }
            Ok(None) => {
                warn!(
                    "No group list entry found for {} while trying to delete it",
                    row_key
                );
            }
            Err(e) => {
                warn!(
                    "Could not look up group list entry {} while trying to delete it: {}",
                    row_key, e
                );
            }
        }
    }

    /// Every group in the index, in row-key order.
    pub async fn list_all(&self) -> Result<Vec<Group>, StoreError> {
        self.store.create_table_if_not_exists(ALL_GROUPS_TABLE).await?;
        let rows = drain_all(
            self.store.as_ref(),
            ALL_GROUPS_TABLE,
            &RowQuery::partition(partitions::GROUP),
        )
        .await?;
        rows.iter().map(GroupEntry::group_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryTableStore;
    use chrono::Utc;
    use std::collections::HashSet;

    fn index() -> GroupIndex {
        GroupIndex::new(Arc::new(MemoryTableStore::with_page_size(3)))
    }

    fn metadata(name: &str) -> GroupMetadata {
        GroupMetadata {
            name: name.to_string(),
            creation_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_the_count_in_place() {
        let index = index();
        let group_id = Uuid::new_v4();
        let metadata = metadata("pranzo");
        index.upsert(group_id, &metadata, 0).await;
        index.upsert(group_id, &metadata, 4).await;
        let groups = index.list_all().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 4);
        assert_eq!(groups[0].name, "pranzo");
    }

    #[tokio::test]
    async fn list_all_pages_through_the_whole_index() {
        let index = index();
        for i in 0..6 {
            index.upsert(Uuid::new_v4(), &metadata(&format!("g{i}")), 0).await;
        }
        let groups = index.list_all().await.unwrap();
        assert_eq!(groups.len(), 6);
        let ids: HashSet<_> = groups.iter().map(|g| g.id).collect();
        assert_eq!(ids.len(), 6);
    }

    #[tokio::test]
    async fn removing_a_present_entry_deletes_it() {
        let index = index();
        let group_id = Uuid::new_v4();
        index.upsert(group_id, &metadata("g"), 0).await;
        index.remove(group_id).await;
        assert!(index.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_a_missing_entry_is_quiet() {
        let index = index();
        // Nothing was ever upserted; this must only log, never fail.
        index.remove(Uuid::new_v4()).await;
        assert!(index.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_an_empty_index_is_fine() {
        assert!(index().list_all().await.unwrap().is_empty());
    }
}
