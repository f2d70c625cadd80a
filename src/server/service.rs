//! The operations the wire protocol exposes, composed from the primary
//! group storage and the two secondary indices. Primary writes decide
//! success or failure; index maintenance afterwards is best-effort and
//! only ever logs.

use std::sync::Arc;

use chrono::Utc;
use log::warn;
use uuid::Uuid;

use crate::common::error::ServiceError;
use crate::common::models::{Group, Message, MessagePayload, User};
use crate::storage::entities::GroupMetadata;
use crate::storage::group_index::GroupIndex;
use crate::storage::groups::GroupStore;
use crate::storage::store::TableStore;
use crate::storage::user_index::UserIndex;

pub struct ChatService {
    groups: GroupStore,
    group_index: GroupIndex,
    user_index: UserIndex,
}

impl ChatService {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            groups: GroupStore::new(store.clone()),
            group_index: GroupIndex::new(store.clone()),
            user_index: UserIndex::new(store),
        }
    }

    pub async fn create_group(&self, name: &str) -> Result<Group, ServiceError> {
        let group = self.groups.create(name).await?;
        let metadata = GroupMetadata {
            name: group.name.clone(),
            creation_time: group.creation_time,
        };
        self.group_index.upsert(group.id, &metadata, 0).await;
        Ok(group)
    }

    pub async fn join_group(&self, user: &User, group_id: Uuid) -> Result<(), ServiceError> {
        self.groups.add_user(user, group_id).await?;
        self.refresh_index_entry(group_id).await;
        if let Err(e) = self.user_index.add(user.id, group_id, Utc::now()).await {
            warn!(
                "Could not record group {} in the index of user {}: {}",
                group_id.simple(),
                user.id.simple(),
                e
            );
        }
        Ok(())
    }

    pub async fn leave_group(&self, user_id: Uuid, group_id: Uuid) -> Result<(), ServiceError> {
        self.groups.remove_user(user_id, group_id).await?;
        self.refresh_index_entry(group_id).await;
        if let Err(e) = self.user_index.remove(user_id, group_id).await {
            warn!(
                "Could not drop group {} from the index of user {}: {}",
                group_id.simple(),
                user_id.simple(),
                e
            );
        }
        Ok(())
    }

    /// Deletes the group and scrubs both indices. Returns the members the
    /// group had at deletion time, so callers can notify them.
    pub async fn delete_group(&self, group_id: Uuid) -> Result<Vec<User>, ServiceError> {
        // Member list must be read before the table goes away.
        let members = self.groups.users(group_id).await?;
        self.groups.delete(group_id).await?;
        self.group_index.remove(group_id).await;
        for member in &members {
            if let Err(e) = self.user_index.remove(member.id, group_id).await {
                warn!(
                    "Could not drop deleted group {} from the index of user {}: {}",
                    group_id.simple(),
                    member.id.simple(),
                    e
                );
            }
        }
        Ok(members)
    }

    pub async fn send_message(&self, payload: MessagePayload) -> Result<Message, ServiceError> {
        let message = Message {
            id: Uuid::nil(),
            group_id: payload.group_id,
            sender_id: payload.sender_id,
            sender_name: String::new(),
            contents: payload.contents,
            timestamp: Utc::now(),
        };
        self.groups.append_message(message).await
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>, ServiceError> {
        Ok(self.group_index.list_all().await?)
    }

    pub async fn list_users(&self, group_id: Uuid) -> Result<Vec<User>, ServiceError> {
        self.groups.users(group_id).await
    }

    pub async fn list_messages(&self, group_id: Uuid) -> Result<Vec<Message>, ServiceError> {
        self.groups.messages(group_id).await
    }

    /// The groups a user belongs to, with live metadata. Entries in the
    /// user's index that no longer appear in the group list are dropped
    /// silently; they belong to deleted groups.
    pub async fn get_user_membership(&self, user_id: Uuid) -> Result<Vec<Group>, ServiceError> {
        let (all_groups, group_ids) = tokio::join!(
            self.group_index.list_all(),
            self.user_index.list_group_ids(user_id)
        );
        // An unknown user has no reverse-index table; the store error
        // conversion turns that into NotFound.
        let group_ids = group_ids?;
        let all_groups = all_groups?;
        Ok(all_groups
            .into_iter()
            .filter(|g| group_ids.contains(&g.id))
            .collect())
    }

    /// Recomputes and republishes the group's summary row. Any failure
    /// leaves the entry stale until the next membership change.
    async fn refresh_index_entry(&self, group_id: Uuid) {
        let count = match self.groups.count_users(group_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    "Could not count members of group {} for its list entry: {}",
                    group_id.simple(),
                    e
                );
                return;
            }
        };
        let metadata = match self.groups.metadata(group_id).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                warn!(
                    "Group {} has no metadata row; leaving its list entry alone",
                    group_id.simple()
                );
                return;
            }
            Err(e) => {
                warn!(
                    "Could not read metadata of group {} for its list entry: {}",
                    group_id.simple(),
                    e
                );
                return;
            }
        };
        self.group_index
            .upsert(group_id, &metadata, count as i64)
            .await;
    }
}
