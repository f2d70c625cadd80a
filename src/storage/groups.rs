//! Per-group storage: one table per group holding the metadata singleton,
//! one membership row per user and one row per message. Everything here is
//! scoped to a single group; the cross-group indices live in
//! [`crate::storage::group_index`] and [`crate::storage::user_index`].

use std::sync::Arc;

use chrono::Utc;
use log::{error, info};
use uuid::Uuid;

use crate::common::error::ServiceError;
use crate::common::models::{Group, Message, User};
use crate::storage::entities::{GroupMetadata, MembershipRow, MessageRow};
use crate::storage::keys::{self, partitions, METADATA_ROW_KEY};
use crate::storage::pager::drain_all;
use crate::storage::store::{RowQuery, StoreError, TableStore};

/// Business rule: a group never admits more than this many members.
pub const MAX_GROUP_SIZE: usize = 20;

/// Upper bound on message contents, in characters.
pub const MAX_MESSAGE_CHARS: usize = 16_000;

pub struct GroupStore {
    store: Arc<dyn TableStore>,
}

impl GroupStore {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// Provisions a table for a freshly generated group id and writes the
    /// metadata singleton. If the metadata insert fails the table is
    /// dropped again, so no half-initialized group is left behind.
    pub async fn create(&self, name: &str) -> Result<Group, ServiceError> {
        let group_id = Uuid::new_v4();
        let table = keys::group_table(group_id);
        self.store
            .create_table(&table)
            .await
            .map_err(ServiceError::server)?;

        let metadata = GroupMetadata {
            name: name.to_string(),
            creation_time: Utc::now(),
        };
        if let Err(e) = self.store.insert(&table, metadata.to_row()).await {
            error!("Unable to write metadata for new group '{}': {}", name, e);
            if let Err(rollback) = self.store.delete_table(&table).await {
                error!("Rollback of group table {} failed: {}", table, rollback);
            }
            return Err(ServiceError::server(e));
        }

        info!("Group '{}' created with id {}", name, group_id.simple());
        Ok(Group {
            id: group_id,
            name: metadata.name,
            count: 0,
            creation_time: metadata.creation_time,
        })
    }

    pub async fn exists(&self, group_id: Uuid) -> Result<bool, StoreError> {
        self.store.table_exists(&keys::group_table(group_id)).await
    }

    /// Drops the whole group table. Callers that need to clean up reverse
    /// indices must fetch the member list before calling this.
    pub async fn delete(&self, group_id: Uuid) -> Result<(), ServiceError> {
        let table = keys::group_table(group_id);
        if !self
            .store
            .table_exists(&table)
            .await
            .map_err(ServiceError::server)?
        {
            error!("Could not find any group with id {}", group_id.simple());
            return Err(ServiceError::NotFound);
        }
        self.store
            .delete_table(&table)
            .await
            .map_err(ServiceError::server)?;
        info!("Group {} deleted", group_id.simple());
        Ok(())
    }

    /// Adds a membership row. Idempotent: re-adding an existing member
    /// succeeds without touching the row. The capacity check is
    /// point-in-time; two racing joins can both pass it, and that window
    /// is accepted.
    pub async fn add_user(&self, user: &User, group_id: Uuid) -> Result<(), ServiceError> {
        let table = keys::group_table(group_id);
        if !self
            .store
            .table_exists(&table)
            .await
            .map_err(ServiceError::server)?
        {
            error!("Could not find any group with id {}", group_id.simple());
            return Err(ServiceError::NotFound);
        }

        let existing = self
            .store
            .retrieve(&table, partitions::USER, &keys::id_string(user.id))
            .await
            .map_err(ServiceError::server)?;
        if existing.is_some() {
            // Already a member. We're done.
            return Ok(());
        }

        let count = self
            .count_users(group_id)
            .await
            .map_err(ServiceError::server)?;
        if count >= MAX_GROUP_SIZE {
            info!(
                "Not adding user {}-{} to group {}: it already has {} members",
                user.name,
                user.id.simple(),
                group_id.simple(),
                count
            );
            return Err(ServiceError::InvalidArguments(format!(
                "group already has {count} members"
            )));
        }

        let membership = MembershipRow {
            name: user.name.clone(),
            last_seen: Utc::now(),
        };
        if let Err(e) = self.store.insert(&table, membership.to_row(user.id)).await {
            error!(
                "Unable to add user {}-{} to group {}: {}",
                user.name,
                user.id.simple(),
                group_id.simple(),
                e
            );
            return Err(ServiceError::server(e));
        }
        Ok(())
    }

    pub async fn remove_user(&self, user_id: Uuid, group_id: Uuid) -> Result<(), ServiceError> {
        let table = keys::group_table(group_id);
        if !self
            .store
            .table_exists(&table)
            .await
            .map_err(ServiceError::server)?
        {
            error!("Could not find any group with id {}", group_id.simple());
            return Err(ServiceError::NotFound);
        }

        let user_key = keys::id_string(user_id);
        let membership = self
            .store
            .retrieve(&table, partitions::USER, &user_key)
            .await
            .map_err(ServiceError::server)?;
        if membership.is_none() {
            error!(
                "Could not find user {} in group {}",
                user_key,
                group_id.simple()
            );
            return Err(ServiceError::NotFound);
        }

        if let Err(e) = self
            .store
            .delete_row(&table, partitions::USER, &user_key)
            .await
        {
            error!(
                "Failed to remove user {} from group {}: {}",
                user_key,
                group_id.simple(),
                e
            );
            return Err(ServiceError::server(e));
        }
        Ok(())
    }

    /// Validates and persists a message. The id, timestamp and sender name
    /// are stamped here; whatever name the caller put on the message is
    /// discarded in favor of the sender's membership row.
    pub async fn append_message(&self, mut message: Message) -> Result<Message, ServiceError> {
        let length = message.contents.chars().count();
        if length > MAX_MESSAGE_CHARS {
            error!(
                "Message contents too large: {} chars, max is {}",
                length, MAX_MESSAGE_CHARS
            );
            return Err(ServiceError::InvalidArguments(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let table = keys::group_table(message.group_id);
        if !self
            .store
            .table_exists(&table)
            .await
            .map_err(ServiceError::server)?
        {
            error!(
                "Could not find any group with id {}",
                message.group_id.simple()
            );
            return Err(ServiceError::NotFound);
        }

        // The sender must hold a membership row in this group.
        let sender_row = self
            .store
            .retrieve(&table, partitions::USER, &keys::id_string(message.sender_id))
            .await
            .map_err(ServiceError::server)?;
        let Some(sender_row) = sender_row else {
            error!(
                "User {} does not belong to group {}",
                message.sender_id.simple(),
                message.group_id.simple()
            );
            return Err(ServiceError::NotFound);
        };
        let sender = MembershipRow::user_from_row(&sender_row).map_err(ServiceError::server)?;

        message.id = Uuid::new_v4();
        message.timestamp = Utc::now();
        message.sender_name = sender.name;

        let row = MessageRow {
            sender_id: message.sender_id,
            sender_name: message.sender_name.clone(),
            contents: message.contents.clone(),
            sent_at: message.timestamp,
        }
        .to_row(message.id);
        if let Err(e) = self.store.insert(&table, row).await {
            error!(
                "Failed to store message from {} in group {}: {}",
                message.sender_id.simple(),
                message.group_id.simple(),
                e
            );
            return Err(ServiceError::server(e));
        }
        Ok(message)
    }

    pub async fn users(&self, group_id: Uuid) -> Result<Vec<User>, ServiceError> {
        let table = keys::group_table(group_id);
        if !self
            .store
            .table_exists(&table)
            .await
            .map_err(ServiceError::server)?
        {
            error!("Could not find any group with id {}", group_id.simple());
            return Err(ServiceError::NotFound);
        }
        let rows = drain_all(
            self.store.as_ref(),
            &table,
            &RowQuery::partition(partitions::USER),
        )
        .await
        .map_err(ServiceError::server)?;
        rows.iter()
            .map(MembershipRow::user_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ServiceError::server)
    }

    // Gets large once a group's history grows; the contract is a full drain.
    pub async fn messages(&self, group_id: Uuid) -> Result<Vec<Message>, ServiceError> {
        let table = keys::group_table(group_id);
        if !self
            .store
            .table_exists(&table)
            .await
            .map_err(ServiceError::server)?
        {
            error!("Could not find any group with id {}", group_id.simple());
            return Err(ServiceError::NotFound);
        }
        let rows = drain_all(
            self.store.as_ref(),
            &table,
            &RowQuery::partition(partitions::MESSAGE),
        )
        .await
        .map_err(ServiceError::server)?;
        rows.iter()
            .map(|row| MessageRow::message_from_row(group_id, row))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ServiceError::server)
    }

    /// Live member count via a keys-only projection; no row bodies move.
    pub async fn count_users(&self, group_id: Uuid) -> Result<usize, StoreError> {
        let rows = drain_all(
            self.store.as_ref(),
            &keys::group_table(group_id),
            &RowQuery::keys_only(partitions::USER),
        )
        .await?;
        Ok(rows.len())
    }

    pub async fn metadata(&self, group_id: Uuid) -> Result<Option<GroupMetadata>, StoreError> {
        let row = self
            .store
            .retrieve(
                &keys::group_table(group_id),
                partitions::METADATA,
                METADATA_ROW_KEY,
            )
            .await?;
        row.map(|r| GroupMetadata::from_row(&r)).transpose()
    }
}
