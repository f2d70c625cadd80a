//! Entity codecs: explicit, lossless conversions between domain records
//! and table rows. One codec per payload type; no reflection, no field
//! mapping by convention.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::common::models::{Group, Message, User};
use crate::storage::keys::{self, partitions, METADATA_ROW_KEY};
use crate::storage::store::{StoreError, TableRow};

fn missing(field: &str) -> StoreError {
    StoreError::Decode(format!("missing property {field}"))
}

/// Singleton per group table; immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMetadata {
    pub name: String,
    pub creation_time: DateTime<Utc>,
}

impl GroupMetadata {
    pub fn to_row(&self) -> TableRow {
        TableRow::new(partitions::METADATA, METADATA_ROW_KEY)
            .with_text("Name", &self.name)
            .with_time("CreationTime", self.creation_time)
    }

    pub fn from_row(row: &TableRow) -> Result<Self, StoreError> {
        Ok(Self {
            name: row.text("Name").ok_or_else(|| missing("Name"))?.to_string(),
            creation_time: row
                .time("CreationTime")
                .ok_or_else(|| missing("CreationTime"))?,
        })
    }
}

/// Membership row inside a group table; presence means membership. The row
/// key is the member's canonical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRow {
    pub name: String,
    pub last_seen: DateTime<Utc>,
}

impl MembershipRow {
    pub fn to_row(&self, user_id: Uuid) -> TableRow {
        TableRow::new(partitions::USER, &keys::id_string(user_id))
            .with_text("Name", &self.name)
            .with_time("LastSeen", self.last_seen)
    }

    pub fn user_from_row(row: &TableRow) -> Result<User, StoreError> {
        Ok(User {
            id: keys::parse_id(&row.row_key)?,
            name: row.text("Name").ok_or_else(|| missing("Name"))?.to_string(),
        })
    }
}

/// Message row inside a group table; the row key is the generated message
/// id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub sender_id: Uuid,
    pub sender_name: String,
    pub contents: String,
    pub sent_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn to_row(&self, message_id: Uuid) -> TableRow {
        TableRow::new(partitions::MESSAGE, &keys::id_string(message_id))
            .with_text("SenderId", &keys::id_string(self.sender_id))
            .with_text("SenderName", &self.sender_name)
            .with_text("Contents", &self.contents)
            .with_time("SentTimestamp", self.sent_at)
    }

    pub fn message_from_row(group_id: Uuid, row: &TableRow) -> Result<Message, StoreError> {
        Ok(Message {
            id: keys::parse_id(&row.row_key)?,
            group_id,
            sender_id: keys::parse_id(row.text("SenderId").ok_or_else(|| missing("SenderId"))?)?,
            sender_name: row
                .text("SenderName")
                .ok_or_else(|| missing("SenderName"))?
                .to_string(),
            contents: row
                .text("Contents")
                .ok_or_else(|| missing("Contents"))?
                .to_string(),
            timestamp: row
                .time("SentTimestamp")
                .ok_or_else(|| missing("SentTimestamp"))?,
        })
    }
}

/// Denormalized entry in the AllGroups index; the row key is the group's
/// canonical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub count: i64,
    pub creation_time: DateTime<Utc>,
}

impl GroupEntry {
    pub fn to_row(&self, group_id: Uuid) -> TableRow {
        TableRow::new(partitions::GROUP, &keys::id_string(group_id))
            .with_text("Name", &self.name)
            .with_int("Count", self.count)
            .with_time("CreationTime", self.creation_time)
    }

    pub fn group_from_row(row: &TableRow) -> Result<Group, StoreError> {
        Ok(Group {
            id: keys::parse_id(&row.row_key)?,
            name: row.text("Name").ok_or_else(|| missing("Name"))?.to_string(),
            count: row.int("Count").ok_or_else(|| missing("Count"))?,
            creation_time: row
                .time("CreationTime")
                .ok_or_else(|| missing("CreationTime"))?,
        })
    }
}
