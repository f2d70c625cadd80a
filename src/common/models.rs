// Common models shared between the storage layer and the server glue
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub count: i64,
    pub creation_time: DateTime<Utc>,
}

/// Users only exist as membership rows inside group tables and as
/// reverse-index tables; there is no standalone user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub contents: String,
    pub timestamp: DateTime<Utc>,
}

/// What a caller supplies when sending a message. The sender name and
/// timestamp are stamped server-side, never trusted from the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePayload {
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub contents: String,
}

/// Payloads for the real-time fan-out layer. This crate only produces
/// them; delivering them is the transport's job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ChatEvent {
    #[serde(rename_all = "camelCase")]
    MemberAdded { group_id: Uuid, user_id: Uuid },
    #[serde(rename_all = "camelCase")]
    MemberRemoved { group_id: Uuid, user_id: Uuid },
    NewMessage { message: Message },
}
