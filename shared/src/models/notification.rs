use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

use crate::serde_helpers::{datetime, object_id};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Like,
    Comment,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationType::Like => f.write_str("like"),
            NotificationType::Comment => f.write_str("comment"),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSafe {
    #[serde(rename = "_id", with = "object_id")]
    pub id: ObjectId,
    #[serde(with = "object_id")]
    pub recipient_id: ObjectId,
    #[serde(with = "object_id")]
    pub sender_id: ObjectId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
    #[serde(with = "object_id")]
    pub blog_id: ObjectId,
    pub is_read: bool,
    #[serde(with = "datetime")]
    pub created_at: DateTime,
    #[serde(with = "datetime")]
    pub updated_at: DateTime,
}
