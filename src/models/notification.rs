use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use shared::models::notification::{NotificationSafe, NotificationType};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub recipient_id: ObjectId,
    pub sender_id: ObjectId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
    pub blog_id: ObjectId,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Notification {
    pub fn new(
        recipient_id: ObjectId,
        sender_id: ObjectId,
        kind: NotificationType,
        message: String,
        blog_id: ObjectId,
    ) -> Self {
        let now = DateTime::now();

        Notification {
            id: ObjectId::new(),
            recipient_id,
            sender_id,
            kind,
            message,
            blog_id,
            is_read: false,
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<Notification> for NotificationSafe {
    fn from(value: Notification) -> Self {
        NotificationSafe {
            id: value.id,
            recipient_id: value.recipient_id,
            sender_id: value.sender_id,
            kind: value.kind,
            message: value.message,
            blog_id: value.blog_id,
            is_read: value.is_read,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}
