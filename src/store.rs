use async_trait::async_trait;
use mongodb::bson::{oid::ObjectId, DateTime};
use shared::api::BulkUpdateResponse;

use crate::models::{chat::Chat, message::Message, notification::Notification, user::User};

/// Persistence used by the controllers.
///
/// Lookups return `Ok(None)` for absent documents; errors are reserved for
/// backend failures.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn find_users(&self, ids: &[ObjectId]) -> anyhow::Result<Vec<User>>;

    async fn insert_chat(&self, chat: &Chat) -> anyhow::Result<()>;

    async fn find_chat(&self, id: ObjectId) -> anyhow::Result<Option<Chat>>;

    /// The non-group chat whose members are exactly `a` and `b`.
    async fn find_direct_chat(&self, a: ObjectId, b: ObjectId) -> anyhow::Result<Option<Chat>>;

    /// Chats containing `user_id`, most recently updated first.
    async fn chats_for_user(&self, user_id: ObjectId) -> anyhow::Result<Vec<Chat>>;

    async fn rename_chat(&self, id: ObjectId, name: &str) -> anyhow::Result<Option<Chat>>;

    async fn add_chat_member(&self, id: ObjectId, user_id: ObjectId)
        -> anyhow::Result<Option<Chat>>;

    async fn remove_chat_member(
        &self,
        id: ObjectId,
        user_id: ObjectId,
    ) -> anyhow::Result<Option<Chat>>;

    async fn set_latest_message(
        &self,
        chat_id: ObjectId,
        message_id: ObjectId,
        at: DateTime,
    ) -> anyhow::Result<()>;

    async fn insert_message(&self, message: &Message) -> anyhow::Result<()>;

    /// Messages of a chat, oldest first.
    async fn messages_for_chat(&self, chat_id: ObjectId) -> anyhow::Result<Vec<Message>>;

    /// Adds `user_id` to `readBy` of every message in the chat.
    async fn mark_chat_read(
        &self,
        chat_id: ObjectId,
        user_id: ObjectId,
    ) -> anyhow::Result<BulkUpdateResponse>;

    async fn insert_notification(&self, notification: &Notification) -> anyhow::Result<()>;

    /// Inserts `notification`, or refreshes the existing one with the same
    /// recipient, sender, blog and type. Returns the stored document.
    async fn upsert_notification(&self, notification: &Notification)
        -> anyhow::Result<Notification>;

    async fn find_notification(&self, id: ObjectId) -> anyhow::Result<Option<Notification>>;

    /// Notifications addressed to `user_id`, newest first.
    async fn notifications_for_user(&self, user_id: ObjectId)
        -> anyhow::Result<Vec<Notification>>;

    async fn mark_notification_read(&self, id: ObjectId) -> anyhow::Result<Option<Notification>>;

    async fn mark_all_notifications_read(
        &self,
        user_id: ObjectId,
    ) -> anyhow::Result<BulkUpdateResponse>;

    async fn unread_notification_count(&self, user_id: ObjectId) -> anyhow::Result<u64>;

    /// Deletes every read notification of `user_id`, returning how many went.
    async fn delete_read_notifications(&self, user_id: ObjectId) -> anyhow::Result<u64>;
}
