use anyhow::Context;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime},
    options::{ClientOptions, ReturnDocument},
    Client, Collection, Database, IndexModel,
};
use shared::api::BulkUpdateResponse;
use tracing::info;

use crate::{
    models::{chat::Chat, message::Message, notification::Notification, user::User},
    store::Store,
};

#[derive(Clone)]
pub struct MongoDatabase {
    pub database: Database,
}

impl MongoDatabase {
    pub async fn init(url: &str, database: &str) -> anyhow::Result<Self> {
        let client_options = ClientOptions::parse(url).await?;
        let client = Client::with_options(client_options)?;

        let db = MongoDatabase {
            database: client.database(database),
        };

        db.create_indexes()
            .await
            .context("creating collection indexes")?;

        info!("connected to MongoDB database {database}");

        Ok(db)
    }

    async fn create_indexes(&self) -> anyhow::Result<()> {
        self.messages()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "chat": 1, "createdAt": 1 })
                    .build(),
            )
            .await?;

        self.notifications()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "recipientId": 1, "createdAt": -1 })
                    .build(),
            )
            .await?;

        self.chats()
            .create_index(IndexModel::builder().keys(doc! { "users": 1 }).build())
            .await?;

        Ok(())
    }

    fn users(&self) -> Collection<User> {
        self.database.collection::<User>("users")
    }

    fn chats(&self) -> Collection<Chat> {
        self.database.collection::<Chat>("chats")
    }

    fn messages(&self) -> Collection<Message> {
        self.database.collection::<Message>("messages")
    }

    fn notifications(&self) -> Collection<Notification> {
        self.database.collection::<Notification>("notifications")
    }

    async fn update_chat(
        &self,
        id: ObjectId,
        update: mongodb::bson::Document,
    ) -> anyhow::Result<Option<Chat>> {
        let chat = self
            .chats()
            .find_one_and_update(doc! { "_id": id }, update)
            .return_document(ReturnDocument::After)
            .await?;

        Ok(chat)
    }
}

#[async_trait]
impl Store for MongoDatabase {
    fn backend(&self) -> &'static str {
        "mongo"
    }

    async fn find_users(&self, ids: &[ObjectId]) -> anyhow::Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let users = self
            .users()
            .find(doc! { "_id": { "$in": ids.to_vec() } })
            .projection(doc! { "name": 1, "email": 1, "pic": 1 })
            .await?
            .try_collect::<Vec<_>>()
            .await
            .context("loading users")?;

        Ok(users)
    }

    async fn insert_chat(&self, chat: &Chat) -> anyhow::Result<()> {
        self.chats()
            .insert_one(chat)
            .await
            .context("inserting chat")?;

        Ok(())
    }

    async fn find_chat(&self, id: ObjectId) -> anyhow::Result<Option<Chat>> {
        let chat = self
            .chats()
            .find_one(doc! { "_id": id })
            .await
            .context("loading chat")?;

        Ok(chat)
    }

    async fn find_direct_chat(&self, a: ObjectId, b: ObjectId) -> anyhow::Result<Option<Chat>> {
        let chat = self
            .chats()
            .find_one(doc! {
                "isGroupChat": false,
                "users": { "$all": [a, b], "$size": 2 },
            })
            .await
            .context("looking up direct chat")?;

        Ok(chat)
    }

    async fn chats_for_user(&self, user_id: ObjectId) -> anyhow::Result<Vec<Chat>> {
        let chats = self
            .chats()
            .find(doc! { "users": user_id })
            .sort(doc! { "updatedAt": -1 })
            .await?
            .try_collect::<Vec<_>>()
            .await
            .context("listing chats")?;

        Ok(chats)
    }

    async fn rename_chat(&self, id: ObjectId, name: &str) -> anyhow::Result<Option<Chat>> {
        self.update_chat(
            id,
            doc! { "$set": { "chatName": name, "updatedAt": DateTime::now() } },
        )
        .await
        .context("renaming chat")
    }

    async fn add_chat_member(
        &self,
        id: ObjectId,
        user_id: ObjectId,
    ) -> anyhow::Result<Option<Chat>> {
        self.update_chat(
            id,
            doc! {
                "$addToSet": { "users": user_id },
                "$set": { "updatedAt": DateTime::now() },
            },
        )
        .await
        .context("adding chat member")
    }

    async fn remove_chat_member(
        &self,
        id: ObjectId,
        user_id: ObjectId,
    ) -> anyhow::Result<Option<Chat>> {
        self.update_chat(
            id,
            doc! {
                "$pull": { "users": user_id },
                "$set": { "updatedAt": DateTime::now() },
            },
        )
        .await
        .context("removing chat member")
    }

    async fn set_latest_message(
        &self,
        chat_id: ObjectId,
        message_id: ObjectId,
        at: DateTime,
    ) -> anyhow::Result<()> {
        self.chats()
            .update_one(
                doc! { "_id": chat_id },
                doc! { "$set": { "latestMessage": message_id, "updatedAt": at } },
            )
            .await
            .context("updating latest message")?;

        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> anyhow::Result<()> {
        self.messages()
            .insert_one(message)
            .await
            .context("inserting message")?;

        Ok(())
    }

    async fn messages_for_chat(&self, chat_id: ObjectId) -> anyhow::Result<Vec<Message>> {
        let messages = self
            .messages()
            .find(doc! { "chat": chat_id })
            .sort(doc! { "createdAt": 1, "_id": 1 })
            .await?
            .try_collect::<Vec<_>>()
            .await
            .context("listing messages")?;

        Ok(messages)
    }

    async fn mark_chat_read(
        &self,
        chat_id: ObjectId,
        user_id: ObjectId,
    ) -> anyhow::Result<BulkUpdateResponse> {
        let result = self
            .messages()
            .update_many(
                doc! { "chat": chat_id },
                doc! { "$addToSet": { "readBy": user_id } },
            )
            .await
            .context("marking messages read")?;

        Ok(BulkUpdateResponse {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn insert_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        self.notifications()
            .insert_one(notification)
            .await
            .context("inserting notification")?;

        Ok(())
    }

    async fn upsert_notification(
        &self,
        notification: &Notification,
    ) -> anyhow::Result<Notification> {
        self.notifications()
            .find_one_and_update(
                doc! {
                    "recipientId": notification.recipient_id,
                    "senderId": notification.sender_id,
                    "blogId": notification.blog_id,
                    "type": notification.kind.to_string(),
                },
                doc! {
                    "$set": {
                        "message": notification.message.as_str(),
                        "isRead": false,
                        "updatedAt": notification.updated_at,
                    },
                    "$setOnInsert": {
                        "_id": notification.id,
                        "createdAt": notification.created_at,
                    },
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .context("upserting notification")?
            .context("upsert returned no document")
    }

    async fn find_notification(&self, id: ObjectId) -> anyhow::Result<Option<Notification>> {
        let notification = self
            .notifications()
            .find_one(doc! { "_id": id })
            .await
            .context("loading notification")?;

        Ok(notification)
    }

    async fn notifications_for_user(
        &self,
        user_id: ObjectId,
    ) -> anyhow::Result<Vec<Notification>> {
        let notifications = self
            .notifications()
            .find(doc! { "recipientId": user_id })
            .sort(doc! { "createdAt": -1, "_id": -1 })
            .await?
            .try_collect::<Vec<_>>()
            .await
            .context("listing notifications")?;

        Ok(notifications)
    }

    async fn mark_notification_read(&self, id: ObjectId) -> anyhow::Result<Option<Notification>> {
        let notification = self
            .notifications()
            .find_one_and_update(
                doc! { "_id": id },
                doc! { "$set": { "isRead": true, "updatedAt": DateTime::now() } },
            )
            .return_document(ReturnDocument::After)
            .await
            .context("marking notification read")?;

        Ok(notification)
    }

    async fn mark_all_notifications_read(
        &self,
        user_id: ObjectId,
    ) -> anyhow::Result<BulkUpdateResponse> {
        let result = self
            .notifications()
            .update_many(
                doc! { "recipientId": user_id, "isRead": false },
                doc! { "$set": { "isRead": true, "updatedAt": DateTime::now() } },
            )
            .await
            .context("marking all notifications read")?;

        Ok(BulkUpdateResponse {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn unread_notification_count(&self, user_id: ObjectId) -> anyhow::Result<u64> {
        let count = self
            .notifications()
            .count_documents(doc! { "recipientId": user_id, "isRead": false })
            .await
            .context("counting unread notifications")?;

        Ok(count)
    }

    async fn delete_read_notifications(&self, user_id: ObjectId) -> anyhow::Result<u64> {
        let result = self
            .notifications()
            .delete_many(doc! { "recipientId": user_id, "isRead": true })
            .await
            .context("deleting read notifications")?;

        Ok(result.deleted_count)
    }
}
