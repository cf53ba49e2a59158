use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use mongodb::bson::{oid::ObjectId, DateTime};
use shared::api::BulkUpdateResponse;

use crate::{
    models::{chat::Chat, message::Message, notification::Notification, user::User},
    store::Store,
};

/// Process-local store for development and tests. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    users: Vec<User>,
    chats: Vec<Chat>,
    messages: Vec<Message>,
    notifications: Vec<Notification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts are owned by the main application; this seeds them locally.
    pub fn insert_user(&self, user: User) {
        let mut state = self.state();

        state.users.retain(|existing| existing.id != user.id);
        state.users.push(user);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // a panic while holding the lock leaves plain data behind, keep serving it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update_chat(&self, id: ObjectId, update: impl FnOnce(&mut Chat)) -> Option<Chat> {
        let mut state = self.state();

        state.chats.iter_mut().find(|chat| chat.id == id).map(|chat| {
            update(chat);
            chat.updated_at = DateTime::now();
            chat.clone()
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find_users(&self, ids: &[ObjectId]) -> anyhow::Result<Vec<User>> {
        let state = self.state();

        Ok(state
            .users
            .iter()
            .filter(|user| ids.contains(&user.id))
            .cloned()
            .collect())
    }

    async fn insert_chat(&self, chat: &Chat) -> anyhow::Result<()> {
        let mut state = self.state();

        if state.chats.iter().any(|existing| existing.id == chat.id) {
            anyhow::bail!("duplicate chat id {}", chat.id);
        }

        state.chats.push(chat.clone());

        Ok(())
    }

    async fn find_chat(&self, id: ObjectId) -> anyhow::Result<Option<Chat>> {
        Ok(self.state().chats.iter().find(|chat| chat.id == id).cloned())
    }

    async fn find_direct_chat(&self, a: ObjectId, b: ObjectId) -> anyhow::Result<Option<Chat>> {
        Ok(self
            .state()
            .chats
            .iter()
            .find(|chat| {
                !chat.is_group_chat
                    && chat.users.len() == 2
                    && chat.has_member(&a)
                    && chat.has_member(&b)
            })
            .cloned())
    }

    async fn chats_for_user(&self, user_id: ObjectId) -> anyhow::Result<Vec<Chat>> {
        let mut chats: Vec<Chat> = self
            .state()
            .chats
            .iter()
            .filter(|chat| chat.has_member(&user_id))
            .cloned()
            .collect();

        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(chats)
    }

    async fn rename_chat(&self, id: ObjectId, name: &str) -> anyhow::Result<Option<Chat>> {
        Ok(self.update_chat(id, |chat| chat.chat_name = Some(name.to_string())))
    }

    async fn add_chat_member(
        &self,
        id: ObjectId,
        user_id: ObjectId,
    ) -> anyhow::Result<Option<Chat>> {
        Ok(self.update_chat(id, |chat| {
            if !chat.has_member(&user_id) {
                chat.users.push(user_id);
            }
        }))
    }

    async fn remove_chat_member(
        &self,
        id: ObjectId,
        user_id: ObjectId,
    ) -> anyhow::Result<Option<Chat>> {
        Ok(self.update_chat(id, |chat| chat.users.retain(|user| *user != user_id)))
    }

    async fn set_latest_message(
        &self,
        chat_id: ObjectId,
        message_id: ObjectId,
        at: DateTime,
    ) -> anyhow::Result<()> {
        let mut state = self.state();

        if let Some(chat) = state.chats.iter_mut().find(|chat| chat.id == chat_id) {
            chat.latest_message = Some(message_id);
            chat.updated_at = at;
        }

        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> anyhow::Result<()> {
        self.state().messages.push(message.clone());

        Ok(())
    }

    async fn messages_for_chat(&self, chat_id: ObjectId) -> anyhow::Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .state()
            .messages
            .iter()
            .filter(|message| message.chat == chat_id)
            .cloned()
            .collect();

        // stable: equal timestamps keep insertion order
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(messages)
    }

    async fn mark_chat_read(
        &self,
        chat_id: ObjectId,
        user_id: ObjectId,
    ) -> anyhow::Result<BulkUpdateResponse> {
        let mut state = self.state();
        let mut result = BulkUpdateResponse {
            matched_count: 0,
            modified_count: 0,
        };

        for message in state.messages.iter_mut().filter(|m| m.chat == chat_id) {
            result.matched_count += 1;

            if !message.read_by.contains(&user_id) {
                message.read_by.push(user_id);
                result.modified_count += 1;
            }
        }

        Ok(result)
    }

    async fn insert_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        self.state().notifications.push(notification.clone());

        Ok(())
    }

    async fn upsert_notification(
        &self,
        notification: &Notification,
    ) -> anyhow::Result<Notification> {
        let mut state = self.state();

        let existing = state.notifications.iter_mut().find(|existing| {
            existing.recipient_id == notification.recipient_id
                && existing.sender_id == notification.sender_id
                && existing.blog_id == notification.blog_id
                && existing.kind == notification.kind
        });

        match existing {
            Some(existing) => {
                existing.message = notification.message.clone();
                existing.is_read = false;
                existing.updated_at = notification.updated_at;

                Ok(existing.clone())
            }
            None => {
                state.notifications.push(notification.clone());

                Ok(notification.clone())
            }
        }
    }

    async fn find_notification(&self, id: ObjectId) -> anyhow::Result<Option<Notification>> {
        Ok(self
            .state()
            .notifications
            .iter()
            .find(|notification| notification.id == id)
            .cloned())
    }

    async fn notifications_for_user(
        &self,
        user_id: ObjectId,
    ) -> anyhow::Result<Vec<Notification>> {
        // reversed first so equal timestamps come out newest-inserted first
        let mut notifications: Vec<Notification> = self
            .state()
            .notifications
            .iter()
            .rev()
            .filter(|notification| notification.recipient_id == user_id)
            .cloned()
            .collect();

        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(notifications)
    }

    async fn mark_notification_read(&self, id: ObjectId) -> anyhow::Result<Option<Notification>> {
        let mut state = self.state();

        Ok(state
            .notifications
            .iter_mut()
            .find(|notification| notification.id == id)
            .map(|notification| {
                notification.is_read = true;
                notification.updated_at = DateTime::now();
                notification.clone()
            }))
    }

    async fn mark_all_notifications_read(
        &self,
        user_id: ObjectId,
    ) -> anyhow::Result<BulkUpdateResponse> {
        let mut state = self.state();
        let now = DateTime::now();
        let mut modified = 0;

        for notification in state
            .notifications
            .iter_mut()
            .filter(|n| n.recipient_id == user_id && !n.is_read)
        {
            notification.is_read = true;
            notification.updated_at = now;
            modified += 1;
        }

        Ok(BulkUpdateResponse {
            matched_count: modified,
            modified_count: modified,
        })
    }

    async fn unread_notification_count(&self, user_id: ObjectId) -> anyhow::Result<u64> {
        Ok(self
            .state()
            .notifications
            .iter()
            .filter(|n| n.recipient_id == user_id && !n.is_read)
            .count() as u64)
    }

    async fn delete_read_notifications(&self, user_id: ObjectId) -> anyhow::Result<u64> {
        let mut state = self.state();
        let before = state.notifications.len();

        state
            .notifications
            .retain(|n| !(n.recipient_id == user_id && n.is_read));

        Ok((before - state.notifications.len()) as u64)
    }
}
