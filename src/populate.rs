//! Assembly of the wire DTOs from stored documents.
//!
//! Each response shape has one constructor here, so the wire contract does
//! not drift with the storage models.

use std::collections::HashMap;

use mongodb::bson::oid::ObjectId;
use shared::models::{chat::ChatPopulated, message::MessagePopulated, user::UserSummary};

use crate::{
    models::{chat::Chat, message::Message},
    store::Store,
};

pub struct UserDirectory {
    users: HashMap<ObjectId, UserSummary>,
}

impl UserDirectory {
    pub async fn load(db: &dyn Store, ids: &[ObjectId]) -> anyhow::Result<Self> {
        let mut unique = ids.to_vec();
        unique.sort();
        unique.dedup();

        let users = db
            .find_users(&unique)
            .await?
            .into_iter()
            .map(|user| (user.id, UserSummary::from(user)))
            .collect();

        Ok(UserDirectory { users })
    }

    /// Accounts removed from the main application still render.
    pub fn summary(&self, id: &ObjectId) -> UserSummary {
        self.users.get(id).cloned().unwrap_or_else(|| UserSummary {
            id: *id,
            name: "Deleted user".to_string(),
            email: None,
            pic: None,
        })
    }

    pub fn chat(&self, chat: &Chat) -> ChatPopulated {
        ChatPopulated {
            id: chat.id,
            chat_name: chat.chat_name.clone(),
            is_group_chat: chat.is_group_chat,
            users: chat.users.iter().map(|id| self.summary(id)).collect(),
            latest_message: chat.latest_message,
            group_admin: chat
                .group_admin
                .filter(|_| chat.is_group_chat)
                .map(|id| self.summary(&id)),
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }

    pub fn message(&self, chat: &ChatPopulated, message: Message) -> MessagePopulated {
        MessagePopulated {
            id: message.id,
            sender: self.summary(&message.sender_id),
            content: message.content,
            chat: chat.clone(),
            read_by: message.read_by,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

fn chat_user_ids(chat: &Chat) -> Vec<ObjectId> {
    chat.users.iter().copied().chain(chat.group_admin).collect()
}

pub async fn chat(db: &dyn Store, chat: &Chat) -> anyhow::Result<ChatPopulated> {
    let directory = UserDirectory::load(db, &chat_user_ids(chat)).await?;

    Ok(directory.chat(chat))
}

pub async fn chats(db: &dyn Store, chats: &[Chat]) -> anyhow::Result<Vec<ChatPopulated>> {
    let ids: Vec<ObjectId> = chats.iter().flat_map(chat_user_ids).collect();
    let directory = UserDirectory::load(db, &ids).await?;

    Ok(chats.iter().map(|chat| directory.chat(chat)).collect())
}

pub async fn messages(
    db: &dyn Store,
    chat: &Chat,
    messages: Vec<Message>,
) -> anyhow::Result<Vec<MessagePopulated>> {
    // former members may still be senders
    let ids: Vec<ObjectId> = chat_user_ids(chat)
        .into_iter()
        .chain(messages.iter().map(|message| message.sender_id))
        .collect();
    let directory = UserDirectory::load(db, &ids).await?;
    let populated_chat = directory.chat(chat);

    Ok(messages
        .into_iter()
        .map(|message| directory.message(&populated_chat, message))
        .collect())
}

pub async fn message(
    db: &dyn Store,
    chat: &Chat,
    message: Message,
) -> anyhow::Result<MessagePopulated> {
    let mut populated = messages(db, chat, vec![message]).await?;

    populated
        .pop()
        .ok_or_else(|| anyhow::anyhow!("message vanished during population"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::MemoryStore, models::user::User};

    #[actix_web::test]
    async fn chats_expand_members_and_tolerate_missing_accounts() {
        let store = MemoryStore::new();
        let (known, gone) = (ObjectId::new(), ObjectId::new());
        store.insert_user(User {
            id: known,
            name: "Ana".into(),
            email: Some("ana@example.com".into()),
            pic: None,
        });

        let populated = chat(&store, &Chat::direct(known, gone)).await.unwrap();

        assert_eq!(populated.users[0].name, "Ana");
        assert_eq!(populated.users[1].id, gone);
        assert_eq!(populated.users[1].name, "Deleted user");
        assert!(populated.group_admin.is_none());
    }
}
