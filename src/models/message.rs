use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub sender_id: ObjectId,
    pub content: String,
    pub chat: ObjectId,
    /// Only ever grows; the sender is always the first reader.
    pub read_by: Vec<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Message {
    pub fn new(sender_id: ObjectId, chat: ObjectId, content: String) -> Self {
        let now = DateTime::now();

        Message {
            id: ObjectId::new(),
            sender_id,
            content,
            chat,
            read_by: vec![sender_id],
            created_at: now,
            updated_at: now,
        }
    }
}
