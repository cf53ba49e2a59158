use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

use crate::serde_helpers::{datetime, object_id, object_ids};

use super::{chat::ChatPopulated, user::UserSummary};

/// The shape pushed as `message:new` and returned by the message routes.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePopulated {
    #[serde(rename = "_id", with = "object_id")]
    pub id: ObjectId,
    #[serde(rename = "senderId")]
    pub sender: UserSummary,
    pub content: String,
    pub chat: ChatPopulated,
    #[serde(with = "object_ids")]
    pub read_by: Vec<ObjectId>,
    #[serde(with = "datetime")]
    pub created_at: DateTime,
    #[serde(with = "datetime")]
    pub updated_at: DateTime,
}
