use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

use crate::serde_helpers::{datetime, object_id, option_object_id};

use super::user::UserSummary;

/// A chat with its members expanded to [`UserSummary`].
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatPopulated {
    #[serde(rename = "_id", with = "object_id")]
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    pub is_group_chat: bool,
    pub users: Vec<UserSummary>,
    #[serde(default, with = "option_object_id")]
    pub latest_message: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_admin: Option<UserSummary>,
    #[serde(with = "datetime")]
    pub created_at: DateTime,
    #[serde(with = "datetime")]
    pub updated_at: DateTime,
}
