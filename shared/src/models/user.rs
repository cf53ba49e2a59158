use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::serde_helpers::object_id;

/// Minimal public profile embedded wherever a user is referenced.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct UserSummary {
    #[serde(rename = "_id", with = "object_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pic: Option<String>,
}
