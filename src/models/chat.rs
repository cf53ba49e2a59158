use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    pub is_group_chat: bool,
    pub users: Vec<ObjectId>,
    #[serde(default)]
    pub latest_message: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_admin: Option<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Chat {
    pub fn direct(a: ObjectId, b: ObjectId) -> Self {
        let now = DateTime::now();

        Chat {
            id: ObjectId::new(),
            chat_name: None,
            is_group_chat: false,
            users: vec![a, b],
            latest_message: None,
            group_admin: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn group(name: String, admin: ObjectId, mut users: Vec<ObjectId>) -> Self {
        let now = DateTime::now();

        if !users.contains(&admin) {
            users.push(admin);
        }

        Chat {
            id: ObjectId::new(),
            chat_name: Some(name),
            is_group_chat: true,
            users,
            latest_message: None,
            group_admin: Some(admin),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_member(&self, user_id: &ObjectId) -> bool {
        self.users.contains(user_id)
    }

    pub fn is_admin(&self, user_id: &ObjectId) -> bool {
        self.is_group_chat && self.group_admin.as_ref() == Some(user_id)
    }
}
