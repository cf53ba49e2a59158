use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use shared::models::user::UserSummary;

/// Projection of the account documents owned by the main application.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub pic: Option<String>,
}

impl From<User> for UserSummary {
    fn from(value: User) -> Self {
        UserSummary {
            id: value.id,
            name: value.name,
            email: value.email,
            pic: value.pic,
        }
    }
}
