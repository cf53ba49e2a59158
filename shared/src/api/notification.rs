use serde::{Deserialize, Serialize};

use crate::models::notification::NotificationType;

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<NotificationType>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub blog_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadCountResponse {
    pub count: u64,
}
