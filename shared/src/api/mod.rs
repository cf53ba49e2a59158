use serde::{Deserialize, Serialize};

pub mod chat;
pub mod message;
pub mod notification;
pub mod user;
pub mod websocket;

/// Result of an update applied to many documents at once.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateResponse {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteResponse {
    pub deleted_count: u64,
}
