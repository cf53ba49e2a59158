use serde::{Deserialize, Serialize};

/// Body of `POST /api/messages` and of the `message:send` event.
///
/// Both fields are optional on the wire so a missing field is reported as a
/// validation error instead of a deserialization failure.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}
