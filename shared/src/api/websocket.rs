use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::{
    models::{message::MessagePopulated, notification::NotificationSafe},
    serde_helpers::object_id,
};

/// Events sent by clients over `/ws`.
///
/// Frames look like `{"event": "join:chat", "data": "<chat id>"}`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "auth")]
    Auth(AuthPayload),
    #[serde(rename = "join:chat")]
    JoinChat(String),
    #[serde(rename = "leave:chat")]
    LeaveChat(String),
    #[serde(rename = "typing:start")]
    TypingStart(String),
    #[serde(rename = "typing:end")]
    TypingEnd(String),
    #[serde(rename = "message:send")]
    SendMessage(crate::api::message::CreateRequest),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub token: String,
}

/// Events pushed by the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connected")]
    Connected(ConnectedPayload),
    #[serde(rename = "joined:chat")]
    JoinedChat(String),
    #[serde(rename = "left:chat")]
    LeftChat(String),
    #[serde(rename = "message:new")]
    MessageNew(MessagePopulated),
    #[serde(rename = "typing:start")]
    TypingStart(TypingPayload),
    #[serde(rename = "typing:end")]
    TypingEnd(TypingPayload),
    #[serde(rename = "notification:new")]
    NotificationNew(NotificationSafe),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            code,
            message: message.into(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    #[serde(with = "object_id")]
    pub user_id: ObjectId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(with = "object_id")]
    pub chat_id: ObjectId,
    #[serde(with = "object_id")]
    pub user_id: ObjectId,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    BadRequest,
    NotFound,
    Forbidden,
    LimitExceeded,
    Internal,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}
