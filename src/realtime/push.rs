use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use shared::{api::websocket::ServerEvent, serde_helpers::object_id};
use thiserror::Error;
use tracing::warn;

use super::registry::ConnId;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection {0} is closed")]
    Closed(ConnId),

    #[error("outbound queue of connection {0} is full")]
    Full(ConnId),

    #[error("realtime server is not running")]
    ServerGone,

    #[error("failed to publish event: {0}")]
    Publish(String),
}

/// Who a pushed event is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum PushTarget {
    /// Every handle joined to the chat's room.
    Room(#[serde(with = "object_id")] ObjectId),
    /// Every handle of the user.
    User(#[serde(with = "object_id")] ObjectId),
}

/// Best-effort server-to-client delivery.
///
/// Implementations only enqueue; they never wait on a client. `except` skips
/// one originating handle.
pub trait Push: Send + Sync {
    fn push(
        &self,
        target: PushTarget,
        event: ServerEvent,
        except: Option<ConnId>,
    ) -> Result<(), DeliveryError>;

    /// Takes every handle of `user_id` out of the chat's room, e.g. after the
    /// user was removed from the chat.
    fn evict(&self, user_id: ObjectId, chat_id: ObjectId) -> Result<(), DeliveryError>;
}

/// Pushes and logs a failure instead of returning it. Used after a durable
/// write, where a failed push must never fail the request.
pub fn deliver(push: &dyn Push, target: PushTarget, event: ServerEvent, except: Option<ConnId>) {
    if let Err(err) = push.push(target, event, except) {
        warn!("push to {target:?} failed: {err}");
    }
}

/// Evicts and logs a failure instead of returning it.
pub fn revoke_room(push: &dyn Push, user_id: ObjectId, chat_id: ObjectId) {
    if let Err(err) = push.evict(user_id, chat_id) {
        warn!("evicting user {user_id} from {chat_id} failed: {err}");
    }
}
