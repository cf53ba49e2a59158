//! Ownership map of live websocket handles.
//!
//! Tracks which handles belong to which user and which handles joined which
//! chat room. The registry lives inside the single [`WebsocketServer`] task and
//! is never shared, so it holds no locks. It only knows the handles of this
//! process; cross-node delivery goes through the Redis push.
//!
//! [`WebsocketServer`]: super::server::WebsocketServer

use std::collections::{HashMap, HashSet};

use mongodb::bson::oid::ObjectId;
use shared::api::websocket::ServerEvent;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::push::DeliveryError;

pub type ConnId = Uuid;

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_handles_per_user: usize,
    pub max_rooms_per_connection: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("user already has {0} live connections")]
    TooManyHandles(usize),

    #[error("connection already joined {0} chats")]
    TooManyRooms(usize),

    #[error("unknown connection {0}")]
    UnknownHandle(ConnId),
}

pub struct Handle {
    pub user_id: ObjectId,
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<ObjectId>,
}

impl Handle {
    /// Queues an event without waiting. A full or closed queue is reported,
    /// never retried.
    pub fn send(&self, conn_id: ConnId, event: ServerEvent) -> Result<(), DeliveryError> {
        self.tx.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Full(conn_id),
            TrySendError::Closed(_) => DeliveryError::Closed(conn_id),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub connections: usize,
    pub users: usize,
    pub rooms: usize,
}

pub struct SocketRegistry {
    limits: Limits,
    handles: HashMap<ConnId, Handle>,
    users: HashMap<ObjectId, HashSet<ConnId>>,
    rooms: HashMap<ObjectId, HashSet<ConnId>>,
}

impl SocketRegistry {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            handles: HashMap::new(),
            users: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        user_id: ObjectId,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Result<ConnId, RegistryError> {
        let conns = self.users.entry(user_id).or_default();

        if conns.len() >= self.limits.max_handles_per_user {
            let count = conns.len();

            if conns.is_empty() {
                self.users.remove(&user_id);
            }

            return Err(RegistryError::TooManyHandles(count));
        }

        let id = Uuid::new_v4();

        conns.insert(id);
        self.handles.insert(
            id,
            Handle {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );

        Ok(id)
    }

    /// Drops the handle from its user and from every room it joined. Returns
    /// the owning user, or `None` if the handle was already gone.
    pub fn unregister(&mut self, conn_id: ConnId) -> Option<ObjectId> {
        let handle = self.handles.remove(&conn_id)?;

        if let Some(conns) = self.users.get_mut(&handle.user_id) {
            conns.remove(&conn_id);

            if conns.is_empty() {
                self.users.remove(&handle.user_id);
            }
        }

        for chat_id in &handle.rooms {
            self.remove_from_room(chat_id, conn_id);
        }

        Some(handle.user_id)
    }

    pub fn handles_for(&self, user_id: &ObjectId) -> Vec<(ConnId, &Handle)> {
        self.users
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.handles.get(id).map(|handle| (*id, handle)))
            .collect()
    }

    /// Returns `false` when the handle was already in the room.
    pub fn join(&mut self, conn_id: ConnId, chat_id: ObjectId) -> Result<bool, RegistryError> {
        let handle = self
            .handles
            .get_mut(&conn_id)
            .ok_or(RegistryError::UnknownHandle(conn_id))?;

        if handle.rooms.contains(&chat_id) {
            return Ok(false);
        }

        if handle.rooms.len() >= self.limits.max_rooms_per_connection {
            return Err(RegistryError::TooManyRooms(handle.rooms.len()));
        }

        handle.rooms.insert(chat_id);
        self.rooms.entry(chat_id).or_default().insert(conn_id);

        Ok(true)
    }

    /// Returns `false` when the handle was not in the room.
    pub fn leave(&mut self, conn_id: ConnId, chat_id: &ObjectId) -> bool {
        let left = self
            .handles
            .get_mut(&conn_id)
            .map(|handle| handle.rooms.remove(chat_id))
            .unwrap_or(false);

        if left {
            self.remove_from_room(chat_id, conn_id);
        }

        left
    }

    pub fn handles_in_room(&self, chat_id: &ObjectId) -> Vec<(ConnId, &Handle)> {
        self.rooms
            .get(chat_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.handles.get(id).map(|handle| (*id, handle)))
            .collect()
    }

    pub fn rooms_of(&self, conn_id: ConnId) -> Option<&HashSet<ObjectId>> {
        self.handles.get(&conn_id).map(|handle| &handle.rooms)
    }

    /// Takes every handle of `user_id` out of the room. Returns the handles
    /// that were in it.
    pub fn evict(&mut self, user_id: &ObjectId, chat_id: &ObjectId) -> Vec<ConnId> {
        let evicted: Vec<ConnId> = self
            .users
            .get(user_id)
            .into_iter()
            .flatten()
            .copied()
            .filter(|conn_id| {
                self.rooms_of(*conn_id)
                    .is_some_and(|rooms| rooms.contains(chat_id))
            })
            .collect();

        for conn_id in &evicted {
            self.leave(*conn_id, chat_id);
        }

        evicted
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.handles.len(),
            users: self.users.len(),
            rooms: self.rooms.len(),
        }
    }

    fn remove_from_room(&mut self, chat_id: &ObjectId, conn_id: ConnId) {
        if let Some(members) = self.rooms.get_mut(chat_id) {
            members.remove(&conn_id);

            if members.is_empty() {
                self.rooms.remove(chat_id);
            }
        }
    }
}
