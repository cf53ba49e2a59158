use mongodb::bson::oid::ObjectId;
use shared::api::websocket::ServerEvent;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::{
    push::{DeliveryError, Push, PushTarget},
    registry::{ConnId, Limits, RegistryError, RegistryStats, SocketRegistry},
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("realtime server is not running")]
    ServerGone,
}

enum Command {
    Connect {
        user_id: ObjectId,
        conn_tx: mpsc::Sender<ServerEvent>,
        res_tx: oneshot::Sender<Result<ConnId, RegistryError>>,
    },

    Disconnect {
        conn: ConnId,
    },

    Join {
        conn: ConnId,
        chat_id: ObjectId,
        res_tx: oneshot::Sender<Result<bool, RegistryError>>,
    },

    Leave {
        conn: ConnId,
        chat_id: ObjectId,
        res_tx: oneshot::Sender<bool>,
    },

    Push {
        target: PushTarget,
        event: ServerEvent,
        except: Option<ConnId>,
    },

    Evict {
        user_id: ObjectId,
        chat_id: ObjectId,
    },

    Stats {
        res_tx: oneshot::Sender<RegistryStats>,
    },
}

/// Owns the socket registry. Every registry mutation and every push is a
/// command processed in arrival order, so pushes for one chat leave in the
/// order their requests finished persisting.
pub struct WebsocketServer {
    registry: SocketRegistry,

    cmd_rx: mpsc::UnboundedReceiver<Command>,
}

impl WebsocketServer {
    pub fn new(limits: Limits) -> (Self, WebsocketServerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        (
            Self {
                registry: SocketRegistry::new(limits),
                cmd_rx,
            },
            WebsocketServerHandle { cmd_tx },
        )
    }

    fn push(&self, target: PushTarget, event: ServerEvent, except: Option<ConnId>) {
        let handles = match target {
            PushTarget::Room(chat_id) => self.registry.handles_in_room(&chat_id),
            PushTarget::User(user_id) => self.registry.handles_for(&user_id),
        };

        for (conn_id, handle) in handles {
            if Some(conn_id) == except {
                continue;
            }

            // one broken handle must not stop the others
            if let Err(err) = handle.send(conn_id, event.clone()) {
                debug!("dropping event for {conn_id}: {err}");
            }
        }
    }

    /// Drops the user's handles from the room and tells each one with a
    /// `left:chat` event.
    fn evict(&mut self, user_id: ObjectId, chat_id: ObjectId) {
        let evicted = self.registry.evict(&user_id, &chat_id);

        if evicted.is_empty() {
            return;
        }

        debug!("evicted {} handle(s) of user {user_id} from {chat_id}", evicted.len());

        let event = ServerEvent::LeftChat(chat_id.to_hex());

        for (conn_id, handle) in self.registry.handles_for(&user_id) {
            if !evicted.contains(&conn_id) {
                continue;
            }

            if let Err(err) = handle.send(conn_id, event.clone()) {
                debug!("dropping eviction notice for {conn_id}: {err}");
            }
        }
    }

    pub async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Command::Connect {
                    user_id,
                    conn_tx,
                    res_tx,
                } => {
                    let res = self.registry.register(user_id, conn_tx);

                    if let Ok(conn_id) = &res {
                        debug!("connection {conn_id} registered for user {user_id}");
                    }

                    let _ = res_tx.send(res);
                }

                Command::Disconnect { conn } => {
                    if let Some(user_id) = self.registry.unregister(conn) {
                        debug!("connection {conn} of user {user_id} unregistered");
                    }
                }

                Command::Join {
                    conn,
                    chat_id,
                    res_tx,
                } => {
                    let _ = res_tx.send(self.registry.join(conn, chat_id));
                }

                Command::Leave {
                    conn,
                    chat_id,
                    res_tx,
                } => {
                    let _ = res_tx.send(self.registry.leave(conn, &chat_id));
                }

                Command::Push {
                    target,
                    event,
                    except,
                } => self.push(target, event, except),

                Command::Evict { user_id, chat_id } => self.evict(user_id, chat_id),

                Command::Stats { res_tx } => {
                    let _ = res_tx.send(self.registry.stats());
                }
            }
        }

        info!("realtime server stopped: all handles dropped");
    }
}

#[derive(Clone)]
pub struct WebsocketServerHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl WebsocketServerHandle {
    pub async fn connect(
        &self,
        user_id: ObjectId,
        conn_tx: mpsc::Sender<ServerEvent>,
    ) -> Result<ConnId, GatewayError> {
        let (res_tx, res_rx) = oneshot::channel();

        self.cmd_tx
            .send(Command::Connect {
                user_id,
                conn_tx,
                res_tx,
            })
            .map_err(|_| GatewayError::ServerGone)?;

        Ok(res_rx.await.map_err(|_| GatewayError::ServerGone)??)
    }

    pub fn disconnect(&self, conn: ConnId) {
        if self.cmd_tx.send(Command::Disconnect { conn }).is_err() {
            debug!("disconnect of {conn} after realtime server stopped");
        }
    }

    pub async fn join(&self, conn: ConnId, chat_id: ObjectId) -> Result<bool, GatewayError> {
        let (res_tx, res_rx) = oneshot::channel();

        self.cmd_tx
            .send(Command::Join {
                conn,
                chat_id,
                res_tx,
            })
            .map_err(|_| GatewayError::ServerGone)?;

        Ok(res_rx.await.map_err(|_| GatewayError::ServerGone)??)
    }

    pub async fn leave(&self, conn: ConnId, chat_id: ObjectId) -> Result<bool, GatewayError> {
        let (res_tx, res_rx) = oneshot::channel();

        self.cmd_tx
            .send(Command::Leave {
                conn,
                chat_id,
                res_tx,
            })
            .map_err(|_| GatewayError::ServerGone)?;

        res_rx.await.map_err(|_| GatewayError::ServerGone)
    }

    pub async fn stats(&self) -> Result<RegistryStats, GatewayError> {
        let (res_tx, res_rx) = oneshot::channel();

        self.cmd_tx
            .send(Command::Stats { res_tx })
            .map_err(|_| GatewayError::ServerGone)?;

        res_rx.await.map_err(|_| GatewayError::ServerGone)
    }
}

/// Single-node delivery: straight into this process's registry.
impl Push for WebsocketServerHandle {
    fn push(
        &self,
        target: PushTarget,
        event: ServerEvent,
        except: Option<ConnId>,
    ) -> Result<(), DeliveryError> {
        self.cmd_tx
            .send(Command::Push {
                target,
                event,
                except,
            })
            .map_err(|_| DeliveryError::ServerGone)
    }

    fn evict(&self, user_id: ObjectId, chat_id: ObjectId) -> Result<(), DeliveryError> {
        self.cmd_tx
            .send(Command::Evict { user_id, chat_id })
            .map_err(|_| DeliveryError::ServerGone)
    }
}
