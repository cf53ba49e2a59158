use futures_util::StreamExt;
use mongodb::bson::oid::ObjectId;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use shared::{api::websocket::ServerEvent, serde_helpers::object_id};
use tokio::sync::mpsc::{self, unbounded_channel};
use tracing::{info, warn};
use uuid::Uuid;

use crate::realtime::{
    deliver, revoke_room, ConnId, DeliveryError, Push, PushTarget, WebsocketServerHandle,
};

/// Relays pushes between nodes over one Redis pub/sub channel.
pub struct RedisHandler {
    client: Client,
    channel: String,
    node_id: Uuid,
    ws_server: WebsocketServerHandle,
    msg_rx: mpsc::UnboundedReceiver<RedisSyncMessage>,
}

/// Multi-node [`Push`]: delivers to this node's handles, then publishes so the
/// other nodes deliver to theirs.
#[derive(Clone)]
pub struct RedisHandle {
    node_id: Uuid,
    ws_server: WebsocketServerHandle,
    msg_tx: mpsc::UnboundedSender<RedisSyncMessage>,
}

impl Push for RedisHandle {
    fn push(
        &self,
        target: PushTarget,
        event: ServerEvent,
        except: Option<ConnId>,
    ) -> Result<(), DeliveryError> {
        self.ws_server.push(target, event.clone(), except)?;

        self.publish(SyncCommand::Push {
            target,
            event,
            except,
        })
    }

    fn evict(&self, user_id: ObjectId, chat_id: ObjectId) -> Result<(), DeliveryError> {
        self.ws_server.evict(user_id, chat_id)?;

        self.publish(SyncCommand::Evict { user_id, chat_id })
    }
}

impl RedisHandle {
    fn publish(&self, command: SyncCommand) -> Result<(), DeliveryError> {
        self.msg_tx
            .send(RedisSyncMessage {
                origin: self.node_id,
                command,
            })
            .map_err(|_| DeliveryError::Publish("redis handler stopped".to_string()))
    }
}

/// What the other nodes replay on their own registries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncCommand {
    Push {
        target: PushTarget,
        event: ServerEvent,
        except: Option<ConnId>,
    },
    Evict {
        #[serde(with = "object_id")]
        user_id: ObjectId,
        #[serde(with = "object_id")]
        chat_id: ObjectId,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedisSyncMessage {
    pub origin: Uuid,
    pub command: SyncCommand,
}

impl RedisHandler {
    pub fn new(
        url: &str,
        channel: String,
        ws_server: WebsocketServerHandle,
    ) -> anyhow::Result<(Self, RedisHandle)> {
        let (msg_tx, msg_rx) = unbounded_channel();
        let node_id = Uuid::new_v4();

        let client = redis::Client::open(url)?;

        Ok((
            Self {
                client,
                channel,
                node_id,
                ws_server: ws_server.clone(),
                msg_rx,
            },
            RedisHandle {
                node_id,
                ws_server,
                msg_tx,
            },
        ))
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let RedisHandler {
            client,
            channel,
            node_id,
            ws_server,
            mut msg_rx,
        } = self;

        let (mut sink, mut stream) = client.get_async_pubsub().await?.split();
        let mut con = client.get_multiplexed_async_connection().await?;

        sink.subscribe(channel.as_str()).await?;

        info!("node {node_id} relaying realtime events on {channel}");

        loop {
            tokio::select! {
                outgoing = msg_rx.recv() => {
                    let Some(msg) = outgoing else {
                        break;
                    };

                    match serde_json::to_string(&msg) {
                        Ok(payload) => {
                            if let Err(err) = con.publish::<_, _, ()>(channel.as_str(), payload).await {
                                warn!("failed to publish realtime event: {err}");
                            }
                        }
                        Err(err) => warn!("failed to encode realtime event: {err}"),
                    }
                }

                incoming = stream.next() => {
                    let Some(msg) = incoming else {
                        anyhow::bail!("redis subscription to {channel} ended");
                    };

                    relay_incoming(node_id, &ws_server, msg);
                }
            }
        }

        Ok(())
    }
}

fn relay_incoming(node_id: Uuid, ws_server: &WebsocketServerHandle, msg: redis::Msg) {
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(err) => {
            warn!("unreadable realtime payload: {err}");
            return;
        }
    };

    match serde_json::from_str::<RedisSyncMessage>(&payload) {
        // already delivered locally before publishing
        Ok(sync) if sync.origin == node_id => {}
        Ok(sync) => replay(ws_server, sync.command),
        Err(err) => warn!("malformed realtime payload: {err}"),
    }
}

fn replay(ws_server: &WebsocketServerHandle, command: SyncCommand) {
    match command {
        SyncCommand::Push {
            target,
            event,
            except,
        } => deliver(ws_server, target, event, except),
        SyncCommand::Evict { user_id, chat_id } => revoke_room(ws_server, user_id, chat_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::{Limits, WebsocketServer};

    #[actix_web::test]
    async fn pushes_are_delivered_locally_and_queued_for_publishing() {
        let (server, ws_server) = WebsocketServer::new(Limits {
            max_handles_per_user: 2,
            max_rooms_per_connection: 2,
        });
        actix_web::rt::spawn(server.run());

        let (mut handler, handle) =
            RedisHandler::new("redis://127.0.0.1/", "test".into(), ws_server.clone()).unwrap();

        let user = ObjectId::new();
        let (tx, mut rx) = mpsc::channel(4);
        ws_server.connect(user, tx).await.unwrap();

        let event = ServerEvent::JoinedChat("c".into());
        handle
            .push(PushTarget::User(user), event.clone(), None)
            .unwrap();

        assert_eq!(rx.recv().await, Some(event.clone()));

        let queued = handler.msg_rx.recv().await.unwrap();
        assert_eq!(queued.origin, handle.node_id);
        assert_eq!(
            queued.command,
            SyncCommand::Push {
                target: PushTarget::User(user),
                event,
                except: None,
            }
        );

        let wire = serde_json::to_string(&queued).unwrap();
        let back: RedisSyncMessage = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.command, queued.command);
    }

    #[actix_web::test]
    async fn evictions_apply_locally_and_replay_on_other_nodes() {
        let (server, ws_server) = WebsocketServer::new(Limits {
            max_handles_per_user: 2,
            max_rooms_per_connection: 2,
        });
        actix_web::rt::spawn(server.run());

        let (mut handler, handle) =
            RedisHandler::new("redis://127.0.0.1/", "test".into(), ws_server.clone()).unwrap();

        let (user, chat) = (ObjectId::new(), ObjectId::new());
        let (tx, mut rx) = mpsc::channel(4);
        let conn = ws_server.connect(user, tx).await.unwrap();
        ws_server.join(conn, chat).await.unwrap();

        handle.evict(user, chat).unwrap();

        assert_eq!(rx.recv().await, Some(ServerEvent::LeftChat(chat.to_hex())));
        assert_eq!(ws_server.stats().await.unwrap().rooms, 0);

        let queued = handler.msg_rx.recv().await.unwrap();
        assert_eq!(
            queued.command,
            SyncCommand::Evict {
                user_id: user,
                chat_id: chat
            }
        );

        // a message from another node evicts here too
        ws_server.join(conn, chat).await.unwrap();
        let wire = serde_json::to_string(&RedisSyncMessage {
            origin: Uuid::new_v4(),
            command: queued.command,
        })
        .unwrap();
        let remote: RedisSyncMessage = serde_json::from_str(&wire).unwrap();
        replay(&ws_server, remote.command);

        assert_eq!(rx.recv().await, Some(ServerEvent::LeftChat(chat.to_hex())));
        assert_eq!(ws_server.stats().await.unwrap().rooms, 0);
    }
}
