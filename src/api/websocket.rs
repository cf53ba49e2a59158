use std::{collections::HashSet, ops::ControlFlow, pin::pin, time::Instant};

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{AggregatedMessage, AggregatedMessageStream, CloseCode, CloseReason, Session};
use futures_util::StreamExt as _;
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;
use shared::api::websocket::{
    ClientEvent, ConnectedPayload, ErrorCode, ServerEvent, TypingPayload,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{interval, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    config::RealtimeConfig,
    error::AppError,
    jwt::{bearer_token, AuthUser, JwtVerifier},
    realtime::{
        deliver, ConnId, GatewayError, Push, PushTarget, RegistryError, WebsocketServerHandle,
    },
    store::Store,
};

use super::{message, parse_id};

const MAX_FRAME_SIZE: usize = 64 * 1024;
const MAX_CONTINUATION_SIZE: usize = 1024 * 1024;

/// Everything a session needs from the application.
#[derive(Clone)]
pub struct SessionContext {
    pub db: web::Data<dyn Store>,
    pub push: web::Data<dyn Push>,
    pub ws_server: WebsocketServerHandle,
    pub jwt: JwtVerifier,
    pub realtime: RealtimeConfig,
}

#[derive(Clone, Copy)]
enum ConnState {
    Connecting,
    Authenticated { user_id: ObjectId, conn_id: ConnId },
}

fn policy_close(description: &str) -> CloseReason {
    CloseReason {
        code: CloseCode::Policy,
        description: Some(description.to_string()),
    }
}

fn app_error_event(err: AppError) -> ServerEvent {
    err.log();

    ServerEvent::error(err.ws_code(), err.to_string())
}

fn gateway_error_event(err: GatewayError) -> ServerEvent {
    let code = match err {
        GatewayError::Registry(RegistryError::TooManyHandles(_))
        | GatewayError::Registry(RegistryError::TooManyRooms(_)) => ErrorCode::LimitExceeded,
        _ => ErrorCode::Internal,
    };

    ServerEvent::error(code, err.to_string())
}

/// Protocol state of one websocket connection.
///
/// Replies share the connection's outbound queue with pushed events, so the
/// socket writer is the only place frames are produced.
pub struct Connection {
    ctx: SessionContext,
    conn_tx: mpsc::Sender<ServerEvent>,
    state: ConnState,
    rooms: HashSet<ObjectId>,
}

impl Connection {
    pub fn new(ctx: SessionContext, conn_tx: mpsc::Sender<ServerEvent>) -> Self {
        Connection {
            ctx,
            conn_tx,
            state: ConnState::Connecting,
            rooms: HashSet::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, ConnState::Authenticated { .. })
    }

    fn reply(&self, event: ServerEvent) {
        match self.conn_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("outbound queue full, dropping reply"),
            Err(TrySendError::Closed(_)) => debug!("reply after connection closed"),
        }
    }

    /// Registers the handle and greets the client. Too many handles for the
    /// user closes the connection.
    pub async fn authenticate(&mut self, user: AuthUser) -> ControlFlow<CloseReason> {
        match self.ctx.ws_server.connect(user.id, self.conn_tx.clone()).await {
            Ok(conn_id) => {
                info!("user {} connected as {conn_id}", user.id);

                self.state = ConnState::Authenticated {
                    user_id: user.id,
                    conn_id,
                };
                self.reply(ServerEvent::Connected(ConnectedPayload { user_id: user.id }));

                ControlFlow::Continue(())
            }
            Err(err) => {
                warn!("refusing connection of user {}: {err}", user.id);

                self.reply(gateway_error_event(err));

                ControlFlow::Break(policy_close("connection refused"))
            }
        }
    }

    pub async fn handle_text(&mut self, text: &str) -> ControlFlow<CloseReason> {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(err) => {
                self.reply(ServerEvent::error(
                    ErrorCode::BadRequest,
                    format!("malformed event: {err}"),
                ));

                ControlFlow::Continue(())
            }
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) -> ControlFlow<CloseReason> {
        let (user_id, conn_id) = match self.state {
            ConnState::Authenticated { user_id, conn_id } => (user_id, conn_id),
            ConnState::Connecting => return self.handle_connecting(event).await,
        };

        let reply = match event {
            ClientEvent::Auth(_) => {
                ServerEvent::error(ErrorCode::BadRequest, "already authenticated")
            }

            ClientEvent::JoinChat(chat_id) => {
                match join(&self.ctx, user_id, conn_id, &chat_id).await {
                    Ok(chat_id) => {
                        self.rooms.insert(chat_id);
                        ServerEvent::JoinedChat(chat_id.to_hex())
                    }
                    Err(event) => event,
                }
            }

            ClientEvent::LeaveChat(chat_id) => match parse_id("chatId", Some(&chat_id)) {
                Ok(chat_id) => match self.ctx.ws_server.leave(conn_id, chat_id).await {
                    Ok(_) => {
                        self.rooms.remove(&chat_id);
                        ServerEvent::LeftChat(chat_id.to_hex())
                    }
                    Err(err) => gateway_error_event(err),
                },
                Err(err) => app_error_event(err),
            },

            ClientEvent::TypingStart(chat_id) | ClientEvent::TypingEnd(chat_id)
                if parse_id("chatId", Some(&chat_id))
                    .map(|id| !self.rooms.contains(&id))
                    .unwrap_or(false) =>
            {
                ServerEvent::error(ErrorCode::Forbidden, "join the chat first")
            }

            ClientEvent::TypingStart(chat_id) => {
                match typing(self.ctx.push.get_ref(), user_id, conn_id, &chat_id, true) {
                    Ok(()) => return ControlFlow::Continue(()),
                    Err(err) => app_error_event(err),
                }
            }

            ClientEvent::TypingEnd(chat_id) => {
                match typing(self.ctx.push.get_ref(), user_id, conn_id, &chat_id, false) {
                    Ok(()) => return ControlFlow::Continue(()),
                    Err(err) => app_error_event(err),
                }
            }

            ClientEvent::SendMessage(request) => {
                match message::send(self.ctx.db.get_ref(), self.ctx.push.get_ref(), user_id, request)
                    .await
                {
                    // room members already get it through the push
                    Ok(message) if self.rooms.contains(&message.chat.id) => {
                        return ControlFlow::Continue(())
                    }
                    Ok(message) => ServerEvent::MessageNew(message),
                    Err(err) => app_error_event(err),
                }
            }
        };

        self.reply(reply);

        ControlFlow::Continue(())
    }

    async fn handle_connecting(&mut self, event: ClientEvent) -> ControlFlow<CloseReason> {
        match event {
            ClientEvent::Auth(payload) => match self.ctx.jwt.verify(&payload.token) {
                Ok(user) => self.authenticate(user).await,
                Err(err) => {
                    self.reply(app_error_event(err));

                    ControlFlow::Break(policy_close("invalid token"))
                }
            },
            _ => {
                self.reply(ServerEvent::error(
                    ErrorCode::Unauthenticated,
                    "authenticate first",
                ));

                ControlFlow::Continue(())
            }
        }
    }

    /// Tracks room changes the server made on its own, before `event` is
    /// written to the socket.
    pub fn observe(&mut self, event: &ServerEvent) {
        if let ServerEvent::LeftChat(chat_id) = event {
            if let Ok(chat_id) = ObjectId::parse_str(chat_id) {
                self.rooms.remove(&chat_id);
            }
        }
    }

    /// Releases the registry handle, if one was taken.
    pub fn shutdown(self) {
        if let ConnState::Authenticated { user_id, conn_id } = self.state
        {
            info!("user {user_id} disconnected ({conn_id})");

            self.ctx.ws_server.disconnect(conn_id);
        }
    }
}

async fn join(
    ctx: &SessionContext,
    user_id: ObjectId,
    conn_id: ConnId,
    chat_id: &str,
) -> Result<ObjectId, ServerEvent> {
    let chat_id = parse_id("chatId", Some(chat_id)).map_err(app_error_event)?;

    message::member_chat(ctx.db.get_ref(), user_id, chat_id)
        .await
        .map_err(app_error_event)?;

    ctx.ws_server
        .join(conn_id, chat_id)
        .await
        .map_err(gateway_error_event)?;

    Ok(chat_id)
}

fn typing(
    push: &dyn Push,
    user_id: ObjectId,
    conn_id: ConnId,
    chat_id: &str,
    started: bool,
) -> Result<(), AppError> {
    let chat_id = parse_id("chatId", Some(chat_id))?;
    let payload = TypingPayload { chat_id, user_id };

    let event = if started {
        ServerEvent::TypingStart(payload)
    } else {
        ServerEvent::TypingEnd(payload)
    };

    deliver(push, PushTarget::Room(chat_id), event, Some(conn_id));

    Ok(())
}

async fn run_session(
    mut session: Session,
    msg_stream: AggregatedMessageStream,
    ctx: SessionContext,
    user: Option<AuthUser>,
) {
    let realtime = ctx.realtime;

    let (conn_tx, mut conn_rx) = mpsc::channel(realtime.outbound_buffer.max(1));
    let mut conn = Connection::new(ctx, conn_tx);

    let mut msg_stream = pin!(msg_stream);
    let mut auth_deadline = pin!(sleep(realtime.auth_grace));
    let mut heartbeat = interval(realtime.heartbeat_interval);
    let mut last_heartbeat = Instant::now();

    let greeting = match user {
        Some(user) => conn.authenticate(user).await,
        None => ControlFlow::Continue(()),
    };

    let close_reason = match greeting {
        ControlFlow::Break(reason) => Some(reason),
        ControlFlow::Continue(()) => loop {
            let flow = tokio::select! {
                msg = msg_stream.next() => match msg {
                    Some(Ok(msg)) => {
                        last_heartbeat = Instant::now();

                        match msg {
                            AggregatedMessage::Text(text) => conn.handle_text(&text).await,

                            AggregatedMessage::Binary(_) => {
                                conn.reply(ServerEvent::error(
                                    ErrorCode::BadRequest,
                                    "binary frames are not supported",
                                ));
                                ControlFlow::Continue(())
                            }

                            AggregatedMessage::Ping(bytes) => {
                                if session.pong(&bytes).await.is_err() {
                                    break None;
                                }
                                ControlFlow::Continue(())
                            }

                            AggregatedMessage::Pong(_) => ControlFlow::Continue(()),

                            AggregatedMessage::Close(reason) => {
                                debug!("client closed: {reason:?}");
                                break None;
                            }
                        }
                    }

                    Some(Err(err)) => {
                        debug!("websocket protocol error: {err}");
                        break None;
                    }

                    None => break None,
                },

                Some(event) = conn_rx.recv() => {
                    conn.observe(&event);

                    match serde_json::to_string(&event) {
                        Ok(payload) => {
                            if session.text(payload).await.is_err() {
                                break None;
                            }
                        }
                        Err(err) => warn!("failed to serialize outbound event: {err}"),
                    }
                    ControlFlow::Continue(())
                }

                _ = auth_deadline.as_mut(), if !conn.is_authenticated() => {
                    debug!("closing connection that never authenticated");
                    ControlFlow::Break(policy_close("authentication timeout"))
                }

                _ = heartbeat.tick() => {
                    if Instant::now().duration_since(last_heartbeat) > realtime.client_timeout {
                        debug!("client heartbeat timed out");
                        break None;
                    }

                    if session.ping(b"").await.is_err() {
                        break None;
                    }
                    ControlFlow::Continue(())
                }
            };

            if let ControlFlow::Break(reason) = flow {
                break Some(reason);
            }
        },
    };

    // flush replies queued before a policy close, e.g. the error explaining it
    while let Ok(event) = conn_rx.try_recv() {
        let Ok(payload) = serde_json::to_string(&event) else {
            continue;
        };

        if session.text(payload).await.is_err() {
            break;
        }
    }

    conn.shutdown();

    let _ = session.close(close_reason).await;
}

#[derive(Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

/// Upgrades `GET /ws`. A token given at upgrade time must be valid; without
/// one the client has to send an `auth` event within the grace period.
async fn websocket(
    req: HttpRequest,
    body: web::Payload,
    query: web::Query<ConnectQuery>,
    db: web::Data<dyn Store>,
    push: web::Data<dyn Push>,
    ws_server: web::Data<WebsocketServerHandle>,
    jwt: web::Data<JwtVerifier>,
    realtime: web::Data<RealtimeConfig>,
) -> actix_web::Result<HttpResponse> {
    let user = match bearer_token(&req).or_else(|| query.into_inner().token) {
        Some(token) => Some(jwt.verify(&token)?),
        None => None,
    };

    let (res, session, msg_stream) = actix_ws::handle(&req, body)?;

    let msg_stream = msg_stream
        .max_frame_size(MAX_FRAME_SIZE)
        .aggregate_continuations()
        .max_continuation_size(MAX_CONTINUATION_SIZE);

    let ctx = SessionContext {
        db,
        push,
        ws_server: ws_server.get_ref().clone(),
        jwt: jwt.get_ref().clone(),
        realtime: *realtime.get_ref(),
    };

    actix_web::rt::spawn(run_session(session, msg_stream, ctx, user));

    Ok(res)
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::get().to(websocket));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RealtimeConfig,
        test_support::{mint_token, TestContext},
    };
    use std::{fmt::Debug, time::Duration};

    use actix_web::{http::StatusCode, test};
    use awc::ws::{Frame, Message};
    use futures_util::{Sink, SinkExt as _, Stream, StreamExt as _};
    use shared::api::{chat::MemberRequest, message::CreateRequest, websocket::AuthPayload};

    fn session_context(ctx: &TestContext) -> SessionContext {
        SessionContext {
            db: ctx.store_data(),
            push: ctx.push_data(),
            ws_server: ctx.ws_server.clone(),
            jwt: ctx.jwt.clone(),
            realtime: ctx.realtime,
        }
    }

    async fn connected(
        ctx: &TestContext,
        user_id: ObjectId,
    ) -> (Connection, mpsc::Receiver<ServerEvent>) {
        let (tx, mut rx) = mpsc::channel(16);
        let mut conn = Connection::new(session_context(ctx), tx);

        assert!(conn.authenticate(AuthUser { id: user_id }).await.is_continue());
        assert_eq!(
            rx.recv().await,
            Some(ServerEvent::Connected(ConnectedPayload { user_id }))
        );

        (conn, rx)
    }

    fn error_code(event: Option<ServerEvent>) -> ErrorCode {
        match event {
            Some(ServerEvent::Error(payload)) => payload.code,
            other => panic!("expected an error event, got {other:?}"),
        }
    }

    /// Waits until the realtime server has processed everything sent so far.
    async fn settle(ctx: &TestContext) {
        ctx.ws_server.stats().await.unwrap();
    }

    /// Next frame from a client socket, skipping heartbeats.
    async fn next_frame<S, E>(socket: &mut S) -> Frame
    where
        S: Stream<Item = Result<Frame, E>> + Unpin,
        E: Debug,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("socket went quiet")
                .expect("socket ended")
                .unwrap();

            if !matches!(frame, Frame::Ping(_) | Frame::Pong(_)) {
                return frame;
            }
        }
    }

    async fn next_event<S, E>(socket: &mut S) -> ServerEvent
    where
        S: Stream<Item = Result<Frame, E>> + Unpin,
        E: Debug,
    {
        match next_frame(socket).await {
            Frame::Text(bytes) => serde_json::from_slice(&bytes).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    async fn next_close<S, E>(socket: &mut S) -> Option<CloseReason>
    where
        S: Stream<Item = Result<Frame, E>> + Unpin,
        E: Debug,
    {
        match next_frame(socket).await {
            Frame::Close(reason) => reason,
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    async fn send_event<S>(socket: &mut S, event: &ClientEvent)
    where
        S: Sink<Message> + Unpin,
        S::Error: Debug,
    {
        let text = serde_json::to_string(event).unwrap();
        socket.send(Message::Text(text.into())).await.unwrap();
    }

    /// Polls the registry until the session loop has caught up.
    async fn wait_for_connections(ctx: &TestContext, expected: usize) {
        for _ in 0..100 {
            if ctx.ws_server.stats().await.unwrap().connections == expected {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }

        panic!("expected {expected} connections");
    }

    fn remove_request(chat: ObjectId, user: ObjectId) -> MemberRequest {
        MemberRequest {
            chat_id: Some(chat.to_hex()),
            user_id: Some(user.to_hex()),
        }
    }

    #[actix_web::test]
    async fn invalid_upgrade_tokens_are_rejected_before_upgrade() {
        let ctx = TestContext::new();
        let app = crate::test_app!(ctx);

        let req = test::TestRequest::get().uri("/ws?token=garbage").to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::UNAUTHORIZED
        );

        let req = test::TestRequest::get()
            .uri("/ws")
            .insert_header(("Authorization", "Bearer garbage"))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[actix_web::test]
    async fn only_auth_is_accepted_before_authentication() {
        let ctx = TestContext::new();
        let (ana, ben) = (ctx.user("Ana"), ctx.user("Ben"));
        let chat = ctx.direct_chat(ana, ben).await;

        let (tx, mut rx) = mpsc::channel(16);
        let mut conn = Connection::new(session_context(&ctx), tx);

        let flow = conn.handle_event(ClientEvent::JoinChat(chat.to_hex())).await;
        assert!(flow.is_continue());
        assert_eq!(error_code(rx.recv().await), ErrorCode::Unauthenticated);
        assert!(!conn.is_authenticated());

        let flow = conn
            .handle_event(ClientEvent::Auth(AuthPayload {
                token: mint_token(ana),
            }))
            .await;
        assert!(flow.is_continue());
        assert!(conn.is_authenticated());
        assert_eq!(
            rx.recv().await,
            Some(ServerEvent::Connected(ConnectedPayload { user_id: ana }))
        );
    }

    #[actix_web::test]
    async fn a_bad_auth_event_closes_with_policy() {
        let ctx = TestContext::new();
        let (tx, mut rx) = mpsc::channel(16);
        let mut conn = Connection::new(session_context(&ctx), tx);

        let flow = conn
            .handle_event(ClientEvent::Auth(AuthPayload {
                token: "garbage".into(),
            }))
            .await;

        match flow {
            ControlFlow::Break(reason) => assert_eq!(reason.code, CloseCode::Policy),
            ControlFlow::Continue(()) => panic!("connection should close"),
        }
        assert_eq!(error_code(rx.recv().await), ErrorCode::Unauthenticated);
    }

    #[actix_web::test]
    async fn join_requires_membership() {
        let ctx = TestContext::new();
        let (ana, ben, eve) = (ctx.user("Ana"), ctx.user("Ben"), ctx.user("Eve"));
        let chat = ctx.direct_chat(ana, ben).await;

        let (mut conn, mut rx) = connected(&ctx, eve).await;

        conn.handle_event(ClientEvent::JoinChat(chat.to_hex())).await;
        assert_eq!(error_code(rx.recv().await), ErrorCode::Forbidden);

        conn.handle_event(ClientEvent::JoinChat(ObjectId::new().to_hex()))
            .await;
        assert_eq!(error_code(rx.recv().await), ErrorCode::NotFound);

        conn.handle_event(ClientEvent::JoinChat("C1".into())).await;
        assert_eq!(error_code(rx.recv().await), ErrorCode::BadRequest);

        assert_eq!(ctx.ws_server.stats().await.unwrap().rooms, 0);
    }

    #[actix_web::test]
    async fn typing_reaches_the_room_but_not_the_typist() {
        let ctx = TestContext::new();
        let (ana, ben) = (ctx.user("Ana"), ctx.user("Ben"));
        let chat = ctx.direct_chat(ana, ben).await;

        let (mut ana_conn, mut ana_rx) = connected(&ctx, ana).await;
        let (mut ben_conn, mut ben_rx) = connected(&ctx, ben).await;

        for (conn, rx) in [(&mut ana_conn, &mut ana_rx), (&mut ben_conn, &mut ben_rx)] {
            conn.handle_event(ClientEvent::JoinChat(chat.to_hex())).await;
            assert_eq!(rx.recv().await, Some(ServerEvent::JoinedChat(chat.to_hex())));
        }

        ana_conn
            .handle_event(ClientEvent::TypingStart(chat.to_hex()))
            .await;
        settle(&ctx).await;

        assert_eq!(
            ben_rx.try_recv().ok(),
            Some(ServerEvent::TypingStart(TypingPayload {
                chat_id: chat,
                user_id: ana
            }))
        );
        assert!(ana_rx.try_recv().is_err());
    }

    #[actix_web::test]
    async fn typing_outside_a_joined_room_is_refused() {
        let ctx = TestContext::new();
        let (ana, ben) = (ctx.user("Ana"), ctx.user("Ben"));
        let chat = ctx.direct_chat(ana, ben).await;

        let (mut conn, mut rx) = connected(&ctx, ana).await;

        conn.handle_event(ClientEvent::TypingEnd(chat.to_hex())).await;
        assert_eq!(error_code(rx.recv().await), ErrorCode::Forbidden);
    }

    #[actix_web::test]
    async fn leaving_stops_room_pushes() {
        let ctx = TestContext::new();
        let (ana, ben) = (ctx.user("Ana"), ctx.user("Ben"));
        let chat = ctx.direct_chat(ana, ben).await;

        let (mut conn, mut rx) = connected(&ctx, ben).await;
        conn.handle_event(ClientEvent::JoinChat(chat.to_hex())).await;
        rx.recv().await;
        conn.handle_event(ClientEvent::LeaveChat(chat.to_hex())).await;
        assert_eq!(rx.recv().await, Some(ServerEvent::LeftChat(chat.to_hex())));

        message::send(
            ctx.store.as_ref(),
            &ctx.ws_server,
            ana,
            CreateRequest {
                chat_id: Some(chat.to_hex()),
                content: Some("still there?".into()),
            },
        )
        .await
        .unwrap();
        settle(&ctx).await;

        assert!(rx.try_recv().is_err());
    }

    #[actix_web::test]
    async fn removed_members_stop_receiving_room_events() {
        let ctx = TestContext::new();
        let (ana, ben, cid) = (ctx.user("Ana"), ctx.user("Ben"), ctx.user("Cid"));
        let chat = ctx.group_chat("Supper club", ana, &[ben, cid]).await;

        let (mut ben_conn, mut ben_rx) = connected(&ctx, ben).await;
        ben_conn
            .handle_event(ClientEvent::JoinChat(chat.to_hex()))
            .await;
        assert_eq!(ben_rx.recv().await, Some(ServerEvent::JoinedChat(chat.to_hex())));

        crate::api::chat::remove_member(
            ctx.store.as_ref(),
            &ctx.ws_server,
            ana,
            remove_request(chat, ben),
        )
        .await
        .unwrap();

        message::send(
            ctx.store.as_ref(),
            &ctx.ws_server,
            ana,
            CreateRequest {
                chat_id: Some(chat.to_hex()),
                content: Some("secret".into()),
            },
        )
        .await
        .unwrap();
        settle(&ctx).await;

        let left = ben_rx.try_recv().unwrap();
        assert_eq!(left, ServerEvent::LeftChat(chat.to_hex()));
        assert!(ben_rx.try_recv().is_err());
        assert_eq!(ctx.ws_server.stats().await.unwrap().rooms, 0);

        // the session loop runs this before writing the frame
        ben_conn.observe(&left);
        assert!(!ben_conn.rooms.contains(&chat));

        ben_conn
            .handle_event(ClientEvent::TypingStart(chat.to_hex()))
            .await;
        assert_eq!(error_code(ben_rx.recv().await), ErrorCode::Forbidden);
    }

    #[actix_web::test]
    async fn message_send_over_the_socket_persists_and_fans_out() {
        let ctx = TestContext::new();
        let (ana, ben) = (ctx.user("Ana"), ctx.user("Ben"));
        let chat = ctx.direct_chat(ana, ben).await;

        let (mut ana_conn, mut ana_rx) = connected(&ctx, ana).await;
        let (mut ben_conn, mut ben_rx) = connected(&ctx, ben).await;
        ben_conn
            .handle_event(ClientEvent::JoinChat(chat.to_hex()))
            .await;
        ben_rx.recv().await;

        // not joined: the sender still gets its own message back
        ana_conn
            .handle_event(ClientEvent::SendMessage(CreateRequest {
                chat_id: Some(chat.to_hex()),
                content: Some("hello".into()),
            }))
            .await;

        match ana_rx.recv().await {
            Some(ServerEvent::MessageNew(message)) => assert_eq!(message.content, "hello"),
            other => panic!("expected message:new, got {other:?}"),
        }
        match ben_rx.recv().await {
            Some(ServerEvent::MessageNew(message)) => assert_eq!(message.sender.id, ana),
            other => panic!("expected message:new, got {other:?}"),
        }

        assert_eq!(ctx.store.messages_for_chat(chat).await.unwrap().len(), 1);

        ana_conn
            .handle_event(ClientEvent::SendMessage(CreateRequest {
                chat_id: Some(chat.to_hex()),
                content: None,
            }))
            .await;
        assert_eq!(error_code(ana_rx.recv().await), ErrorCode::BadRequest);
    }

    #[actix_web::test]
    async fn handle_limits_refuse_extra_connections() {
        let ctx = TestContext::with_realtime(RealtimeConfig {
            max_handles_per_user: 1,
            ..RealtimeConfig::default()
        });
        let ana = ctx.user("Ana");

        let (_first, _first_rx) = connected(&ctx, ana).await;

        let (tx, mut rx) = mpsc::channel(16);
        let mut second = Connection::new(session_context(&ctx), tx);

        assert!(second.authenticate(AuthUser { id: ana }).await.is_break());
        assert_eq!(error_code(rx.recv().await), ErrorCode::LimitExceeded);
    }

    #[actix_web::test]
    async fn malformed_frames_get_an_error_event() {
        let ctx = TestContext::new();
        let ana = ctx.user("Ana");
        let (mut conn, mut rx) = connected(&ctx, ana).await;

        assert!(conn.handle_text("{\"event\":\"dance\"}").await.is_continue());
        assert_eq!(error_code(rx.recv().await), ErrorCode::BadRequest);
    }

    #[actix_web::test]
    async fn shutdown_releases_the_handle() {
        let ctx = TestContext::new();
        let ana = ctx.user("Ana");
        let (conn, _rx) = connected(&ctx, ana).await;

        assert_eq!(ctx.ws_server.stats().await.unwrap().connections, 1);

        conn.shutdown();

        assert_eq!(ctx.ws_server.stats().await.unwrap().connections, 0);
    }

    #[actix_web::test]
    async fn token_at_upgrade_connects_and_client_close_unregisters() {
        let ctx = TestContext::new();
        let ana = ctx.user("Ana");
        let mut srv = ctx.serve();

        let mut socket = srv
            .ws_at(&format!("/ws?token={}", mint_token(ana)))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut socket).await,
            ServerEvent::Connected(ConnectedPayload { user_id: ana })
        );
        assert_eq!(ctx.ws_server.stats().await.unwrap().connections, 1);

        socket.send(Message::Close(None)).await.unwrap();

        wait_for_connections(&ctx, 0).await;
    }

    #[actix_web::test]
    async fn unauthenticated_sockets_are_closed_after_the_grace_period() {
        let ctx = TestContext::with_realtime(RealtimeConfig {
            auth_grace: Duration::from_millis(100),
            ..RealtimeConfig::default()
        });
        let mut srv = ctx.serve();

        let mut socket = srv.ws_at("/ws").await.unwrap();

        let reason = next_close(&mut socket).await.expect("close reason");
        assert_eq!(reason.code, CloseCode::Policy);
        assert_eq!(ctx.ws_server.stats().await.unwrap().connections, 0);
    }

    #[actix_web::test]
    async fn silent_clients_time_out_and_are_unregistered() {
        let ctx = TestContext::with_realtime(RealtimeConfig {
            heartbeat_interval: Duration::from_millis(50),
            client_timeout: Duration::from_millis(150),
            ..RealtimeConfig::default()
        });
        let ana = ctx.user("Ana");
        let mut srv = ctx.serve();

        let mut socket = srv
            .ws_at(&format!("/ws?token={}", mint_token(ana)))
            .await
            .unwrap();
        next_event(&mut socket).await;

        // pings go unanswered
        assert_eq!(next_close(&mut socket).await, None);

        wait_for_connections(&ctx, 0).await;
    }

    #[actix_web::test]
    async fn the_error_is_written_before_a_policy_close() {
        let ctx = TestContext::new();
        let mut srv = ctx.serve();

        let mut socket = srv.ws_at("/ws").await.unwrap();
        send_event(
            &mut socket,
            &ClientEvent::Auth(AuthPayload {
                token: "garbage".into(),
            }),
        )
        .await;

        assert_eq!(
            error_code(Some(next_event(&mut socket).await)),
            ErrorCode::Unauthenticated
        );

        let reason = next_close(&mut socket).await.expect("close reason");
        assert_eq!(reason.code, CloseCode::Policy);
    }

    #[actix_web::test]
    async fn a_removed_member_socket_leaves_the_room() {
        let ctx = TestContext::new();
        let (ana, ben, cid) = (ctx.user("Ana"), ctx.user("Ben"), ctx.user("Cid"));
        let chat = ctx.group_chat("Supper club", ana, &[ben, cid]).await;
        let mut srv = ctx.serve();

        let mut socket = srv
            .ws_at(&format!("/ws?token={}", mint_token(ben)))
            .await
            .unwrap();
        next_event(&mut socket).await;

        send_event(&mut socket, &ClientEvent::JoinChat(chat.to_hex())).await;
        assert_eq!(
            next_event(&mut socket).await,
            ServerEvent::JoinedChat(chat.to_hex())
        );

        crate::api::chat::remove_member(
            ctx.store.as_ref(),
            &ctx.ws_server,
            ana,
            remove_request(chat, ben),
        )
        .await
        .unwrap();
        message::send(
            ctx.store.as_ref(),
            &ctx.ws_server,
            ana,
            CreateRequest {
                chat_id: Some(chat.to_hex()),
                content: Some("secret".into()),
            },
        )
        .await
        .unwrap();

        assert_eq!(
            next_event(&mut socket).await,
            ServerEvent::LeftChat(chat.to_hex())
        );

        // a queued message:new would arrive before this reply
        send_event(&mut socket, &ClientEvent::TypingStart(chat.to_hex())).await;
        assert_eq!(
            error_code(Some(next_event(&mut socket).await)),
            ErrorCode::Forbidden
        );
    }
}
