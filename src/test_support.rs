use std::sync::Arc;

use actix_web::{http::header, web, App};
use jsonwebtoken::{encode, EncodingKey, Header};
use mongodb::bson::oid::ObjectId;
use shared::api::user::Claims;

use crate::{
    config::RealtimeConfig,
    jwt::{JwtAuth, JwtVerifier},
    memory::MemoryStore,
    models::{chat::Chat, user::User},
    realtime::{Limits, Push, WebsocketServer, WebsocketServerHandle},
    store::Store,
};

pub const SECRET: &str = "test-secret";

pub fn mint_token(user_id: ObjectId) -> String {
    encode(
        &Header::default(),
        &Claims {
            id: user_id.to_hex(),
            exp: 4_102_444_800,
        },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn bearer(user_id: ObjectId) -> (header::HeaderName, String) {
    (
        header::AUTHORIZATION,
        format!("Bearer {}", mint_token(user_id)),
    )
}

/// Memory store plus a running realtime server. Must be created inside the
/// actix test runtime.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub ws_server: WebsocketServerHandle,
    pub jwt: JwtVerifier,
    pub realtime: RealtimeConfig,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_realtime(RealtimeConfig::default())
    }

    pub fn with_realtime(realtime: RealtimeConfig) -> Self {
        let (server, ws_server) = WebsocketServer::new(Limits {
            max_handles_per_user: realtime.max_handles_per_user,
            max_rooms_per_connection: realtime.max_rooms_per_connection,
        });

        actix_web::rt::spawn(server.run());

        TestContext {
            store: Arc::new(MemoryStore::new()),
            ws_server,
            jwt: JwtVerifier::new(SECRET),
            realtime,
        }
    }

    pub fn user(&self, name: &str) -> ObjectId {
        let id = ObjectId::new();

        self.store.insert_user(User {
            id,
            name: name.to_string(),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            pic: None,
        });

        id
    }

    pub async fn direct_chat(&self, a: ObjectId, b: ObjectId) -> ObjectId {
        let chat = Chat::direct(a, b);
        self.store.insert_chat(&chat).await.unwrap();

        chat.id
    }

    pub async fn group_chat(&self, name: &str, admin: ObjectId, members: &[ObjectId]) -> ObjectId {
        let chat = Chat::group(name.to_string(), admin, members.to_vec());
        self.store.insert_chat(&chat).await.unwrap();

        chat.id
    }

    pub fn store_data(&self) -> web::Data<dyn Store> {
        web::Data::from(self.store.clone() as Arc<dyn Store>)
    }

    pub fn push_data(&self) -> web::Data<dyn Push> {
        web::Data::from(Arc::new(self.ws_server.clone()) as Arc<dyn Push>)
    }

    /// Serves the app on a real port, for tests that need an actual socket.
    /// The server runs on its own thread and shares this context's store and
    /// realtime server.
    pub fn serve(&self) -> actix_test::TestServer {
        let store = self.store_data();
        let push = self.push_data();
        let ws_server = web::Data::new(self.ws_server.clone());
        let jwt = self.jwt.clone();
        let realtime = web::Data::new(self.realtime);

        actix_test::start(move || {
            App::new()
                .app_data(store.clone())
                .app_data(push.clone())
                .app_data(ws_server.clone())
                .app_data(web::Data::new(jwt.clone()))
                .app_data(realtime.clone())
                .configure(crate::api::config_wrapper(&JwtAuth::new(jwt.clone())))
                .configure(crate::api::config)
        })
    }
}

/// Builds the service the way `main` does, backed by a [`TestContext`].
#[macro_export]
macro_rules! test_app {
    ($ctx:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data($ctx.store_data())
                .app_data($ctx.push_data())
                .app_data(actix_web::web::Data::new($ctx.ws_server.clone()))
                .app_data(actix_web::web::Data::new($ctx.jwt.clone()))
                .app_data(actix_web::web::Data::new($ctx.realtime))
                .configure($crate::api::config_wrapper(
                    &$crate::jwt::JwtAuth::new($ctx.jwt.clone()),
                ))
                .configure($crate::api::config),
        )
        .await
    };
}
