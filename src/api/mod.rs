use actix_web::{web, HttpResponse, Responder};
use mongodb::bson::oid::ObjectId;
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    jwt::JwtAuth,
    realtime::WebsocketServerHandle,
    store::Store,
};

pub mod chat;
pub mod message;
pub mod notification;
pub mod websocket;

/// Parses a required hex id, naming the field in the validation error.
pub fn parse_id(field: &str, value: Option<&str>) -> AppResult<ObjectId> {
    let value = value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::validation(format!("{field} is required")))?;

    ObjectId::parse_str(value).map_err(|_| AppError::validation(format!("{field} is not a valid id")))
}

/// Non-blank text field; the original value is kept, only checked trimmed.
pub fn required_text(field: &str, value: Option<String>) -> AppResult<String> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::validation(format!("{field} is required")))
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| AppError::validation(err.to_string()).into())
}

/// Routes under `/api`, all behind the bearer token check.
pub fn config_wrapper(jwt_auth: &JwtAuth) -> impl Fn(&mut web::ServiceConfig) {
    let jwt_auth = jwt_auth.clone();

    move |cfg: &mut web::ServiceConfig| {
        cfg.service(
            web::scope("/api")
                .wrap(jwt_auth.clone())
                .app_data(json_config())
                .service(web::scope("/messages").configure(message::config))
                .service(web::scope("/chats").configure(chat::config))
                .service(web::scope("/notifications").configure(notification::config)),
        );
    }
}

async fn health(
    db: web::Data<dyn Store>,
    ws_server: web::Data<WebsocketServerHandle>,
) -> impl Responder {
    match ws_server.stats().await {
        Ok(stats) => HttpResponse::Ok().json(json!({
            "status": "ok",
            "store": db.backend(),
            "connections": stats.connections,
            "users": stats.users,
            "rooms": stats.rooms,
        })),
        Err(err) => HttpResponse::ServiceUnavailable().json(json!({
            "status": "degraded",
            "store": db.backend(),
            "error": err.to_string(),
        })),
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .service(web::scope("/ws").configure(websocket::config));
}
