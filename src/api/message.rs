use actix_web::{web, Responder};
use mongodb::bson::oid::ObjectId;
use shared::{
    api::{message::CreateRequest, websocket::ServerEvent, BulkUpdateResponse},
    models::message::MessagePopulated,
};
use tracing::debug;

use crate::{
    error::{AppError, AppResult},
    jwt::AuthUser,
    models::{chat::Chat, message::Message},
    populate,
    realtime::{deliver, Push, PushTarget},
    store::Store,
};

use super::{parse_id, required_text};

/// Loads a chat the user belongs to.
pub async fn member_chat(db: &dyn Store, user_id: ObjectId, chat_id: ObjectId) -> AppResult<Chat> {
    let chat = db
        .find_chat(chat_id)
        .await?
        .ok_or_else(|| AppError::not_found("chat not found"))?;

    if !chat.has_member(&user_id) {
        return Err(AppError::forbidden("not a member of this chat"));
    }

    Ok(chat)
}

/// Persists a message, advances the chat's latest message and pushes
/// `message:new` to the chat room. The push happens only after both writes
/// and its failure never fails the send.
pub async fn send(
    db: &dyn Store,
    push: &dyn Push,
    sender_id: ObjectId,
    request: CreateRequest,
) -> AppResult<MessagePopulated> {
    let chat_id = parse_id("chatId", request.chat_id.as_deref());
    let content = required_text("content", request.content);
    let (chat_id, content) = (chat_id?, content?);

    let mut chat = member_chat(db, sender_id, chat_id).await?;

    let message = Message::new(sender_id, chat_id, content);

    db.insert_message(&message).await?;
    db.set_latest_message(chat_id, message.id, message.created_at)
        .await?;

    chat.latest_message = Some(message.id);
    chat.updated_at = message.created_at;

    let populated = populate::message(db, &chat, message).await?;

    debug!("message {} stored in chat {chat_id}", populated.id);

    deliver(
        push,
        PushTarget::Room(chat_id),
        ServerEvent::MessageNew(populated.clone()),
        None,
    );

    Ok(populated)
}

pub async fn all_messages(
    db: &dyn Store,
    user_id: ObjectId,
    chat_id: ObjectId,
) -> AppResult<Vec<MessagePopulated>> {
    let chat = member_chat(db, user_id, chat_id).await?;
    let messages = db.messages_for_chat(chat_id).await?;

    Ok(populate::messages(db, &chat, messages).await?)
}

async fn create(
    db: web::Data<dyn Store>,
    push: web::Data<dyn Push>,
    user: web::ReqData<AuthUser>,
    request: web::Json<CreateRequest>,
) -> AppResult<impl Responder> {
    let message = send(db.get_ref(), push.get_ref(), user.id, request.into_inner()).await?;

    Ok(web::Json(message))
}

async fn list(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    chat_id: web::Path<String>,
) -> AppResult<impl Responder> {
    let chat_id = parse_id("chatId", Some(chat_id.as_str()))?;

    Ok(web::Json(all_messages(db.get_ref(), user.id, chat_id).await?))
}

async fn mark_read(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    chat_id: web::Path<String>,
) -> AppResult<web::Json<BulkUpdateResponse>> {
    let chat_id = parse_id("chatId", Some(chat_id.as_str()))?;

    member_chat(db.get_ref(), user.id, chat_id).await?;

    Ok(web::Json(db.mark_chat_read(chat_id, user.id).await?))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(create))
        .route("/{chat_id}", web::get().to(list))
        .route("/{chat_id}/read", web::patch().to(mark_read));
}
