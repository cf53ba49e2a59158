use actix_web::{web, HttpResponse, Responder};
use mongodb::bson::oid::ObjectId;
use shared::{
    api::chat::{AccessRequest, CreateGroupRequest, MemberRequest, RenameRequest},
    models::chat::ChatPopulated,
};

use crate::{
    error::{AppError, AppResult},
    jwt::AuthUser,
    models::chat::Chat,
    populate,
    realtime::{revoke_room, Push},
    store::Store,
};

use super::{parse_id, required_text};

/// A group needs the creator plus at least two others.
const MIN_GROUP_INVITEES: usize = 2;

async fn ensure_user_exists(db: &dyn Store, user_id: ObjectId) -> AppResult<()> {
    if db.find_users(&[user_id]).await?.is_empty() {
        return Err(AppError::not_found("user not found"));
    }

    Ok(())
}

async fn group_chat(db: &dyn Store, chat_id: ObjectId) -> AppResult<Chat> {
    let chat = db
        .find_chat(chat_id)
        .await?
        .ok_or_else(|| AppError::not_found("chat not found"))?;

    if !chat.is_group_chat {
        return Err(AppError::validation("not a group chat"));
    }

    Ok(chat)
}

/// Returns the 1:1 chat between the two users, creating it on first contact.
pub async fn access(
    db: &dyn Store,
    user_id: ObjectId,
    request: AccessRequest,
) -> AppResult<ChatPopulated> {
    let other = parse_id("userId", request.user_id.as_deref())?;

    if other == user_id {
        return Err(AppError::validation("cannot start a chat with yourself"));
    }

    if let Some(chat) = db.find_direct_chat(user_id, other).await? {
        return Ok(populate::chat(db, &chat).await?);
    }

    ensure_user_exists(db, other).await?;

    let chat = Chat::direct(user_id, other);
    db.insert_chat(&chat).await?;

    Ok(populate::chat(db, &chat).await?)
}

pub async fn create_group(
    db: &dyn Store,
    admin: ObjectId,
    request: CreateGroupRequest,
) -> AppResult<ChatPopulated> {
    let name = required_text("name", request.name)?;
    let raw_users = request
        .users
        .ok_or_else(|| AppError::validation("users is required"))?;

    let mut invitees = Vec::with_capacity(raw_users.len());
    for raw in &raw_users {
        let id = parse_id("users", Some(raw))?;

        if id != admin && !invitees.contains(&id) {
            invitees.push(id);
        }
    }

    if invitees.len() < MIN_GROUP_INVITEES {
        return Err(AppError::validation(
            "more than 2 users are required to form a group chat",
        ));
    }

    let known = db.find_users(&invitees).await?;
    if known.len() != invitees.len() {
        return Err(AppError::not_found("user not found"));
    }

    let chat = Chat::group(name.trim().to_string(), admin, invitees);
    db.insert_chat(&chat).await?;

    Ok(populate::chat(db, &chat).await?)
}

pub async fn rename(
    db: &dyn Store,
    user_id: ObjectId,
    request: RenameRequest,
) -> AppResult<ChatPopulated> {
    let chat_id = parse_id("chatId", request.chat_id.as_deref())?;
    let name = required_text("chatName", request.chat_name)?;

    let chat = group_chat(db, chat_id).await?;
    if !chat.is_admin(&user_id) {
        return Err(AppError::forbidden("only the group admin can rename the chat"));
    }

    let chat = db
        .rename_chat(chat_id, name.trim())
        .await?
        .ok_or_else(|| AppError::not_found("chat not found"))?;

    Ok(populate::chat(db, &chat).await?)
}

pub async fn add_member(
    db: &dyn Store,
    user_id: ObjectId,
    request: MemberRequest,
) -> AppResult<ChatPopulated> {
    let chat_id = parse_id("chatId", request.chat_id.as_deref())?;
    let member = parse_id("userId", request.user_id.as_deref())?;

    let chat = group_chat(db, chat_id).await?;
    if !chat.is_admin(&user_id) {
        return Err(AppError::forbidden("only the group admin can add members"));
    }

    ensure_user_exists(db, member).await?;

    let chat = db
        .add_chat_member(chat_id, member)
        .await?
        .ok_or_else(|| AppError::not_found("chat not found"))?;

    Ok(populate::chat(db, &chat).await?)
}

/// The admin removes anyone but themself; members may remove themselves.
/// The removed user's live handles leave the chat room at once.
pub async fn remove_member(
    db: &dyn Store,
    push: &dyn Push,
    user_id: ObjectId,
    request: MemberRequest,
) -> AppResult<ChatPopulated> {
    let chat_id = parse_id("chatId", request.chat_id.as_deref())?;
    let member = parse_id("userId", request.user_id.as_deref())?;

    let chat = group_chat(db, chat_id).await?;
    if !chat.is_admin(&user_id) && member != user_id {
        return Err(AppError::forbidden("only the group admin can remove members"));
    }

    if !chat.has_member(&member) {
        return Err(AppError::not_found("user is not a member of this chat"));
    }

    // keeps `users` non-empty and the admin pointer meaningful
    if chat.is_admin(&member) {
        return Err(AppError::validation("the group admin cannot leave the group"));
    }

    let chat = db
        .remove_chat_member(chat_id, member)
        .await?
        .ok_or_else(|| AppError::not_found("chat not found"))?;

    revoke_room(push, member, chat_id);

    Ok(populate::chat(db, &chat).await?)
}

async fn access_chat(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    request: web::Json<AccessRequest>,
) -> AppResult<impl Responder> {
    Ok(web::Json(
        access(db.get_ref(), user.id, request.into_inner()).await?,
    ))
}

async fn fetch_chats(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
) -> AppResult<impl Responder> {
    let chats = db.chats_for_user(user.id).await?;

    Ok(web::Json(populate::chats(db.get_ref(), &chats).await?))
}

async fn create_group_chat(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    request: web::Json<CreateGroupRequest>,
) -> AppResult<impl Responder> {
    let chat = create_group(db.get_ref(), user.id, request.into_inner()).await?;

    Ok(HttpResponse::Created().json(chat))
}

async fn rename_group(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    request: web::Json<RenameRequest>,
) -> AppResult<impl Responder> {
    Ok(web::Json(
        rename(db.get_ref(), user.id, request.into_inner()).await?,
    ))
}

async fn add_to_group(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    request: web::Json<MemberRequest>,
) -> AppResult<impl Responder> {
    Ok(web::Json(
        add_member(db.get_ref(), user.id, request.into_inner()).await?,
    ))
}

async fn remove_from_group(
    db: web::Data<dyn Store>,
    push: web::Data<dyn Push>,
    user: web::ReqData<AuthUser>,
    request: web::Json<MemberRequest>,
) -> AppResult<impl Responder> {
    Ok(web::Json(
        remove_member(
            db.get_ref(),
            push.get_ref(),
            user.id,
            request.into_inner(),
        )
        .await?,
    ))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(access_chat))
        .route("", web::get().to(fetch_chats))
        .route("/group", web::post().to(create_group_chat))
        .route("/rename", web::put().to(rename_group))
        .route("/groupadd", web::put().to(add_to_group))
        .route("/groupremove", web::put().to(remove_from_group));
}
