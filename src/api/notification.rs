use actix_web::{web, HttpResponse, Responder};
use mongodb::bson::oid::ObjectId;
use shared::{
    api::{
        notification::{CreateRequest, UnreadCountResponse},
        websocket::ServerEvent,
        BulkDeleteResponse,
    },
    models::notification::{NotificationSafe, NotificationType},
};
use tracing::debug;

use crate::{
    error::{AppError, AppResult},
    jwt::AuthUser,
    models::notification::Notification,
    realtime::{deliver, Push, PushTarget},
    store::Store,
};

use super::{parse_id, required_text};

/// Records a like/comment notification for `recipient` and pushes it to their
/// handles. Acting on your own content notifies nobody.
pub async fn fan_out(
    db: &dyn Store,
    push: &dyn Push,
    actor: ObjectId,
    recipient: ObjectId,
    kind: NotificationType,
    message: String,
    blog_id: ObjectId,
) -> AppResult<Option<NotificationSafe>> {
    if actor == recipient {
        debug!("skipping self {kind} notification on blog {blog_id}");
        return Ok(None);
    }

    let notification = Notification::new(recipient, actor, kind, message, blog_id);

    let stored = match kind {
        NotificationType::Like => db.upsert_notification(&notification).await?,
        NotificationType::Comment => {
            db.insert_notification(&notification).await?;
            notification
        }
    };

    let safe = NotificationSafe::from(stored);

    deliver(
        push,
        PushTarget::User(recipient),
        ServerEvent::NotificationNew(safe.clone()),
        None,
    );

    Ok(Some(safe))
}

/// Notification lists belong to their recipient only.
fn ensure_self(user: &AuthUser, user_id: &str) -> AppResult<ObjectId> {
    let user_id = parse_id("userId", Some(user_id))?;

    if user_id != user.id {
        return Err(AppError::forbidden("cannot access another user's notifications"));
    }

    Ok(user_id)
}

/// Entry point for the Like and Comment services. The caller is the actor;
/// the recipient comes from the body and is not checked against any blog, so
/// the route must only be reachable with tokens of those trusted callers.
async fn create(
    db: web::Data<dyn Store>,
    push: web::Data<dyn Push>,
    user: web::ReqData<AuthUser>,
    request: web::Json<CreateRequest>,
) -> AppResult<HttpResponse> {
    let request = request.into_inner();

    let recipient = parse_id("recipientId", request.recipient_id.as_deref())?;
    let blog_id = parse_id("blogId", request.blog_id.as_deref())?;
    let kind = request
        .kind
        .ok_or_else(|| AppError::validation("type is required"))?;
    let message = required_text("message", request.message)?;

    if db.find_users(&[recipient]).await?.is_empty() {
        return Err(AppError::not_found("recipient not found"));
    }

    let created = fan_out(
        db.get_ref(),
        push.get_ref(),
        user.id,
        recipient,
        kind,
        message,
        blog_id,
    )
    .await?;

    Ok(match created {
        Some(notification) => HttpResponse::Created().json(notification),
        None => HttpResponse::NoContent().finish(),
    })
}

async fn list(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    user_id: web::Path<String>,
) -> AppResult<impl Responder> {
    let user_id = ensure_self(&user, &user_id)?;

    let notifications: Vec<NotificationSafe> = db
        .notifications_for_user(user_id)
        .await?
        .into_iter()
        .map(NotificationSafe::from)
        .collect();

    Ok(web::Json(notifications))
}

async fn unread_count(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    user_id: web::Path<String>,
) -> AppResult<web::Json<UnreadCountResponse>> {
    let user_id = ensure_self(&user, &user_id)?;
    let count = db.unread_notification_count(user_id).await?;

    Ok(web::Json(UnreadCountResponse { count }))
}

async fn mark_read(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    notification_id: web::Path<String>,
) -> AppResult<impl Responder> {
    let notification_id = parse_id("notificationId", Some(notification_id.as_str()))?;

    let notification = db
        .find_notification(notification_id)
        .await?
        .ok_or_else(|| AppError::not_found("notification not found"))?;

    if notification.recipient_id != user.id {
        return Err(AppError::forbidden("not the recipient of this notification"));
    }

    let updated = db
        .mark_notification_read(notification_id)
        .await?
        .ok_or_else(|| AppError::not_found("notification not found"))?;

    Ok(web::Json(NotificationSafe::from(updated)))
}

async fn read_all(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    user_id: web::Path<String>,
) -> AppResult<impl Responder> {
    let user_id = ensure_self(&user, &user_id)?;

    Ok(web::Json(db.mark_all_notifications_read(user_id).await?))
}

async fn delete_read(
    db: web::Data<dyn Store>,
    user: web::ReqData<AuthUser>,
    user_id: web::Path<String>,
) -> AppResult<web::Json<BulkDeleteResponse>> {
    let user_id = ensure_self(&user, &user_id)?;
    let deleted_count = db.delete_read_notifications(user_id).await?;

    Ok(web::Json(BulkDeleteResponse { deleted_count }))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(create))
        .route("/user/{user_id}", web::get().to(list))
        .route("/user/{user_id}/unread-count", web::get().to(unread_count))
        .route("/user/{user_id}/read-all", web::patch().to(read_all))
        .route("/user/{user_id}/read", web::delete().to(delete_read))
        .route("/{notification_id}/read", web::patch().to(mark_read));
}
