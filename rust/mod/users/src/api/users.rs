use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};

use usergraph_core::{ListResult, ServiceError};

use crate::api::AppState;
use crate::model::{BlockedUser, CreateUser, NotificationSettings, SearchParams, User};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(search_users).post(create_user))
        .route("/@idp/{idp_id}", get(get_by_identity_provider))
        .route("/@username/{username}", get(get_by_username))
        .route("/@email/{email}", get(get_by_email))
        .route("/{id}", get(get_user).patch(update_user))
        .route("/{id}/blocked", get(get_blocked_users))
        .route(
            "/{id}/blocked/{blocked_id}",
            put(block_user).delete(unblock_user),
        )
        .route(
            "/{id}/notifications",
            get(get_notifications).put(set_notifications),
        )
}

async fn search_users(
    State(svc): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ListResult<User>>, ServiceError> {
    let users = svc.search_users(params.q.as_deref().unwrap_or_default())?;
    Ok(Json(ListResult::new(users)))
}

async fn create_user(
    State(svc): State<AppState>,
    Json(input): Json<CreateUser>,
) -> Result<(StatusCode, Json<User>), ServiceError> {
    let user = svc.create_user(input)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(svc): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ServiceError> {
    Ok(Json(svc.get_user(id)?))
}

async fn get_by_identity_provider(
    State(svc): State<AppState>,
    Path(idp_id): Path<String>,
) -> Result<Json<User>, ServiceError> {
    Ok(Json(svc.get_by_identity_provider_id(&idp_id)?))
}

async fn get_by_username(
    State(svc): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<User>, ServiceError> {
    Ok(Json(svc.get_by_username(&username)?))
}

async fn get_by_email(
    State(svc): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<User>, ServiceError> {
    Ok(Json(svc.get_by_email(&email)?))
}

async fn update_user(
    State(svc): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<User>, ServiceError> {
    Ok(Json(svc.update_user(id, patch)?))
}

async fn get_blocked_users(
    State(svc): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ListResult<BlockedUser>>, ServiceError> {
    Ok(Json(ListResult::new(svc.get_blocked_users(id)?)))
}

async fn block_user(
    State(svc): State<AppState>,
    Path((id, blocked_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ServiceError> {
    svc.block_user(id, blocked_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unblock_user(
    State(svc): State<AppState>,
    Path((id, blocked_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ServiceError> {
    svc.unblock_user(id, blocked_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_notifications(
    State(svc): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<NotificationSettings>, ServiceError> {
    Ok(Json(svc.get_notification_settings(id)?))
}

async fn set_notifications(
    State(svc): State<AppState>,
    Path(id): Path<i64>,
    Json(settings): Json<NotificationSettings>,
) -> Result<Json<NotificationSettings>, ServiceError> {
    Ok(Json(svc.set_notification_settings(id, settings)?))
}
