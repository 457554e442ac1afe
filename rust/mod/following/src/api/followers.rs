use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use usergraph_core::{ListResult, ServiceError};

use crate::engine::FollowingEngine;
use crate::model::{FollowPair, Follower, OutboxStats, Outcome};

type EngineState = Arc<FollowingEngine>;

pub fn router(engine: Arc<FollowingEngine>) -> Router {
    Router::new()
        .route("/followers", post(create_follower))
        .route("/users/{id}/followers", get(followers_of))
        .route("/users/{id}/following", get(following_of))
        .route(
            "/users/{id}/following/{following_id}",
            delete(remove_following),
        )
        .route("/outbox", get(outbox_stats))
        .route("/outbox/@purge", post(purge_outbox))
        .with_state(engine)
}

async fn create_follower(
    State(engine): State<EngineState>,
    Json(body): Json<FollowPair>,
) -> Result<(StatusCode, Json<Outcome<i64>>), ServiceError> {
    let outcome = engine.create_follower(body.follower_id, body.following_id)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn followers_of(
    State(engine): State<EngineState>,
    Path(id): Path<i64>,
) -> Result<Json<ListResult<Follower>>, ServiceError> {
    Ok(Json(ListResult::new(engine.get_followers(id)?)))
}

async fn following_of(
    State(engine): State<EngineState>,
    Path(id): Path<i64>,
) -> Result<Json<ListResult<Follower>>, ServiceError> {
    Ok(Json(ListResult::new(engine.get_following(id)?)))
}

async fn remove_following(
    State(engine): State<EngineState>,
    Path((id, following_id)): Path<(i64, i64)>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let outcome = engine.remove_following(id, following_id)?;
    Ok(Json(serde_json::json!({ "removed": outcome.primary })))
}

async fn outbox_stats(
    State(engine): State<EngineState>,
) -> Result<Json<OutboxStats>, ServiceError> {
    Ok(Json(engine.outbox_stats()?))
}

async fn purge_outbox(
    State(engine): State<EngineState>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let removed = engine.purge_delivered()?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}
