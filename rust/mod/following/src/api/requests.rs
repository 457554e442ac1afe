use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use usergraph_core::{ListResult, ServiceError};

use crate::engine::FollowingEngine;
use crate::model::{FollowPair, FollowRequest, FollowRequestView, Outcome, RequestUpdate};

type EngineState = Arc<FollowingEngine>;

pub fn router(engine: Arc<FollowingEngine>) -> Router {
    Router::new()
        .route("/requests", post(create_request).get(list_requests))
        .route(
            "/requests/{id}",
            get(get_request).put(update_request).delete(cancel_request),
        )
        .route("/users/{id}/requests", get(requests_for_user))
        .with_state(engine)
}

// ---------------------------------------------------------------------------
// POST /requests
// ---------------------------------------------------------------------------

async fn create_request(
    State(engine): State<EngineState>,
    Json(body): Json<FollowPair>,
) -> Result<(StatusCode, Json<Outcome<i64>>), ServiceError> {
    let outcome = engine.create_request(body.follower_id, body.following_id)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

// ---------------------------------------------------------------------------
// GET /requests
// ---------------------------------------------------------------------------

async fn list_requests(
    State(engine): State<EngineState>,
) -> Result<Json<ListResult<FollowRequest>>, ServiceError> {
    Ok(Json(ListResult::new(engine.get_requests()?)))
}

// ---------------------------------------------------------------------------
// GET /requests/{id}
// ---------------------------------------------------------------------------

async fn get_request(
    State(engine): State<EngineState>,
    Path(id): Path<i64>,
) -> Result<Json<FollowRequest>, ServiceError> {
    Ok(Json(engine.get_request(id)?))
}

// ---------------------------------------------------------------------------
// PUT /requests/{id}
// ---------------------------------------------------------------------------

async fn update_request(
    State(engine): State<EngineState>,
    Path(id): Path<i64>,
    Json(body): Json<RequestUpdate>,
) -> Result<Json<Outcome<FollowRequestView>>, ServiceError> {
    Ok(Json(engine.update_request(id, body)?))
}

// ---------------------------------------------------------------------------
// DELETE /requests/{id}
// ---------------------------------------------------------------------------

async fn cancel_request(
    State(engine): State<EngineState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServiceError> {
    engine.cancel_request(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// GET /users/{id}/requests
// ---------------------------------------------------------------------------

async fn requests_for_user(
    State(engine): State<EngineState>,
    Path(id): Path<i64>,
) -> Result<Json<ListResult<FollowRequest>>, ServiceError> {
    Ok(Json(ListResult::new(engine.get_requests_by_following_id(id)?)))
}
