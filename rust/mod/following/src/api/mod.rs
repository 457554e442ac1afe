mod followers;
mod requests;

use std::sync::Arc;

use axum::Router;

use crate::engine::FollowingEngine;

/// Build the following module router.
///
/// Routes:
/// - `POST   /requests`                         : open a follow request
/// - `GET    /requests`                         : list requests
/// - `GET    /requests/{id}`                    : get request
/// - `PUT    /requests/{id}`                    : accept or reject
/// - `DELETE /requests/{id}`                    : cancel a pending request
/// - `GET    /users/{id}/requests`              : requests addressed to a user
/// - `POST   /followers`                        : follow directly
/// - `GET    /users/{id}/followers`             : who follows a user
/// - `GET    /users/{id}/following`             : whom a user follows
/// - `DELETE /users/{id}/following/{followingId}`: unfollow
/// - `GET    /outbox`                           : notification outbox counters
/// - `POST   /outbox/@purge`                    : drop delivered notifications
pub fn router(engine: Arc<FollowingEngine>) -> Router {
    Router::new()
        .merge(requests::router(Arc::clone(&engine)))
        .merge(followers::router(engine))
}
