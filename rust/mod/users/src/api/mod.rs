mod users;

use std::sync::Arc;

use axum::Router;

use crate::service::UsersService;

/// Shared application state.
pub type AppState = Arc<UsersService>;

/// Build the users API router.
///
/// Routes are relative; the server nests them under `/users`.
pub fn build_router(svc: Arc<UsersService>) -> Router {
    users::routes().with_state(svc)
}
