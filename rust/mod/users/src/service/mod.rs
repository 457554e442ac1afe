pub mod blocking;
pub mod notifications;
pub mod schema;
pub mod user;

use std::sync::Arc;

use thiserror::Error;

use usergraph_core::{DirectoryUser, ServiceError, UserDirectory};
use usergraph_sql::{SQLError, SQLStore};

/// Users service error type.
#[derive(Debug, Error)]
pub enum UsersError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<SQLError> for UsersError {
    fn from(e: SQLError) -> Self {
        if e.is_constraint() {
            UsersError::Conflict(e.to_string())
        } else {
            UsersError::Storage(e.to_string())
        }
    }
}

impl From<UsersError> for ServiceError {
    fn from(e: UsersError) -> Self {
        match e {
            UsersError::NotFound(m) => ServiceError::NotFound(m),
            UsersError::Conflict(m) => ServiceError::Conflict(m),
            UsersError::Validation(m) => ServiceError::Validation(m),
            UsersError::Storage(m) => ServiceError::Storage(m),
            UsersError::Internal(m) => ServiceError::Internal(m),
        }
    }
}

/// The Users service. Owns user profiles, block lists and notification
/// preferences.
pub struct UsersService {
    pub(crate) sql: Arc<dyn SQLStore>,
}

impl UsersService {
    /// Create a new UsersService, initializing the DB schema.
    pub fn new(sql: Arc<dyn SQLStore>) -> Result<Arc<Self>, UsersError> {
        schema::init_schema(sql.as_ref())?;
        Ok(Arc::new(Self { sql }))
    }
}

impl UserDirectory for UsersService {
    fn get_by_id(&self, id: i64) -> Result<Option<DirectoryUser>, ServiceError> {
        let user = match self.get_user(id) {
            Ok(user) => user,
            Err(UsersError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let blocked = self.blocked_ids(id)?;
        Ok(Some(DirectoryUser {
            id: user.id,
            username: user.username,
            identity_provider_id: user.identity_provider_id,
            blocked,
            follow_notifications: user.notifications.follow_notifications,
        }))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::model::CreateUser;
    use usergraph_sql::SqliteStore;

    pub fn service() -> Arc<UsersService> {
        UsersService::new(Arc::new(SqliteStore::open_in_memory().unwrap())).unwrap()
    }

    pub fn input(username: &str) -> CreateUser {
        CreateUser {
            identity_provider_id: format!("auth0|{username}"),
            username: username.into(),
            first_name: String::new(),
            last_name: String::new(),
            email: format!("{username}@example.com"),
            date_of_birth: None,
            gender: None,
            phone_number: None,
        }
    }
}
