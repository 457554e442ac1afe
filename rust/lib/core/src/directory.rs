//! User lookup contract consumed by modules that do not own users.
//!
//! The following module only needs to resolve a numeric user id into a
//! display name, an identity-provider id and a few profile flags. It never
//! depends on the users module directly; the concrete directory is injected
//! at startup.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::ServiceError;

/// The slice of a user record other modules are allowed to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: i64,
    pub username: String,
    /// Stable identifier assigned by the external identity provider.
    pub identity_provider_id: String,
    /// Ids of users this user has blocked.
    pub blocked: Vec<i64>,
    /// Whether the user wants follow notifications.
    pub follow_notifications: bool,
}

impl DirectoryUser {
    pub fn has_blocked(&self, other: i64) -> bool {
        self.blocked.contains(&other)
    }
}

/// Read-only user lookup.
///
/// `Ok(None)` means the user does not exist. Callers treat both a missing
/// user and a lookup error as "unknown" where the lookup is best-effort.
pub trait UserDirectory: Send + Sync + 'static {
    fn get_by_id(&self, id: i64) -> Result<Option<DirectoryUser>, ServiceError>;
}

/// A fixed, in-memory directory. Used in tests and for embedding without a
/// users module.
#[derive(Default)]
pub struct StaticDirectory {
    users: RwLock<HashMap<i64, DirectoryUser>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: DirectoryUser) {
        if let Ok(mut users) = self.users.write() {
            users.insert(user.id, user);
        }
    }
}

impl UserDirectory for StaticDirectory {
    fn get_by_id(&self, id: i64) -> Result<Option<DirectoryUser>, ServiceError> {
        let users = self
            .users
            .read()
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(users.get(&id).cloned())
    }
}
