use tracing::{debug, info};
use usergraph_core::{merge_patch, now_rfc3339};
use usergraph_sql::{Row, Value};

use crate::model::{CreateUser, NotificationSettings, User};
use crate::service::{UsersError, UsersService};

const USER_COLUMNS: &str = "id, identity_provider_id, username, first_name, last_name, email, \
     date_of_birth, gender, phone_number, message_notifications, follow_notifications, \
     comment_notifications, like_notifications, created_at, updated_at";

impl UsersService {
    /// Create a new user.
    pub fn create_user(&self, input: CreateUser) -> Result<User, UsersError> {
        let now = now_rfc3339();
        let mut user = User {
            id: 0,
            identity_provider_id: input.identity_provider_id.trim().to_string(),
            username: input.username.trim().to_string(),
            first_name: input.first_name,
            last_name: input.last_name,
            email: input.email.trim().to_string(),
            date_of_birth: input.date_of_birth,
            gender: input.gender,
            phone_number: input.phone_number,
            notifications: NotificationSettings::default(),
            created_at: now.clone(),
            updated_at: now,
        };
        validate(&user)?;

        let mut params = profile_params(&user);
        params.push(Value::Text(user.created_at.clone()));
        let rows = self
            .sql
            .query(
                "INSERT INTO users (identity_provider_id, username, first_name, last_name, email, \
                 date_of_birth, gender, phone_number, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) RETURNING id",
                &params,
            )
            .map_err(|e| {
                if e.is_constraint() {
                    UsersError::Conflict(format!(
                        "username, email or identity-provider id already taken ({})",
                        user.username
                    ))
                } else {
                    UsersError::Storage(e.to_string())
                }
            })?;
        user.id = rows
            .first()
            .and_then(|r| r.get_i64("id"))
            .ok_or_else(|| UsersError::Internal("insert returned no id".into()))?;

        info!(id = user.id, username = %user.username, "user created");
        Ok(user)
    }

    /// Get a user by numeric id.
    pub fn get_user(&self, id: i64) -> Result<User, UsersError> {
        self.find_one("id", Value::Integer(id))?
            .ok_or_else(|| UsersError::NotFound(format!("user {id}")))
    }

    /// Get a user by the identity provider's id.
    pub fn get_by_identity_provider_id(&self, idp_id: &str) -> Result<User, UsersError> {
        self.find_one("identity_provider_id", Value::from(idp_id))?
            .ok_or_else(|| UsersError::NotFound(format!("user with identity-provider id {idp_id}")))
    }

    /// Exact lookup by username.
    pub fn get_by_username(&self, username: &str) -> Result<User, UsersError> {
        self.find_one("username", Value::from(username.trim()))?
            .ok_or_else(|| UsersError::NotFound(format!("user with username {username}")))
    }

    /// Exact lookup by email address.
    pub fn get_by_email(&self, email: &str) -> Result<User, UsersError> {
        self.find_one("email", Value::from(email.trim()))?
            .ok_or_else(|| UsersError::NotFound(format!("user with email {email}")))
    }

    /// Case-insensitive substring search over username, names and email.
    /// `%` and `_` match literally. An empty query lists everyone.
    pub fn search_users(&self, param: &str) -> Result<Vec<User>, UsersError> {
        let pattern = format!("%{}%", escape_like(&param.trim().to_lowercase()));
        debug!(%pattern, "searching users");
        let rows = self.sql.query(
            &format!(
                "SELECT {USER_COLUMNS} FROM users \
                 WHERE lower(username) LIKE ?1 ESCAPE '\\' \
                    OR lower(first_name) LIKE ?1 ESCAPE '\\' \
                    OR lower(last_name) LIKE ?1 ESCAPE '\\' \
                    OR lower(email) LIKE ?1 ESCAPE '\\' \
                 ORDER BY id"
            ),
            &[Value::Text(pattern)],
        )?;
        rows.iter().map(row_to_user).collect()
    }

    /// `column` is a fixed column name, never user input.
    fn find_one(&self, column: &str, value: Value) -> Result<Option<User>, UsersError> {
        let rows = self.sql.query(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"),
            &[value],
        )?;
        rows.first().map(row_to_user).transpose()
    }

    /// Update a user with JSON merge-patch semantics.
    ///
    /// `id`, `identityProviderId` and `createdAt` are preserved whatever the
    /// patch says.
    pub fn update_user(&self, id: i64, patch: serde_json::Value) -> Result<User, UsersError> {
        let current = self.get_user(id)?;
        let now = now_rfc3339();

        let mut base =
            serde_json::to_value(&current).map_err(|e| UsersError::Internal(e.to_string()))?;
        merge_patch(&mut base, &patch);
        base["id"] = serde_json::json!(current.id);
        base["identityProviderId"] = serde_json::json!(current.identity_provider_id);
        base["createdAt"] = serde_json::json!(current.created_at);
        base["updatedAt"] = serde_json::json!(now);

        let updated: User =
            serde_json::from_value(base).map_err(|e| UsersError::Validation(e.to_string()))?;
        validate(&updated)?;

        let mut params = profile_params(&updated);
        params.extend([
            Value::from(updated.notifications.message_notifications),
            Value::from(updated.notifications.follow_notifications),
            Value::from(updated.notifications.comment_notifications),
            Value::from(updated.notifications.like_notifications),
            Value::Text(updated.updated_at.clone()),
            Value::Integer(id),
        ]);
        self.sql.exec(
            "UPDATE users SET identity_provider_id = ?1, username = ?2, first_name = ?3, \
             last_name = ?4, email = ?5, date_of_birth = ?6, gender = ?7, phone_number = ?8, \
             message_notifications = ?9, follow_notifications = ?10, \
             comment_notifications = ?11, like_notifications = ?12, updated_at = ?13 \
             WHERE id = ?14",
            &params,
        )?;

        info!(id, "user updated");
        Ok(updated)
    }
}

/// Columns 1..=8 shared by insert and update.
fn profile_params(user: &User) -> Vec<Value> {
    vec![
        Value::Text(user.identity_provider_id.clone()),
        Value::Text(user.username.clone()),
        Value::Text(user.first_name.clone()),
        Value::Text(user.last_name.clone()),
        Value::Text(user.email.clone()),
        Value::from(user.date_of_birth.clone()),
        Value::from(user.gender.clone()),
        Value::from(user.phone_number.clone()),
    ]
}

/// Escape LIKE wildcards so they match themselves under `ESCAPE '\'`.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn validate(user: &User) -> Result<(), UsersError> {
    if user.identity_provider_id.is_empty() {
        return Err(UsersError::Validation("identityProviderId is required".into()));
    }
    if user.username.is_empty() {
        return Err(UsersError::Validation("username is required".into()));
    }
    if user.username.chars().any(char::is_whitespace) {
        return Err(UsersError::Validation(format!(
            "username {:?} must not contain whitespace",
            user.username
        )));
    }
    let well_formed = user
        .email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed {
        return Err(UsersError::Validation(format!(
            "invalid email address {:?}",
            user.email
        )));
    }
    Ok(())
}

pub(crate) fn row_to_user(row: &Row) -> Result<User, UsersError> {
    let text = |name: &str| row.get_str(name).unwrap_or_default().to_string();
    let opt = |name: &str| row.get_str(name).map(String::from);
    let flag = |name: &str| row.get_bool(name).unwrap_or(true);

    Ok(User {
        id: row
            .get_i64("id")
            .ok_or_else(|| UsersError::Internal("missing id column".into()))?,
        identity_provider_id: text("identity_provider_id"),
        username: text("username"),
        first_name: text("first_name"),
        last_name: text("last_name"),
        email: text("email"),
        date_of_birth: opt("date_of_birth"),
        gender: opt("gender"),
        phone_number: opt("phone_number"),
        notifications: NotificationSettings {
            message_notifications: flag("message_notifications"),
            follow_notifications: flag("follow_notifications"),
            comment_notifications: flag("comment_notifications"),
            like_notifications: flag("like_notifications"),
        },
        created_at: text("created_at"),
        updated_at: text("updated_at"),
    })
}
