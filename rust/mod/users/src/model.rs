use serde::{Deserialize, Serialize};

/// A registered user. The numeric id is assigned by the store; the
/// identity-provider id comes from the external authentication system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub identity_provider_id: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub notifications: NotificationSettings,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for creating a user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub identity_provider_id: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Per-category notification preferences. Everything is on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub message_notifications: bool,
    #[serde(default = "default_true")]
    pub follow_notifications: bool,
    #[serde(default = "default_true")]
    pub comment_notifications: bool,
    #[serde(default = "default_true")]
    pub like_notifications: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            message_notifications: true,
            follow_notifications: true,
            comment_notifications: true,
            like_notifications: true,
        }
    }
}

/// Entry of a user's block list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedUser {
    pub id: i64,
    pub username: String,
    pub blocked_at: String,
}

/// Query string of `GET /users`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_on() {
        let s: NotificationSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(s, NotificationSettings::default());
        let s: NotificationSettings =
            serde_json::from_str(r#"{"followNotifications": false}"#).unwrap();
        assert!(!s.follow_notifications);
        assert!(s.like_notifications);
    }

    #[test]
    fn create_user_minimal_body() {
        let input: CreateUser = serde_json::from_str(
            r#"{"identityProviderId":"auth0|1","username":"ann","email":"ann@example.com"}"#,
        )
        .unwrap();
        assert_eq!(input.username, "ann");
        assert!(input.first_name.is_empty());
        assert!(input.phone_number.is_none());
    }
}
