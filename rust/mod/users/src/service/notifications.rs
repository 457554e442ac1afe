use tracing::info;
use usergraph_core::now_rfc3339;
use usergraph_sql::Value;

use crate::model::NotificationSettings;
use crate::service::{UsersError, UsersService};

impl UsersService {
    /// Replace all four notification flags of a user.
    pub fn set_notification_settings(
        &self,
        user_id: i64,
        settings: NotificationSettings,
    ) -> Result<NotificationSettings, UsersError> {
        let affected = self.sql.exec(
            "UPDATE users SET message_notifications = ?1, follow_notifications = ?2, \
             comment_notifications = ?3, like_notifications = ?4, updated_at = ?5 \
             WHERE id = ?6",
            &[
                Value::from(settings.message_notifications),
                Value::from(settings.follow_notifications),
                Value::from(settings.comment_notifications),
                Value::from(settings.like_notifications),
                Value::Text(now_rfc3339()),
                Value::Integer(user_id),
            ],
        )?;
        if affected == 0 {
            return Err(UsersError::NotFound(format!("user {user_id}")));
        }
        info!(user_id, ?settings, "notification settings updated");
        Ok(settings)
    }

    pub fn get_notification_settings(
        &self,
        user_id: i64,
    ) -> Result<NotificationSettings, UsersError> {
        Ok(self.get_user(user_id)?.notifications)
    }
}
