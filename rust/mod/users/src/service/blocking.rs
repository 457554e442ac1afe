use tracing::info;
use usergraph_core::now_rfc3339;
use usergraph_sql::Value;

use crate::model::BlockedUser;
use crate::service::{UsersError, UsersService};

impl UsersService {
    /// `user_id` blocks `blocked_id`. Blocking twice is a no-op.
    pub fn block_user(&self, user_id: i64, blocked_id: i64) -> Result<(), UsersError> {
        if user_id == blocked_id {
            return Err(UsersError::Validation(format!(
                "user {user_id} cannot block themselves"
            )));
        }
        self.get_user(user_id)?;
        self.get_user(blocked_id)?;

        self.sql.exec(
            "INSERT OR IGNORE INTO user_blocked (user_id, blocked_id, created_at) \
             VALUES (?1, ?2, ?3)",
            &[
                Value::Integer(user_id),
                Value::Integer(blocked_id),
                Value::Text(now_rfc3339()),
            ],
        )?;
        info!(user_id, blocked_id, "user blocked");
        Ok(())
    }

    /// Remove `blocked_id` from the block list of `user_id`. Idempotent.
    pub fn unblock_user(&self, user_id: i64, blocked_id: i64) -> Result<(), UsersError> {
        self.get_user(user_id)?;
        let removed = self.sql.exec(
            "DELETE FROM user_blocked WHERE user_id = ?1 AND blocked_id = ?2",
            &[Value::Integer(user_id), Value::Integer(blocked_id)],
        )?;
        info!(user_id, blocked_id, removed, "user unblocked");
        Ok(())
    }

    pub fn get_blocked_users(&self, user_id: i64) -> Result<Vec<BlockedUser>, UsersError> {
        self.get_user(user_id)?;
        let rows = self.sql.query(
            "SELECT u.id AS id, u.username AS username, b.created_at AS blocked_at \
             FROM user_blocked b JOIN users u ON u.id = b.blocked_id \
             WHERE b.user_id = ?1 ORDER BY b.created_at, u.id",
            &[Value::Integer(user_id)],
        )?;
        rows.iter()
            .map(|row| -> Result<BlockedUser, UsersError> {
                Ok(BlockedUser {
                    id: row
                        .get_i64("id")
                        .ok_or_else(|| UsersError::Internal("missing id column".into()))?,
                    username: row.get_str("username").unwrap_or_default().to_string(),
                    blocked_at: row.get_str("blocked_at").unwrap_or_default().to_string(),
                })
            })
            .collect()
    }

    /// Whether `user_id` has blocked `other_id`.
    pub fn is_blocked(&self, user_id: i64, other_id: i64) -> Result<bool, UsersError> {
        let rows = self.sql.query(
            "SELECT 1 AS hit FROM user_blocked WHERE user_id = ?1 AND blocked_id = ?2",
            &[Value::Integer(user_id), Value::Integer(other_id)],
        )?;
        Ok(!rows.is_empty())
    }

    pub(crate) fn blocked_ids(&self, user_id: i64) -> Result<Vec<i64>, UsersError> {
        let rows = self.sql.query(
            "SELECT blocked_id FROM user_blocked WHERE user_id = ?1 ORDER BY blocked_id",
            &[Value::Integer(user_id)],
        )?;
        Ok(rows.iter().filter_map(|r| r.get_i64("blocked_id")).collect())
    }
}
