use usergraph_sql::SQLStore;

use crate::service::UsersError;

/// Initialize the SQLite schema for users and block lists.
pub fn init_schema(sql: &dyn SQLStore) -> Result<(), UsersError> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity_provider_id TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL UNIQUE,
            date_of_birth TEXT,
            gender TEXT,
            phone_number TEXT,
            message_notifications INTEGER NOT NULL DEFAULT 1,
            follow_notifications INTEGER NOT NULL DEFAULT 1,
            comment_notifications INTEGER NOT NULL DEFAULT 1,
            like_notifications INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        // Block list: user_id has blocked blocked_id.
        "CREATE TABLE IF NOT EXISTS user_blocked (
            user_id INTEGER NOT NULL,
            blocked_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (user_id, blocked_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_user_blocked_blocked ON user_blocked(blocked_id)",
    ];

    for stmt in &statements {
        sql.exec(stmt, &[])
            .map_err(|e| UsersError::Storage(format!("schema init: {e}")))?;
    }
    Ok(())
}
