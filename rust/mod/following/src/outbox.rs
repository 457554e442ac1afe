//! Durable notification outbox.
//!
//! Notifications are written in the same transaction as the state change
//! that produced them. The dispatcher drains PENDING rows into the emitter
//! and records the result.

use std::sync::Arc;

use tracing::{debug, warn};
use usergraph_core::{new_message_id, now_rfc3339};
use usergraph_sql::{Row, SQLExec, SQLStore, Value};

use crate::error::FollowingError;
use crate::model::{Notification, OutboxEntry, OutboxStats, OutboxStatus};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS notification_outbox (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id  TEXT NOT NULL UNIQUE,
        payload     TEXT NOT NULL,
        status      TEXT NOT NULL,
        attempts    INTEGER NOT NULL DEFAULT 0,
        last_error  TEXT,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_outbox_status ON notification_outbox(status, id)",
];

pub struct OutboxStore {
    db: Arc<dyn SQLStore>,
}

impl OutboxStore {
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, FollowingError> {
        for stmt in SCHEMA {
            db.exec(stmt, &[])
                .map_err(|e| FollowingError::Persistence(format!("outbox schema init: {e}")))?;
        }
        Ok(Self { db })
    }

    /// Queue a notification on `exec`, normally the caller's open transaction.
    ///
    /// The message id is fixed here and reused by every delivery attempt.
    pub fn enqueue<E: SQLExec + ?Sized>(
        exec: &E,
        notification: &Notification,
    ) -> Result<i64, FollowingError> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| FollowingError::Persistence(format!("encode notification: {e}")))?;
        let now = now_rfc3339();
        let rows = exec.query(
            "INSERT INTO notification_outbox \
             (message_id, payload, status, attempts, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 0, ?4, ?4) RETURNING id",
            &[
                Value::Text(new_message_id()),
                Value::Text(payload),
                Value::from(OutboxStatus::Pending.as_str()),
                Value::Text(now),
            ],
        )?;
        let id = rows
            .first()
            .and_then(|r| r.get_i64("id"))
            .ok_or_else(|| FollowingError::Persistence("outbox insert returned no id".into()))?;
        debug!(id, "notification queued");
        Ok(id)
    }

    /// Oldest PENDING entries first.
    pub fn pending(&self, limit: u32) -> Result<Vec<OutboxEntry>, FollowingError> {
        let rows = self.db.query(
            "SELECT id, message_id, payload, status, attempts, last_error, created_at, updated_at \
             FROM notification_outbox WHERE status = ?1 ORDER BY id LIMIT ?2",
            &[
                Value::from(OutboxStatus::Pending.as_str()),
                Value::Integer(limit as i64),
            ],
        )?;
        rows.iter().map(row_to_entry).collect()
    }

    pub fn get(&self, id: i64) -> Result<OutboxEntry, FollowingError> {
        let rows = self.db.query(
            "SELECT id, message_id, payload, status, attempts, last_error, created_at, updated_at \
             FROM notification_outbox WHERE id = ?1",
            &[Value::Integer(id)],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| FollowingError::NotFound(format!("outbox entry {id} not found")))?;
        row_to_entry(row)
    }

    pub fn mark_delivered(&self, id: i64) -> Result<(), FollowingError> {
        self.db.exec(
            "UPDATE notification_outbox \
             SET status = ?1, attempts = attempts + 1, last_error = NULL, updated_at = ?2 \
             WHERE id = ?3",
            &[
                Value::from(OutboxStatus::Delivered.as_str()),
                Value::Text(now_rfc3339()),
                Value::Integer(id),
            ],
        )?;
        Ok(())
    }

    /// Record a failed attempt. The entry goes DEAD once `attempts` reaches
    /// `max_attempts`. Returns the resulting status.
    pub fn mark_failed(
        &self,
        id: i64,
        error: &str,
        max_attempts: u32,
    ) -> Result<OutboxStatus, FollowingError> {
        let rows = self.db.query(
            "UPDATE notification_outbox \
             SET attempts = attempts + 1, last_error = ?1, updated_at = ?2, \
                 status = CASE WHEN attempts + 1 >= ?3 THEN ?4 ELSE status END \
             WHERE id = ?5 RETURNING status, attempts",
            &[
                Value::from(error),
                Value::Text(now_rfc3339()),
                Value::Integer(max_attempts as i64),
                Value::from(OutboxStatus::Dead.as_str()),
                Value::Integer(id),
            ],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| FollowingError::NotFound(format!("outbox entry {id} not found")))?;
        let status = row
            .get_str("status")
            .and_then(OutboxStatus::from_str)
            .ok_or_else(|| FollowingError::Persistence("corrupt outbox status".into()))?;
        if status == OutboxStatus::Dead {
            warn!(
                id,
                attempts = row.get_i64("attempts").unwrap_or_default(),
                "notification gave up: {error}"
            );
        }
        Ok(status)
    }

    /// Delete delivered entries. Returns how many were removed.
    pub fn purge_delivered(&self) -> Result<u64, FollowingError> {
        let removed = self.db.exec(
            "DELETE FROM notification_outbox WHERE status = ?1",
            &[Value::from(OutboxStatus::Delivered.as_str())],
        )?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<OutboxStats, FollowingError> {
        let rows = self.db.query(
            "SELECT status, COUNT(*) AS cnt FROM notification_outbox GROUP BY status",
            &[],
        )?;
        let mut stats = OutboxStats::default();
        for row in &rows {
            let count = row.get_i64("cnt").unwrap_or(0) as u64;
            match row.get_str("status").and_then(OutboxStatus::from_str) {
                Some(OutboxStatus::Pending) => stats.pending = count,
                Some(OutboxStatus::Delivered) => stats.delivered = count,
                Some(OutboxStatus::Dead) => stats.dead = count,
                None => {}
            }
        }
        Ok(stats)
    }
}

fn row_to_entry(row: &Row) -> Result<OutboxEntry, FollowingError> {
    let payload = row
        .get_str("payload")
        .ok_or_else(|| FollowingError::Persistence("corrupt outbox row: missing payload".into()))?;
    let notification: Notification = serde_json::from_str(payload)
        .map_err(|e| FollowingError::Persistence(format!("decode notification: {e}")))?;
    let status = row
        .get_str("status")
        .and_then(OutboxStatus::from_str)
        .ok_or_else(|| FollowingError::Persistence("corrupt outbox row: status".into()))?;
    Ok(OutboxEntry {
        id: row
            .get_i64("id")
            .ok_or_else(|| FollowingError::Persistence("corrupt outbox row: id".into()))?,
        message_id: row
            .get_str("message_id")
            .ok_or_else(|| FollowingError::Persistence("corrupt outbox row: message_id".into()))?
            .to_string(),
        notification,
        status,
        attempts: row.get_i64("attempts").unwrap_or(0) as u32,
        last_error: row.get_str("last_error").map(String::from),
        created_at: row.get_str("created_at").unwrap_or_default().to_string(),
        updated_at: row.get_str("updated_at").unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use usergraph_sql::SqliteStore;

    fn outbox() -> OutboxStore {
        let db: Arc<dyn SQLStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        OutboxStore::new(db).unwrap()
    }

    fn note(msg: &str) -> Notification {
        Notification::follow(msg, "auth0|target")
    }

    #[test]
    fn enqueue_and_pending_in_order() {
        let store = outbox();
        let a = OutboxStore::enqueue(store.db.as_ref(), &note("a")).unwrap();
        let b = OutboxStore::enqueue(store.db.as_ref(), &note("b")).unwrap();

        let pending = store.pending(10).unwrap();
        assert_eq!(pending.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(pending[0].notification.message, "a");
        assert_eq!(pending[0].attempts, 0);
        assert_eq!(pending[0].message_id.len(), 36);
        assert_ne!(pending[0].message_id, pending[1].message_id);
        assert_eq!(store.pending(1).unwrap().len(), 1);
    }

    #[test]
    fn delivered_leaves_pending_set() {
        let store = outbox();
        let id = OutboxStore::enqueue(store.db.as_ref(), &note("a")).unwrap();
        store.mark_delivered(id).unwrap();

        assert!(store.pending(10).unwrap().is_empty());
        let entry = store.get(id).unwrap();
        assert_eq!(entry.status, OutboxStatus::Delivered);
        assert_eq!(entry.attempts, 1);

        assert_eq!(store.purge_delivered().unwrap(), 1);
        assert!(store.get(id).is_err());
    }

    #[test]
    fn failures_go_dead_at_limit() {
        let store = outbox();
        let id = OutboxStore::enqueue(store.db.as_ref(), &note("a")).unwrap();
        let message_id = store.get(id).unwrap().message_id;

        assert_eq!(store.mark_failed(id, "503", 3).unwrap(), OutboxStatus::Pending);
        assert_eq!(store.mark_failed(id, "503", 3).unwrap(), OutboxStatus::Pending);
        assert_eq!(store.mark_failed(id, "timeout", 3).unwrap(), OutboxStatus::Dead);

        let entry = store.get(id).unwrap();
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.message_id, message_id);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
        assert!(store.pending(10).unwrap().is_empty());
    }

    #[test]
    fn stats_count_by_status() {
        let store = outbox();
        let a = OutboxStore::enqueue(store.db.as_ref(), &note("a")).unwrap();
        let b = OutboxStore::enqueue(store.db.as_ref(), &note("b")).unwrap();
        OutboxStore::enqueue(store.db.as_ref(), &note("c")).unwrap();
        store.mark_delivered(a).unwrap();
        store.mark_failed(b, "nope", 1).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(
            stats,
            OutboxStats {
                pending: 1,
                delivered: 1,
                dead: 1
            }
        );
    }
}
