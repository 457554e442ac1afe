use std::sync::Arc;

use tracing::debug;
use usergraph_core::now_rfc3339;
use usergraph_sql::{Row, SQLExec, SQLStore, Value};

use crate::error::FollowingError;
use crate::model::{AddedEdge, FollowRequest, FollowRequestFields, Follower, RequestStatus};

/// Schema for requests and edges. One statement per entry: the SQL layer
/// executes a single statement per call.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS follow_requests (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        follower_id   INTEGER NOT NULL,
        following_id  INTEGER NOT NULL,
        status        TEXT NOT NULL,
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_follow_requests_following ON follow_requests(following_id)",
    // At most one open request per pair.
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_follow_requests_pending
        ON follow_requests(follower_id, following_id) WHERE status = 'PENDING'",
    "CREATE TABLE IF NOT EXISTS followers (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        follower_id   INTEGER NOT NULL,
        following_id  INTEGER NOT NULL,
        created_at    TEXT NOT NULL,
        UNIQUE (follower_id, following_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_followers_following ON followers(following_id)",
];

fn init_schema(db: &dyn SQLStore) -> Result<(), FollowingError> {
    for stmt in SCHEMA {
        db.exec(stmt, &[])
            .map_err(|e| FollowingError::Persistence(format!("following schema init: {e}")))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FollowerStore
// ---------------------------------------------------------------------------

/// Follower edges. The `*_in` functions run on any executor, so the engine
/// can call them inside its own transaction.
pub struct FollowerStore {
    db: Arc<dyn SQLStore>,
}

impl FollowerStore {
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, FollowingError> {
        init_schema(db.as_ref())?;
        Ok(Self { db })
    }

    /// Insert the edge, or return the existing one for the pair.
    pub fn add_follower(
        &self,
        follower_id: i64,
        following_id: i64,
    ) -> Result<AddedEdge, FollowingError> {
        Self::add_follower_in(self.db.as_ref(), follower_id, following_id)
    }

    pub fn add_follower_in<E: SQLExec + ?Sized>(
        exec: &E,
        follower_id: i64,
        following_id: i64,
    ) -> Result<AddedEdge, FollowingError> {
        let inserted = exec.query(
            "INSERT INTO followers (follower_id, following_id, created_at) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT (follower_id, following_id) DO NOTHING \
             RETURNING id",
            &[
                Value::Integer(follower_id),
                Value::Integer(following_id),
                Value::Text(now_rfc3339()),
            ],
        )?;
        if let Some(id) = inserted.first().and_then(|r| r.get_i64("id")) {
            debug!(id, follower_id, following_id, "follower edge inserted");
            return Ok(AddedEdge { id, created: true });
        }

        let existing = exec.query(
            "SELECT id FROM followers WHERE follower_id = ?1 AND following_id = ?2",
            &[Value::Integer(follower_id), Value::Integer(following_id)],
        )?;
        existing
            .first()
            .and_then(|r| r.get_i64("id"))
            .map(|id| AddedEdge { id, created: false })
            .ok_or_else(|| {
                FollowingError::Persistence(format!(
                    "edge {follower_id} -> {following_id} neither inserted nor found"
                ))
            })
    }

    /// Delete the edge. Returns the number of rows removed (0 or 1).
    pub fn remove_following(
        &self,
        follower_id: i64,
        following_id: i64,
    ) -> Result<u64, FollowingError> {
        let removed = self.db.exec(
            "DELETE FROM followers WHERE follower_id = ?1 AND following_id = ?2",
            &[Value::Integer(follower_id), Value::Integer(following_id)],
        )?;
        Ok(removed)
    }

    /// Edges pointing at `user_id`.
    pub fn get_followers(&self, user_id: i64) -> Result<Vec<Follower>, FollowingError> {
        let rows = self.db.query(
            "SELECT id, follower_id, following_id, created_at FROM followers \
             WHERE following_id = ?1 ORDER BY id",
            &[Value::Integer(user_id)],
        )?;
        rows.iter().map(row_to_follower).collect()
    }

    /// Edges originating from `user_id`.
    pub fn get_following(&self, user_id: i64) -> Result<Vec<Follower>, FollowingError> {
        let rows = self.db.query(
            "SELECT id, follower_id, following_id, created_at FROM followers \
             WHERE follower_id = ?1 ORDER BY id",
            &[Value::Integer(user_id)],
        )?;
        rows.iter().map(row_to_follower).collect()
    }

    pub fn exists(&self, follower_id: i64, following_id: i64) -> Result<bool, FollowingError> {
        let rows = self.db.query(
            "SELECT 1 AS hit FROM followers WHERE follower_id = ?1 AND following_id = ?2",
            &[Value::Integer(follower_id), Value::Integer(following_id)],
        )?;
        Ok(!rows.is_empty())
    }
}

// ---------------------------------------------------------------------------
// FollowRequestStore
// ---------------------------------------------------------------------------

pub struct FollowRequestStore {
    db: Arc<dyn SQLStore>,
}

impl FollowRequestStore {
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, FollowingError> {
        init_schema(db.as_ref())?;
        Ok(Self { db })
    }

    pub fn add_following_request(
        &self,
        fields: &FollowRequestFields,
    ) -> Result<i64, FollowingError> {
        Self::add_in(self.db.as_ref(), fields)
    }

    /// Insert a request. A second PENDING request for the same pair is a
    /// `Conflict`.
    pub fn add_in<E: SQLExec + ?Sized>(
        exec: &E,
        fields: &FollowRequestFields,
    ) -> Result<i64, FollowingError> {
        let now = now_rfc3339();
        let rows = exec
            .query(
                "INSERT INTO follow_requests \
                 (follower_id, following_id, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4) RETURNING id",
                &[
                    Value::Integer(fields.follower_id),
                    Value::Integer(fields.following_id),
                    Value::from(fields.status.as_str()),
                    Value::Text(now),
                ],
            )
            .map_err(|e| {
                if e.is_constraint() {
                    FollowingError::Conflict(format!(
                        "a pending follow request from {} to {} already exists",
                        fields.follower_id, fields.following_id
                    ))
                } else {
                    FollowingError::Persistence(e.to_string())
                }
            })?;

        rows.first()
            .and_then(|r| r.get_i64("id"))
            .ok_or_else(|| FollowingError::Persistence("insert returned no id".into()))
    }

    /// Overwrite pair and status of request `id`.
    pub fn update_following_request(
        &self,
        id: i64,
        fields: &FollowRequestFields,
    ) -> Result<FollowRequest, FollowingError> {
        Self::update_in(self.db.as_ref(), id, fields, None)
    }

    /// Overwrite pair and status of request `id`. With `expected` set the
    /// write only applies while the stored status still equals it; a
    /// mismatch yields `InvalidTransition`.
    pub fn update_in<E: SQLExec + ?Sized>(
        exec: &E,
        id: i64,
        fields: &FollowRequestFields,
        expected: Option<RequestStatus>,
    ) -> Result<FollowRequest, FollowingError> {
        let mut sql = String::from(
            "UPDATE follow_requests \
             SET follower_id = ?1, following_id = ?2, status = ?3, updated_at = ?4 \
             WHERE id = ?5",
        );
        let mut params = vec![
            Value::Integer(fields.follower_id),
            Value::Integer(fields.following_id),
            Value::from(fields.status.as_str()),
            Value::Text(now_rfc3339()),
            Value::Integer(id),
        ];
        if let Some(status) = expected {
            sql.push_str(" AND status = ?6");
            params.push(Value::from(status.as_str()));
        }

        let affected = exec.exec(&sql, &params).map_err(|e| {
            if e.is_constraint() {
                FollowingError::Conflict(format!(
                    "a pending follow request from {} to {} already exists",
                    fields.follower_id, fields.following_id
                ))
            } else {
                FollowingError::Persistence(e.to_string())
            }
        })?;

        if affected == 0 {
            // Either the row is gone or the compare-and-set lost.
            let current = Self::get_in(exec, id)?;
            return Err(FollowingError::InvalidTransition {
                id,
                from: current.status,
                to: fields.status,
            });
        }
        Self::get_in(exec, id)
    }

    pub fn get_request(&self, id: i64) -> Result<FollowRequest, FollowingError> {
        Self::get_in(self.db.as_ref(), id)
    }

    pub fn get_in<E: SQLExec + ?Sized>(exec: &E, id: i64) -> Result<FollowRequest, FollowingError> {
        let rows = exec.query(
            "SELECT id, follower_id, following_id, status, created_at, updated_at \
             FROM follow_requests WHERE id = ?1",
            &[Value::Integer(id)],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| FollowingError::NotFound(format!("follow request {id} not found")))?;
        row_to_request(row)
    }

    pub fn get_requests(&self) -> Result<Vec<FollowRequest>, FollowingError> {
        let rows = self.db.query(
            "SELECT id, follower_id, following_id, status, created_at, updated_at \
             FROM follow_requests ORDER BY id",
            &[],
        )?;
        rows.iter().map(row_to_request).collect()
    }

    /// Requests addressed to `following_id`.
    pub fn get_requests_by_following_id(
        &self,
        following_id: i64,
    ) -> Result<Vec<FollowRequest>, FollowingError> {
        let rows = self.db.query(
            "SELECT id, follower_id, following_id, status, created_at, updated_at \
             FROM follow_requests WHERE following_id = ?1 ORDER BY id",
            &[Value::Integer(following_id)],
        )?;
        rows.iter().map(row_to_request).collect()
    }

    pub fn delete_following_request(&self, id: i64) -> Result<(), FollowingError> {
        Self::delete_in(self.db.as_ref(), id)
    }

    pub fn delete_in<E: SQLExec + ?Sized>(exec: &E, id: i64) -> Result<(), FollowingError> {
        let affected = exec.exec(
            "DELETE FROM follow_requests WHERE id = ?1",
            &[Value::Integer(id)],
        )?;
        if affected == 0 {
            return Err(FollowingError::NotFound(format!(
                "follow request {id} not found"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn corrupt(table: &str, column: &str) -> FollowingError {
    FollowingError::Persistence(format!("corrupt {table} row: missing {column}"))
}

fn row_to_follower(row: &Row) -> Result<Follower, FollowingError> {
    Ok(Follower {
        id: row.get_i64("id").ok_or_else(|| corrupt("followers", "id"))?,
        follower_id: row
            .get_i64("follower_id")
            .ok_or_else(|| corrupt("followers", "follower_id"))?,
        following_id: row
            .get_i64("following_id")
            .ok_or_else(|| corrupt("followers", "following_id"))?,
        created_at: row.get_str("created_at").unwrap_or_default().to_string(),
    })
}

fn row_to_request(row: &Row) -> Result<FollowRequest, FollowingError> {
    let status = row
        .get_str("status")
        .and_then(RequestStatus::from_str)
        .ok_or_else(|| corrupt("follow_requests", "status"))?;
    Ok(FollowRequest {
        id: row
            .get_i64("id")
            .ok_or_else(|| corrupt("follow_requests", "id"))?,
        follower_id: row
            .get_i64("follower_id")
            .ok_or_else(|| corrupt("follow_requests", "follower_id"))?,
        following_id: row
            .get_i64("following_id")
            .ok_or_else(|| corrupt("follow_requests", "following_id"))?,
        status,
        created_at: row.get_str("created_at").unwrap_or_default().to_string(),
        updated_at: row.get_str("updated_at").unwrap_or_default().to_string(),
    })
}
