use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode};
use tracing::debug;

use crate::error::SQLError;
use crate::traits::{Row, SQLExec, SQLStore, Value};

/// SqliteStore is a SQLStore implementation backed by rusqlite (bundled SQLite).
///
/// A single connection guarded by a mutex: every statement and every
/// transaction is serialized.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self, SQLError> {
        let conn = Connection::open(path).map_err(|e| SQLError::Connection(e.to_string()))?;

        // WAL gives readers from other processes a consistent snapshot.
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| SQLError::Connection(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self, SQLError> {
        let conn =
            Connection::open_in_memory().map_err(|e| SQLError::Connection(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SQLExec for SqliteStore {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Connection(e.to_string()))?;
        query_on(&conn, sql, params)
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, SQLError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Connection(e.to_string()))?;
        exec_on(&conn, sql, params)
    }
}

impl SQLStore for SqliteStore {
    fn transaction(
        &self,
        body: &mut dyn FnMut(&dyn SQLExec) -> Result<(), SQLError>,
    ) -> Result<(), SQLError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Connection(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        let outcome = body(&TxExec(&tx));
        match outcome {
            Ok(()) => tx
                .commit()
                .map_err(|e| SQLError::Execution(e.to_string())),
            Err(e) => {
                debug!("transaction rolled back: {e}");
                if let Err(rb) = tx.rollback() {
                    debug!("rollback failed: {rb}");
                }
                Err(e)
            }
        }
    }
}

/// Statement executor bound to an open transaction.
struct TxExec<'a>(&'a Connection);

impl SQLExec for TxExec<'_> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
        query_on(self.0, sql, params)
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, SQLError> {
        exec_on(self.0, sql, params)
    }
}

/// Convert our Value enum to rusqlite's ToSql.
fn bind_params(params: &[Value]) -> Vec<Box<dyn rusqlite::types::ToSql + '_>> {
    params
        .iter()
        .map(|v| -> Box<dyn rusqlite::types::ToSql + '_> {
            match v {
                Value::Null => Box::new(rusqlite::types::Null),
                Value::Integer(i) => Box::new(*i),
                Value::Real(f) => Box::new(*f),
                Value::Text(s) => Box::new(s.as_str()),
                Value::Blob(b) => Box::new(b.as_slice()),
            }
        })
        .collect()
}

fn query_on(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
    let bound = bind_params(params);
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| classify(e, SQLError::Query))?;

    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            let columns = column_names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), row_value_at(row, i)))
                .collect();
            Ok(Row { columns })
        })
        .map_err(|e| classify(e, SQLError::Query))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(|e| classify(e, SQLError::Query))?);
    }
    Ok(result)
}

fn exec_on(conn: &Connection, sql: &str, params: &[Value]) -> Result<u64, SQLError> {
    let bound = bind_params(params);
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

    let affected = conn
        .execute(sql, param_refs.as_slice())
        .map_err(|e| classify(e, SQLError::Execution))?;

    Ok(affected as u64)
}

/// Constraint failures get their own variant so callers can tell a
/// duplicate key apart from a broken connection.
fn classify(e: rusqlite::Error, fallback: fn(String) -> SQLError) -> SQLError {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        if err.code == ErrorCode::ConstraintViolation {
            return SQLError::Constraint(e.to_string());
        }
    }
    fallback(e.to_string())
}

/// Extract a Value from a rusqlite row at a given column index.
fn row_value_at(row: &rusqlite::Row, idx: usize) -> Value {
    match row.get_ref(idx) {
        Ok(ValueRef::Integer(i)) => Value::Integer(i),
        Ok(ValueRef::Real(f)) => Value::Real(f),
        Ok(ValueRef::Text(t)) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        Ok(ValueRef::Blob(b)) => Value::Blob(b.to_vec()),
        Ok(ValueRef::Null) | Err(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_table() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .exec(
                "CREATE TABLE items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    score REAL,
                    note TEXT
                )",
                &[],
            )
            .unwrap();
        store
    }

    #[test]
    fn exec_and_query() {
        let store = store_with_table();
        let affected = store
            .exec(
                "INSERT INTO items (name, score) VALUES (?1, ?2)",
                &[Value::from("a"), Value::Real(1.5)],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = store
            .query("SELECT id, name, score, note FROM items", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("name"), Some("a"));
        assert_eq!(rows[0].get("score"), Some(&Value::Real(1.5)));
        assert_eq!(rows[0].get("note"), Some(&Value::Null));
    }

    #[test]
    fn insert_returning_id() {
        let store = store_with_table();
        let first = store
            .query("INSERT INTO items (name) VALUES (?1) RETURNING id", &[Value::from("a")])
            .unwrap();
        let second = store
            .query("INSERT INTO items (name) VALUES (?1) RETURNING id", &[Value::from("b")])
            .unwrap();
        assert_eq!(first[0].get_i64("id"), Some(1));
        assert_eq!(second[0].get_i64("id"), Some(2));
    }

    #[test]
    fn unique_violation_is_constraint() {
        let store = store_with_table();
        store
            .exec("INSERT INTO items (name) VALUES (?1)", &[Value::from("dup")])
            .unwrap();
        let err = store
            .exec("INSERT INTO items (name) VALUES (?1)", &[Value::from("dup")])
            .unwrap_err();
        assert!(err.is_constraint(), "got {err:?}");
    }

    #[test]
    fn transaction_commits() {
        let store = store_with_table();
        store
            .transaction(&mut |tx| {
                tx.exec("INSERT INTO items (name) VALUES ('x')", &[])?;
                tx.exec("INSERT INTO items (name) VALUES ('y')", &[])?;
                Ok(())
            })
            .unwrap();
        let rows = store.query("SELECT COUNT(*) AS cnt FROM items", &[]).unwrap();
        assert_eq!(rows[0].get_i64("cnt"), Some(2));
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = store_with_table();
        let result = store.transaction(&mut |tx| {
            tx.exec("INSERT INTO items (name) VALUES ('x')", &[])?;
            Err(SQLError::Aborted("changed my mind".into()))
        });
        assert!(matches!(result, Err(SQLError::Aborted(_))));

        let rows = store.query("SELECT COUNT(*) AS cnt FROM items", &[]).unwrap();
        assert_eq!(rows[0].get_i64("cnt"), Some(0));
    }

    #[test]
    fn transaction_rolls_back_on_constraint() {
        let store = store_with_table();
        store
            .exec("INSERT INTO items (name) VALUES ('taken')", &[])
            .unwrap();
        let result = store.transaction(&mut |tx| {
            tx.exec("INSERT INTO items (name) VALUES ('fresh')", &[])?;
            tx.exec("INSERT INTO items (name) VALUES ('taken')", &[])?;
            Ok(())
        });
        assert!(result.unwrap_err().is_constraint());

        let rows = store
            .query("SELECT name FROM items WHERE name = 'fresh'", &[])
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.exec("CREATE TABLE t (v INTEGER)", &[]).unwrap();
            store.exec("INSERT INTO t (v) VALUES (7)", &[]).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let rows = store.query("SELECT v FROM t", &[]).unwrap();
        assert_eq!(rows[0].get_i64("v"), Some(7));
    }

    #[test]
    fn option_and_bool_values() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Integer(3));
        assert_eq!(Value::from(true), Value::Integer(1));
    }
}
