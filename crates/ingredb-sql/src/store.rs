use anyhow::{bail, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use ingredb_core::traits::TabularStore;
use ingredb_core::types::{Table, Value};
use ingredb_core::Error;

/// SQLite-backed [`TabularStore`]. Statements that would write are refused
/// before they run, whatever flags the connection was opened with.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening SQLite database {}", path.display()))?;
        debug!(path = %path.display(), "SQLite store opened read-only");
        Ok(Self::from_connection(conn))
    }

    /// Wraps an existing connection, e.g. an in-memory fixture.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Mutex::new(conn) }
    }
}

fn to_value(raw: ValueRef<'_>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Text(format!("<{} bytes>", b.len())),
    }
}

impl TabularStore for SqliteStore {
    fn query(&self, sql: &str) -> Result<Table> {
        let conn = self.conn.lock().map_err(|e| Error::Store(format!("connection lock poisoned: {e}")))?;
        let mut stmt = conn.prepare(sql).context("preparing statement")?;
        if !stmt.readonly() {
            bail!("statement would modify the database");
        }
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let width = columns.len();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(to_value(row.get_ref(i)?));
            }
            out.push(values);
        }
        debug!(rows = out.len(), columns = width, "SQLite query");
        Ok(Table { columns, rows: out })
    }
}
