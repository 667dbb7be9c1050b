// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent registration store backed by SQLite.
//
// Each watched notification is stored as a JSON body keyed by its id.  The
// autoincrement `seq` column fixes storage order at first insertion; an
// upsert rewrites the body in place and keeps the original position.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use fencepost_core::GeoNotification;
use fencepost_core::error::{FencepostError, Result};

/// SQLite schema for the geofences table.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS geofences (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

/// Convert a `rusqlite::Error` into a `FencepostError::Database`.
fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> FencepostError + '_ {
    move |e| FencepostError::Database(format!("{context}: {e}"))
}

/// Watched geofence notifications, persisted in a SQLite database.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively.  The registry holds the store behind an async mutex and keeps
/// every call short.
pub struct RegistrationStore {
    conn: Connection,
}

impl RegistrationStore {
    /// Open (or create) the store database at the given path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;

        // WAL keeps readers from blocking on the background pipeline's writes.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;

        info!("registration store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;

        debug!("in-memory registration store opened");
        Ok(Self { conn })
    }

    /// Insert a notification, or replace the stored one with the same id.
    #[instrument(skip(self, notification), fields(id = %notification.id))]
    pub fn upsert(&self, notification: &GeoNotification) -> Result<()> {
        let body = serde_json::to_string(notification)?;

        self.conn
            .execute(
                "INSERT INTO geofences (id, body, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET body = excluded.body,
                                               updated_at = excluded.updated_at",
                params![notification.id, body, Utc::now().to_rfc3339()],
            )
            .map_err(db_err("upsert"))?;

        debug!("notification stored");
        Ok(())
    }

    /// Retrieve a single notification by id.
    pub fn get(&self, id: &str) -> Result<Option<GeoNotification>> {
        let body: Option<String> = self
            .conn
            .query_row("SELECT body FROM geofences WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err("get"))?;

        body.map(|b| serde_json::from_str(&b).map_err(FencepostError::from))
            .transpose()
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM geofences WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err("contains"))?;
        Ok(found.is_some())
    }

    /// All notifications in storage order.
    #[instrument(skip(self))]
    pub fn all(&self) -> Result<Vec<GeoNotification>> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM geofences ORDER BY seq ASC")
            .map_err(db_err("prepare all"))?;

        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err("query all"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect rows"))?;

        let notifications = bodies
            .iter()
            .map(|body| serde_json::from_str(body))
            .collect::<std::result::Result<Vec<GeoNotification>, _>>()?;

        debug!(count = notifications.len(), "retrieved watched notifications");
        Ok(notifications)
    }

    /// All ids in storage order.
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM geofences ORDER BY seq ASC")
            .map_err(db_err("prepare ids"))?;

        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err("query ids"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect ids"))?;
        Ok(ids)
    }

    /// Delete the given ids.  Missing ids are ignored.
    ///
    /// Returns the number of rows actually removed.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            removed += self
                .conn
                .execute("DELETE FROM geofences WHERE id = ?1", params![id])
                .map_err(db_err("delete"))?;
        }

        debug!(removed, "notifications deleted");
        Ok(removed)
    }

    /// Remove every notification.
    pub fn clear(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM geofences", [])
            .map_err(db_err("clear"))?;
        info!(removed, "registration store cleared");
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM geofences", [], |row| row.get(0))
            .map_err(db_err("count"))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
