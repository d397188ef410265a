//! `SQLite`-backed session store.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{debug, instrument};
use weft_core::SessionId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::snapshot::{SessionSnapshot, SnapshotSummary};
use crate::store::SessionStore;

/// One row per session; the payload column holds the snapshot JSON.
#[derive(Clone)]
pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db: Database::open(path)?,
        })
    }

    /// Store backed by an in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::in_memory()?,
        })
    }

    /// Wrap an already opened database.
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

fn corrupt(column: &'static str, e: impl std::fmt::Display) -> StoreError {
    StoreError::CorruptRow {
        table: "snapshots",
        column,
        detail: e.to_string(),
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    #[instrument(skip_all, fields(session_id = %snapshot.session_id, tick = snapshot.tick))]
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let payload = snapshot.to_json()?;
        let id = snapshot.session_id.as_str().to_owned();
        let version = snapshot.version;
        let tick = i64::try_from(snapshot.tick).unwrap_or(i64::MAX);
        self.blocking(move |db| {
            let now = Utc::now().to_rfc3339();
            db.with_conn(|conn| {
                let _ = conn.execute(
                    "INSERT INTO snapshots (session_id, version, tick, payload, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(session_id) DO UPDATE SET
                        version = excluded.version,
                        tick = excluded.tick,
                        payload = excluded.payload,
                        updated_at = excluded.updated_at",
                    rusqlite::params![id, version, tick, payload, now],
                )?;
                Ok(())
            })
        })
        .await?;
        debug!("snapshot saved");
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %id))]
    async fn load(&self, id: &SessionId) -> Result<Option<SessionSnapshot>> {
        let key = id.as_str().to_owned();
        let payload: Option<String> = self
            .blocking(move |db| {
                db.with_conn(|conn| {
                    Ok(conn
                        .query_row(
                            "SELECT payload FROM snapshots WHERE session_id = ?1",
                            [&key],
                            |row| row.get(0),
                        )
                        .optional()?)
                })
            })
            .await?;
        payload
            .map(|text| SessionSnapshot::from_json(&text))
            .transpose()
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        let key = id.as_str().to_owned();
        self.blocking(move |db| {
            db.with_conn(|conn| {
                let n = conn.execute("DELETE FROM snapshots WHERE session_id = ?1", [&key])?;
                Ok(n > 0)
            })
        })
        .await
    }

    async fn list(&self) -> Result<Vec<SnapshotSummary>> {
        self.blocking(|db| {
            db.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT session_id, tick, updated_at FROM snapshots ORDER BY updated_at DESC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    let (id, tick, timestamp) = row.map_err(|e| corrupt("payload", e))?;
                    out.push(SnapshotSummary {
                        session_id: SessionId::from(id),
                        tick: u64::try_from(tick).map_err(|e| corrupt("tick", e))?,
                        timestamp,
                    });
                }
                Ok(out)
            })
        })
        .await
    }

    async fn has(&self, id: &SessionId) -> Result<bool> {
        let key = id.as_str().to_owned();
        self.blocking(move |db| {
            db.with_conn(|conn| {
                let found: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM snapshots WHERE session_id = ?1",
                        [&key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
        })
        .await
    }
}
