//! # weft-store
//!
//! Durable session state:
//!
//! - [`SessionSnapshot`]: versioned, JSON-safe picture of a session at rest
//! - [`SessionStore`]: async persistence trait (`save/load/delete/list/has`)
//! - [`MemorySessionStore`]: process-local implementation
//! - [`SqliteSessionStore`]: `SQLite` file implementation (WAL)

#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod memory;
pub mod schema;
pub mod snapshot;
pub mod sqlite;
pub mod store;

pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::MemorySessionStore;
pub use snapshot::{CachedData, SNAPSHOT_VERSION, SessionSnapshot, SnapshotSummary};
pub use sqlite::SqliteSessionStore;
pub use store::SessionStore;

use std::sync::Arc;

use weft_core::settings::{PersistenceSettings, StoreBackend};

/// Build the store selected by settings.
pub fn from_settings(settings: &PersistenceSettings) -> Result<Arc<dyn SessionStore>> {
    Ok(match settings.backend {
        StoreBackend::Memory => Arc::new(MemorySessionStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteSessionStore::open(std::path::Path::new(
            &settings.sqlite_path,
        ))?),
    })
}
