//! # Canopy DB
//!
//! SQLite persistence for the canopy graph mirror.
//!
//! Rows in this crate are untyped (`node_type` is a string, properties are a
//! JSON document). `canopy-core` layers the typed model on top of them.

pub mod broadcast;
pub mod migrations;
pub mod pool;
pub mod queries;
pub mod timestamp;

pub use broadcast::{BroadcastSender, GraphEvent, create_broadcast_channel};
pub use pool::{DbError, DbPool, DbResult};

/// Open (or create) the database at `path` and bring its schema up to date.
pub fn init_pool(path: &str) -> DbResult<DbPool> {
    let pool = DbPool::open(path)?;
    migrations::run_migrations(&pool)?;
    Ok(pool)
}

/// In-memory database with the schema applied. Used by tests across the workspace.
pub fn init_memory_pool() -> DbResult<DbPool> {
    let pool = DbPool::in_memory()?;
    migrations::run_migrations(&pool)?;
    Ok(pool)
}
