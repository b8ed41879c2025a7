//! Database layer for Wayfare trip chat.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. The schema mirrors the parts of the travel
//! app's relational model that the chat subsystem reads (users, trips,
//! attendees) plus the two tables it owns (messages and read markers).

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
