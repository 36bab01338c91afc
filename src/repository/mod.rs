//! Repository layer for session persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking
//! against SQLite through diesel-async's SyncConnectionWrapper.

pub mod models;
pub mod pool;
pub mod session;

pub use pool::{AsyncSqlitePool, DieselError};
pub use session::{SessionRepository, SessionStoreError, SessionSummary};

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
