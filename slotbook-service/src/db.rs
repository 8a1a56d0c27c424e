//! Database module for SQLite operations.
//!
//! This module provides the `Database` struct and all database operations
//! organized into submodules by domain.

mod bookings;
mod migrations;
pub mod models;
mod price_rules;
mod profiles;
mod proposals;
mod settings;
mod states;

pub use models::{
    AcceptOutcome, Booking, BookingStatus, CategoryMode, ConversationState, DurationBucket,
    NewProfile, NewProposal, Party, PaymentStatus, PriceRule, Profile, ProfileField,
    ProposalStatus, Role, TimeProposal,
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{DatabaseError, ServiceError, ServiceResult};

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> ServiceResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceError::Database(DatabaseError::Connection(
                    rusqlite::Error::ToSqlConversionFailure(Box::new(e)),
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        Self::init(conn)
    }

    fn init(conn: Connection) -> ServiceResult<Self> {
        // Run all migrations
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Poisoned)
    }
}

/// Timestamps are stored as second-precision RFC 3339 UTC strings
/// (`2026-01-03T07:12:34Z`) so that text comparison orders them correctly.
pub(crate) fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn from_db_time(idx: usize, value: String) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_time_round_trip_is_sortable() {
        let early = Utc.with_ymd_and_hms(2026, 1, 3, 7, 5, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();

        assert_eq!(to_db_time(&early), "2026-01-03T07:05:00Z");
        assert!(to_db_time(&early) < to_db_time(&late));
        assert_eq!(from_db_time(0, to_db_time(&late)).unwrap(), late);
    }

    #[test]
    fn test_open_on_disk_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("slotbook.db");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert!(db.list_profiles_by_role(Role::Provider).unwrap().is_empty());

        // Re-opening runs the idempotent migrations again
        drop(db);
        Database::open(&path).unwrap();
    }
}
