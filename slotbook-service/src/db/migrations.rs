//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// This function is called during database initialization to ensure
/// the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Party profiles
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'requester',
            language TEXT NOT NULL DEFAULT 'zh',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_profiles_role ON profiles(role);

        -- Conversation state: one row per (identity, flow)
        CREATE TABLE IF NOT EXISTS conversation_states (
            external_id TEXT NOT NULL,
            flow TEXT NOT NULL,
            step TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL,
            PRIMARY KEY (external_id, flow)
        );

        -- Time proposals
        CREATE TABLE IF NOT EXISTS time_proposals (
            id TEXT PRIMARY KEY,
            proposer_id TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            category TEXT NOT NULL,
            note TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            responded_by TEXT,
            response_note TEXT,
            responded_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (proposer_id) REFERENCES profiles(id),
            FOREIGN KEY (provider_id) REFERENCES profiles(id)
        );

        CREATE INDEX IF NOT EXISTS idx_proposals_proposer ON time_proposals(proposer_id, status);
        CREATE INDEX IF NOT EXISTS idx_proposals_provider ON time_proposals(provider_id, status);

        -- Bookings (canceled rows are kept)
        CREATE TABLE IF NOT EXISTS bookings (
            id TEXT PRIMARY KEY,
            proposal_id TEXT NOT NULL UNIQUE,
            provider_id TEXT NOT NULL,
            requester_id TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            category TEXT NOT NULL,
            payment_status TEXT NOT NULL DEFAULT 'unpaid',
            price INTEGER,
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'confirmed',
            canceled_by TEXT,
            cancel_reason TEXT,
            canceled_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (proposal_id) REFERENCES time_proposals(id),
            FOREIGN KEY (provider_id) REFERENCES profiles(id),
            FOREIGN KEY (requester_id) REFERENCES profiles(id)
        );

        CREATE INDEX IF NOT EXISTS idx_bookings_provider ON bookings(provider_id, status, start_time);
        CREATE INDEX IF NOT EXISTS idx_bookings_requester ON bookings(requester_id, status, start_time);

        -- Price rules keyed by duration bucket and class mode
        CREATE TABLE IF NOT EXISTS price_rules (
            bucket TEXT NOT NULL,
            category TEXT NOT NULL,
            amount INTEGER NOT NULL,
            PRIMARY KEY (bucket, category)
        );

        -- Runtime setting overrides
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
    "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}
