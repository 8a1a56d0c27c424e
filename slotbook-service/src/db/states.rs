//! Conversation state store.
//!
//! One row per (identity, flow). Writes overwrite the row in place; errors
//! are returned to the caller as-is.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::models::ConversationState;
use super::{Database, to_db_time};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Get the state of one flow for an identity
    pub fn get_state(&self, external_id: &str, flow: &str) -> ServiceResult<Option<ConversationState>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT external_id, flow, step, payload, updated_at FROM conversation_states \
             WHERE external_id = ?1 AND flow = ?2",
            params![external_id, flow],
            ConversationState::from_row,
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }

    /// Insert or overwrite the state of one flow
    pub fn upsert_state(
        &self,
        external_id: &str,
        flow: &str,
        step: &str,
        payload: &serde_json::Value,
    ) -> ServiceResult<()> {
        let payload_json = serde_json::to_string(payload).map_err(DatabaseError::Serialization)?;
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO conversation_states (external_id, flow, step, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(external_id, flow) DO UPDATE SET
                step = excluded.step,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
            params![external_id, flow, step, payload_json, to_db_time(&Utc::now())],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Delete the state of one flow. Returns whether a row existed.
    pub fn clear_state(&self, external_id: &str, flow: &str) -> ServiceResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "DELETE FROM conversation_states WHERE external_id = ?1 AND flow = ?2",
                params![external_id, flow],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Number of state rows stored for an identity
    pub fn count_states(&self, external_id: &str) -> ServiceResult<usize> {
        let conn = self.conn()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM conversation_states WHERE external_id = ?1",
                params![external_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        Ok(count as usize)
    }

    /// Number of state rows across all identities
    pub fn count_all_states(&self) -> ServiceResult<usize> {
        let conn = self.conn()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM conversation_states", [], |row| {
                row.get(0)
            })
            .map_err(DatabaseError::Query)?;

        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_overwrites_single_row() {
        let db = Database::open_in_memory().unwrap();

        db.upsert_state("U1", "proposal_create", "pick_provider", &json!({"a": 1}))
            .unwrap();
        db.upsert_state("U1", "proposal_create", "pick_category", &json!({"a": 2}))
            .unwrap();

        assert_eq!(db.count_states("U1").unwrap(), 1);
        let state = db.get_state("U1", "proposal_create").unwrap().unwrap();
        assert_eq!(state.step, "pick_category");
        assert_eq!(state.payload, json!({"a": 2}));
    }

    #[test]
    fn test_flows_are_independent() {
        let db = Database::open_in_memory().unwrap();

        db.upsert_state("U1", "proposal_create", "input_time", &json!({}))
            .unwrap();
        db.upsert_state("U1", "provider_action", "pick_item", &json!({}))
            .unwrap();
        db.upsert_state("U2", "proposal_create", "confirm", &json!({}))
            .unwrap();

        assert!(db.clear_state("U1", "proposal_create").unwrap());
        assert!(!db.clear_state("U1", "proposal_create").unwrap());

        assert!(db.get_state("U1", "proposal_create").unwrap().is_none());
        assert_eq!(
            db.get_state("U1", "provider_action").unwrap().unwrap().step,
            "pick_item"
        );
        assert_eq!(db.get_state("U2", "proposal_create").unwrap().unwrap().step, "confirm");
        assert_eq!(db.count_all_states().unwrap(), 2);
    }
}
