//! Booking operations.
//!
//! Bookings are never deleted; cancellation flips the status and records
//! who canceled and why.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::{Booking, BookingStatus, Party, PaymentStatus};
use super::{Database, to_db_time};
use crate::error::{DatabaseError, ServiceResult};

/// First confirmed booking of a party that overlaps `[start, end)`
pub(super) fn find_overlapping_booking(
    conn: &Connection,
    party: Party,
    party_id: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM bookings \
             WHERE {} = ?1 AND status = ?2 AND start_time < ?3 AND end_time > ?4 \
             ORDER BY start_time LIMIT 1",
            Booking::COLUMNS,
            party.column()
        ),
        params![
            party_id,
            BookingStatus::Confirmed.as_ref(),
            to_db_time(end),
            to_db_time(start),
        ],
        Booking::from_row,
    )
    .optional()
}

impl Database {
    /// Confirmed bookings where the party sits on the given side, by start time
    pub fn list_confirmed_bookings(&self, party: Party, party_id: &str) -> ServiceResult<Vec<Booking>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM bookings WHERE {} = ?1 AND status = ?2 ORDER BY start_time, created_at",
                Booking::COLUMNS,
                party.column()
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(
                params![party_id, BookingStatus::Confirmed.as_ref()],
                Booking::from_row,
            )
            .map_err(DatabaseError::Query)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }

    /// Get a booking by ID
    pub fn get_booking(&self, id: &str) -> ServiceResult<Option<Booking>> {
        let conn = self.conn()?;

        conn.query_row(
            &format!("SELECT {} FROM bookings WHERE id = ?1", Booking::COLUMNS),
            params![id],
            Booking::from_row,
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }

    /// Cancel a confirmed booking. Returns false if it was already canceled.
    pub fn cancel_booking(
        &self,
        id: &str,
        canceled_by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                r#"
                UPDATE bookings
                SET status = ?2, canceled_by = ?3, cancel_reason = ?4, canceled_at = ?5
                WHERE id = ?1 AND status = ?6
                "#,
                params![
                    id,
                    BookingStatus::Canceled.as_ref(),
                    canceled_by,
                    reason,
                    to_db_time(&now),
                    BookingStatus::Confirmed.as_ref(),
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows == 1)
    }

    /// Confirmed, unpaid bookings of a provider, by start time
    pub fn list_unpaid_bookings(&self, provider_id: &str) -> ServiceResult<Vec<Booking>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM bookings \
                 WHERE provider_id = ?1 AND status = ?2 AND payment_status = ?3 \
                 ORDER BY start_time",
                Booking::COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(
                params![
                    provider_id,
                    BookingStatus::Confirmed.as_ref(),
                    PaymentStatus::Unpaid.as_ref()
                ],
                Booking::from_row,
            )
            .map_err(DatabaseError::Query)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }

    /// Record the computed price on a booking
    pub fn set_booking_price(&self, id: &str, amount: i64, currency: &str) -> ServiceResult<()> {
        let conn = self.conn()?;

        conn.execute(
            "UPDATE bookings SET price = ?2, currency = ?3 WHERE id = ?1",
            params![id, amount, currency],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }
}
