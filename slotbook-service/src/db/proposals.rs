//! Time proposal operations.
//!
//! Status changes only ever leave `pending`; every update is guarded by
//! `status = 'pending'` so a proposal is never answered twice.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use super::bookings::find_overlapping_booking;
use super::models::{
    AcceptOutcome, Booking, BookingStatus, NewProposal, Party, PaymentStatus, ProposalStatus,
    TimeProposal,
};
use super::{Database, to_db_time};
use crate::error::{DatabaseError, ServiceResult};

fn select_proposal(conn: &Connection, id: &str) -> rusqlite::Result<Option<TimeProposal>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM time_proposals WHERE id = ?1",
            TimeProposal::COLUMNS
        ),
        params![id],
        TimeProposal::from_row,
    )
    .optional()
}

impl Database {
    /// Persist a new pending proposal
    pub fn insert_proposal(&self, new: &NewProposal) -> ServiceResult<TimeProposal> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO time_proposals
                (id, proposer_id, provider_id, start_time, end_time, category, note, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                id,
                new.proposer_id,
                new.provider_id,
                to_db_time(&new.start_time),
                to_db_time(&new.end_time),
                new.category.as_ref(),
                new.note,
                ProposalStatus::Pending.as_ref(),
                to_db_time(&Utc::now()),
            ],
        )
        .map_err(DatabaseError::Query)?;

        select_proposal(&conn, &id)
            .map_err(DatabaseError::Query)?
            .ok_or_else(|| DatabaseError::Query(rusqlite::Error::QueryReturnedNoRows).into())
    }

    /// Get a proposal by ID
    pub fn get_proposal(&self, id: &str) -> ServiceResult<Option<TimeProposal>> {
        let conn = self.conn()?;
        select_proposal(&conn, id)
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }

    /// Pending proposals of one party, ordered by start time
    pub fn list_pending_proposals(
        &self,
        party: Party,
        party_id: &str,
    ) -> ServiceResult<Vec<TimeProposal>> {
        let column = match party {
            Party::Provider => "provider_id",
            Party::Requester => "proposer_id",
        };
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM time_proposals WHERE {} = ?1 AND status = ?2 \
                 ORDER BY start_time, created_at",
                TimeProposal::COLUMNS,
                column
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(
                params![party_id, ProposalStatus::Pending.as_ref()],
                TimeProposal::from_row,
            )
            .map_err(DatabaseError::Query)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }

    /// Move a pending proposal to a terminal status.
    /// Returns false if the proposal was no longer pending.
    pub fn close_proposal(
        &self,
        id: &str,
        status: ProposalStatus,
        responded_by: &str,
        response_note: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                r#"
                UPDATE time_proposals
                SET status = ?2, responded_by = ?3, response_note = ?4, responded_at = ?5
                WHERE id = ?1 AND status = ?6
                "#,
                params![
                    id,
                    status.as_ref(),
                    responded_by,
                    response_note,
                    to_db_time(&now),
                    ProposalStatus::Pending.as_ref(),
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows == 1)
    }

    /// Turn a pending proposal into a confirmed booking.
    ///
    /// Runs in one transaction: the proposal must still be pending and
    /// neither party may hold an overlapping confirmed booking. Any refusal
    /// rolls back before a booking row is written.
    pub fn accept_proposal(
        &self,
        proposal_id: &str,
        responded_by: &str,
        currency: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<AcceptOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let proposal = match select_proposal(&tx, proposal_id).map_err(DatabaseError::Query)? {
            Some(p) if p.status == ProposalStatus::Pending => p,
            _ => return Ok(AcceptOutcome::NoLongerPending),
        };

        if let Some(existing) = find_overlapping_booking(
            &tx,
            Party::Provider,
            &proposal.provider_id,
            &proposal.start_time,
            &proposal.end_time,
        )
        .map_err(DatabaseError::Query)?
        {
            return Ok(AcceptOutcome::ProviderConflict(existing));
        }

        if let Some(existing) = find_overlapping_booking(
            &tx,
            Party::Requester,
            &proposal.proposer_id,
            &proposal.start_time,
            &proposal.end_time,
        )
        .map_err(DatabaseError::Query)?
        {
            return Ok(AcceptOutcome::RequesterConflict(existing));
        }

        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            proposal_id: proposal.id.clone(),
            provider_id: proposal.provider_id.clone(),
            requester_id: proposal.proposer_id.clone(),
            start_time: proposal.start_time,
            end_time: proposal.end_time,
            category: proposal.category,
            payment_status: PaymentStatus::Unpaid,
            price: None,
            currency: currency.to_string(),
            status: BookingStatus::Confirmed,
            canceled_by: None,
            cancel_reason: None,
            canceled_at: None,
            created_at: now,
        };

        tx.execute(
            r#"
            INSERT INTO bookings
                (id, proposal_id, provider_id, requester_id, start_time, end_time, category,
                 payment_status, currency, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                booking.id,
                booking.proposal_id,
                booking.provider_id,
                booking.requester_id,
                to_db_time(&booking.start_time),
                to_db_time(&booking.end_time),
                booking.category.as_ref(),
                booking.payment_status.as_ref(),
                booking.currency,
                booking.status.as_ref(),
                to_db_time(&booking.created_at),
            ],
        )
        .map_err(DatabaseError::Query)?;

        tx.execute(
            r#"
            UPDATE time_proposals
            SET status = ?2, responded_by = ?3, responded_at = ?4
            WHERE id = ?1 AND status = ?5
            "#,
            params![
                proposal.id,
                ProposalStatus::Accepted.as_ref(),
                responded_by,
                to_db_time(&now),
                ProposalStatus::Pending.as_ref(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(AcceptOutcome::Accepted(booking))
    }
}
