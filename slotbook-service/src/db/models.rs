//! Database model structs.
//!
//! This module contains the data structures for database records and the
//! closed vocabularies (roles, statuses, class modes) stored in them.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::from_db_time;
use crate::i18n::Language;

/// Party role
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Requester,
    Provider,
    /// Registered as a provider, waiting for supervisor approval
    ProviderPending,
    Supervisor,
}

/// Class mode of a proposal or booking
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CategoryMode {
    Online,
    InPerson,
}

impl CategoryMode {
    /// Menu order used by the proposal wizard (1-based in the prompt)
    pub const ALL: [CategoryMode; 2] = [CategoryMode::Online, CategoryMode::InPerson];

    /// Normalize any external spelling to the canonical mode.
    ///
    /// Accepts the canonical names, legacy spellings, the single-letter
    /// menu labels and the 1-based menu index.
    pub fn from_external(input: &str) -> Option<Self> {
        let normalized = input.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "1" | "a" | "online" | "remote" | "線上" | "視訊" => Some(CategoryMode::Online),
            "2" | "b" | "in_person" | "inperson" | "offline" | "onsite" | "實體" | "面授" => {
                Some(CategoryMode::InPerson)
            }
            _ => None,
        }
    }

    /// Message key of the localized label
    pub fn label_key(&self) -> &'static str {
        match self {
            CategoryMode::Online => "category-online",
            CategoryMode::InPerson => "category-in_person",
        }
    }
}

/// Proposal status. `Pending` moves to exactly one terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
    Canceled,
}

/// Booking status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Canceled,
}

/// Payment status of a booking
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

/// Duration bucket used as part of the price rule key
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DurationBucket {
    Short,
    Long,
}

impl DurationBucket {
    /// `Short` when the duration is at or under the threshold
    pub fn for_minutes(minutes: i64, short_max_minutes: i64) -> Self {
        if minutes <= short_max_minutes {
            DurationBucket::Short
        } else {
            DurationBucket::Long
        }
    }
}

/// Which side of a booking a party is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Provider,
    Requester,
}

impl Party {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Party::Provider => "provider_id",
            Party::Requester => "requester_id",
        }
    }
}

fn parse_enum<T: std::str::FromStr>(idx: usize, value: String) -> Result<T, rusqlite::Error> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown enum value '{}'", value).into(),
        )
    })
}

/// Party profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    /// Identity token assigned by the messaging transport
    pub external_id: String,
    pub name: String,
    pub role: Role,
    pub language: Language,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub(crate) const COLUMNS: &'static str = "id, external_id, name, role, language, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            external_id: row.get(1)?,
            name: row.get(2)?,
            role: parse_enum(3, row.get(3)?)?,
            language: parse_enum(4, row.get(4)?)?,
            created_at: from_db_time(5, row.get(5)?)?,
        })
    }
}

/// Fields needed to create a profile
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub external_id: String,
    pub name: String,
    pub role: Role,
    pub language: Language,
}

/// Mutable profile fields
#[derive(Debug, Clone, Copy)]
pub enum ProfileField {
    Role(Role),
    Language(Language),
}

/// Persisted step and payload of one flow for one identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub external_id: String,
    pub flow: String,
    pub step: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let payload_str: String = row.get(3)?;
        Ok(Self {
            external_id: row.get(0)?,
            flow: row.get(1)?,
            step: row.get(2)?,
            payload: serde_json::from_str(&payload_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
            })?,
            updated_at: from_db_time(4, row.get(4)?)?,
        })
    }
}

/// A requester's offer of a slot to a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeProposal {
    pub id: String,
    pub proposer_id: String,
    pub provider_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub category: CategoryMode,
    pub note: Option<String>,
    pub status: ProposalStatus,
    pub responded_by: Option<String>,
    pub response_note: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TimeProposal {
    pub(crate) const COLUMNS: &'static str = "id, proposer_id, provider_id, start_time, end_time, \
         category, note, status, responded_by, response_note, responded_at, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let responded_at: Option<String> = row.get(10)?;
        Ok(Self {
            id: row.get(0)?,
            proposer_id: row.get(1)?,
            provider_id: row.get(2)?,
            start_time: from_db_time(3, row.get(3)?)?,
            end_time: from_db_time(4, row.get(4)?)?,
            category: parse_enum(5, row.get(5)?)?,
            note: row.get(6)?,
            status: parse_enum(7, row.get(7)?)?,
            responded_by: row.get(8)?,
            response_note: row.get(9)?,
            responded_at: responded_at.map(|s| from_db_time(10, s)).transpose()?,
            created_at: from_db_time(11, row.get(11)?)?,
        })
    }
}

/// Fields needed to create a proposal
#[derive(Debug, Clone)]
pub struct NewProposal {
    pub proposer_id: String,
    pub provider_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub category: CategoryMode,
    pub note: Option<String>,
}

/// A confirmed slot created from an accepted proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub proposal_id: String,
    pub provider_id: String,
    pub requester_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub category: CategoryMode,
    pub payment_status: PaymentStatus,
    pub price: Option<i64>,
    pub currency: String,
    pub status: BookingStatus,
    pub canceled_by: Option<String>,
    pub cancel_reason: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub(crate) const COLUMNS: &'static str = "id, proposal_id, provider_id, requester_id, \
         start_time, end_time, category, payment_status, price, currency, status, canceled_by, \
         cancel_reason, canceled_at, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let canceled_at: Option<String> = row.get(13)?;
        Ok(Self {
            id: row.get(0)?,
            proposal_id: row.get(1)?,
            provider_id: row.get(2)?,
            requester_id: row.get(3)?,
            start_time: from_db_time(4, row.get(4)?)?,
            end_time: from_db_time(5, row.get(5)?)?,
            category: parse_enum(6, row.get(6)?)?,
            payment_status: parse_enum(7, row.get(7)?)?,
            price: row.get(8)?,
            currency: row.get(9)?,
            status: parse_enum(10, row.get(10)?)?,
            canceled_by: row.get(11)?,
            cancel_reason: row.get(12)?,
            canceled_at: canceled_at.map(|s| from_db_time(13, s)).transpose()?,
            created_at: from_db_time(14, row.get(14)?)?,
        })
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// Result of trying to turn a pending proposal into a booking
#[derive(Debug, Clone)]
pub enum AcceptOutcome {
    Accepted(Booking),
    /// The proposal was answered or withdrawn in the meantime
    NoLongerPending,
    /// The provider already has an overlapping confirmed booking
    ProviderConflict(Booking),
    /// The requester already has an overlapping confirmed booking
    RequesterConflict(Booking),
}

/// Price for a (duration bucket, class mode) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRule {
    pub bucket: DurationBucket,
    pub category: CategoryMode,
    pub amount: i64,
}
