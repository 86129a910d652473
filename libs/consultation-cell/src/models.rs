// libs/consultation-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::actor::Actor;

// ==============================================================================
// CORE CONSULTATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consultation {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "crate::slots::slot_string")]
    pub slots: Vec<u16>,
    pub price: i64,
    #[serde(default)]
    pub discount: Option<DiscountSnapshot>,
    #[serde(default)]
    pub symptoms: Option<String>,
    #[serde(default)]
    pub medical_note: Option<String>,
    pub status: ConsultationStatus,
    #[serde(default)]
    pub refund_amount: i64,
    #[serde(default)]
    pub payout_amount: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consultation {
    /// Start of the booked session: midnight of the date plus the first slot.
    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        let first = *self.slots.first()?;
        Some(slot_instant(self.date, first))
    }

    /// End of the booked session: the boundary after the last slot.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        let last = *self.slots.last()?;
        Some(slot_instant(self.date, last + 1))
    }

    pub fn involves(&self, actor: &Actor) -> bool {
        self.patient_id == actor.id || self.doctor_id == actor.id
    }
}

fn slot_instant(date: NaiveDate, slot_index: u16) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN).and_utc();
    midnight + Duration::minutes(30 * slot_index as i64)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Pending,
    Confirmed,
    Finished,
    Canceled,
    Denied,
}

impl ConsultationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsultationStatus::Finished | ConsultationStatus::Canceled | ConsultationStatus::Denied
        )
    }
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationStatus::Pending => write!(f, "pending"),
            ConsultationStatus::Confirmed => write!(f, "confirmed"),
            ConsultationStatus::Finished => write!(f, "finished"),
            ConsultationStatus::Canceled => write!(f, "canceled"),
            ConsultationStatus::Denied => write!(f, "denied"),
        }
    }
}

/// What a transition is reacting to. `SweepDue` only ever comes from the
/// lifecycle sweeper, never from a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    Confirm,
    Deny,
    Cancel,
    SweepDue,
}

impl fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionEvent::Confirm => write!(f, "confirm"),
            TransitionEvent::Deny => write!(f, "deny"),
            TransitionEvent::Cancel => write!(f, "cancel"),
            TransitionEvent::SweepDue => write!(f, "sweep_due"),
        }
    }
}

// ==============================================================================
// DISCOUNT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Vnd,
    Percent,
}

/// Discount terms captured at booking time. Later edits to the discount row
/// never change an already-booked consultation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscountSnapshot {
    pub code: String,
    pub kind: DiscountKind,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountRecord {
    pub code: String,
    pub kind: DiscountKind,
    pub value: i64,
    pub expires_at: DateTime<Utc>,
}

impl DiscountRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn snapshot(&self) -> DiscountSnapshot {
        DiscountSnapshot {
            code: self.code.clone(),
            kind: self.kind,
            value: self.value,
        }
    }
}

// ==============================================================================
// COLLABORATOR-OWNED RECORDS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorRecord {
    pub id: Uuid,
    #[serde(default)]
    pub full_name: Option<String>,
    pub fee_per_slot: i64,
    #[serde(default)]
    pub wallet_balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: Uuid,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub wallet_balance: i64,
}

/// One claimed half-hour on a doctor's day. The store enforces a unique
/// constraint on (doctor_id, date, slot); live rows are exactly the claims
/// of non-terminal consultations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotClaim {
    pub consultation_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub slot: u16,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookConsultationRequest {
    pub doctor_id: Uuid,
    /// ISO 8601 calendar date, e.g. "2026-09-14".
    pub date: String,
    /// Compact slot encoding, e.g. "28-29".
    pub slots: String,
    #[serde(default)]
    pub discount_code: Option<String>,
    #[serde(default)]
    pub symptoms: Option<String>,
    #[serde(default)]
    pub medical_note: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationDecision {
    Confirm,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondConsultationRequest {
    pub decision: ConsultationDecision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub finished: u32,
    pub expired: u32,
    pub failed: u32,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum ConsultationError {
    #[error("Consultation not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Discount code not found")]
    DiscountNotFound,

    #[error("Discount code has expired")]
    DiscountExpired,

    #[error("No working slots published for this date")]
    ScheduleNotPublished,

    #[error("Requested slots are no longer available")]
    SlotUnavailable,

    #[error("Insufficient wallet balance")]
    InsufficientFunds,

    #[error("Not authorized for this consultation")]
    Unauthorized,

    #[error("Cannot {event} a {from} consultation")]
    IllegalTransition {
        from: ConsultationStatus,
        event: TransitionEvent,
    },

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid slots: {0}")]
    InvalidSlots(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Booking failed: {0}")]
    BookingFailed(String),

    #[error("Upstream service timed out")]
    UpstreamTimeout,

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
