// libs/consultation-cell/src/repository.rs
//
// Narrow data-access contracts over the REST store, one per concern.
// Services talk to these instead of building query strings themselves.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::store::StoreClient;
use shared_models::actor::{Actor, ActorRole};

use crate::models::{
    Consultation, ConsultationError, ConsultationStatus, DiscountRecord, DoctorRecord,
    PatientRecord, SlotClaim,
};

const WALLET_CAS_ATTEMPTS: u32 = 3;

fn store_error(context: &str, err: anyhow::Error) -> ConsultationError {
    if StoreClient::is_timeout(&err) {
        return ConsultationError::UpstreamTimeout;
    }
    ConsultationError::DatabaseError(format!("{}: {}", context, err))
}

fn status_filter(statuses: &[ConsultationStatus]) -> String {
    let tokens: Vec<String> = statuses.iter().map(|status| status.to_string()).collect();
    format!("in.({})", tokens.join(","))
}

// ==============================================================================
// CONSULTATIONS
// ==============================================================================

#[derive(Clone)]
pub struct ConsultationRepository {
    store: Arc<StoreClient>,
}

impl ConsultationRepository {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    pub async fn find(&self, consultation_id: Uuid) -> Result<Consultation, ConsultationError> {
        let path = format!("/rest/v1/consultations?id=eq.{}&select=*", consultation_id);

        let rows: Vec<Consultation> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| store_error("Consultation lookup failed", e))?;

        rows.into_iter().next().ok_or(ConsultationError::NotFound)
    }

    /// All consultations of one doctor on one date with any of the given
    /// statuses. Feeds the free-slot computation.
    pub async fn for_doctor_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        statuses: &[ConsultationStatus],
    ) -> Result<Vec<Consultation>, ConsultationError> {
        let path = format!(
            "/rest/v1/consultations?doctor_id=eq.{}&date=eq.{}&status={}&select=*",
            doctor_id,
            date.format("%Y-%m-%d"),
            status_filter(statuses)
        );

        self.store
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| store_error("Consultation day query failed", e))
    }

    /// Everything the sweeper cares about: pending and confirmed records.
    pub async fn open_consultations(&self) -> Result<Vec<Consultation>, ConsultationError> {
        let path = format!(
            "/rest/v1/consultations?status={}&select=*&order=date.asc",
            status_filter(&[ConsultationStatus::Pending, ConsultationStatus::Confirmed])
        );

        self.store
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| store_error("Open consultation query failed", e))
    }

    /// The caller's own consultations, newest first.
    pub async fn list_for_actor(
        &self,
        actor: &Actor,
        status: Option<ConsultationStatus>,
    ) -> Result<Vec<Consultation>, ConsultationError> {
        let side = match actor.role {
            ActorRole::Patient => "patient_id",
            ActorRole::Doctor => "doctor_id",
        };

        let mut path = format!(
            "/rest/v1/consultations?{}=eq.{}&select=*&order=created_at.desc",
            side, actor.id
        );
        if let Some(status) = status {
            path.push_str(&format!("&status=eq.{}", status));
        }

        self.store
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| store_error("Consultation listing failed", e))
    }

    pub async fn insert(&self, consultation: &Consultation) -> Result<Consultation, ConsultationError> {
        let body = serde_json::to_value(consultation)
            .map_err(|e| ConsultationError::DatabaseError(format!("Serialization failed: {}", e)))?;

        let rows: Vec<Consultation> = self
            .store
            .request_with_prefer(
                Method::POST,
                "/rest/v1/consultations",
                Some(body),
                Some("return=representation"),
            )
            .await
            .map_err(|e| store_error("Consultation insert failed", e))?;

        rows.into_iter().next().ok_or_else(|| {
            ConsultationError::DatabaseError("Consultation insert returned no row".to_string())
        })
    }

    /// Conditional status write: only applies while the row still has the
    /// expected status. `None` means a concurrent transition won the race.
    pub async fn cas_update_status(
        &self,
        consultation_id: Uuid,
        expected: ConsultationStatus,
        update: Value,
    ) -> Result<Option<Consultation>, ConsultationError> {
        let path = format!(
            "/rest/v1/consultations?id=eq.{}&status=eq.{}",
            consultation_id, expected
        );

        let rows: Vec<Consultation> = self
            .store
            .request_with_prefer(
                Method::PATCH,
                &path,
                Some(update),
                Some("return=representation"),
            )
            .await
            .map_err(|e| store_error("Consultation status update failed", e))?;

        Ok(rows.into_iter().next())
    }

    /// Insert one claim row per requested slot, in a single statement. A 409
    /// from the unique (doctor_id, date, slot) constraint means a concurrent
    /// booking already holds one of them.
    pub async fn claim_slots(&self, claims: &[SlotClaim]) -> Result<(), ConsultationError> {
        let body = serde_json::to_value(claims)
            .map_err(|e| ConsultationError::DatabaseError(format!("Serialization failed: {}", e)))?;

        let result: Result<Value, anyhow::Error> = self
            .store
            .request_with_prefer(
                Method::POST,
                "/rest/v1/consultation_slots",
                Some(body),
                Some("return=representation"),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if StoreClient::error_status(&e) == Some(409) => {
                debug!("Slot claim lost a uniqueness race: {}", e);
                Err(ConsultationError::SlotUnavailable)
            }
            Err(e) => Err(store_error("Slot claim failed", e)),
        }
    }

    /// Drop the claims of a consultation that reached a terminal state (or
    /// whose booking is being rolled back), freeing the slots for rebooking.
    pub async fn release_claims(&self, consultation_id: Uuid) -> Result<(), ConsultationError> {
        let path = format!(
            "/rest/v1/consultation_slots?consultation_id=eq.{}",
            consultation_id
        );

        let _: Value = self
            .store
            .request_with_prefer(Method::DELETE, &path, None, Some("return=representation"))
            .await
            .map_err(|e| store_error("Slot release failed", e))?;

        Ok(())
    }
}

// ==============================================================================
// PATIENT / DOCTOR ACCOUNTS
// ==============================================================================

#[derive(Debug, Deserialize)]
struct WalletRow {
    wallet_balance: i64,
}

#[derive(Clone)]
pub struct AccountRepository {
    store: Arc<StoreClient>,
}

impl AccountRepository {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    pub async fn get_doctor(&self, doctor_id: Uuid) -> Result<DoctorRecord, ConsultationError> {
        let path = format!("/rest/v1/doctors?id=eq.{}&select=*", doctor_id);

        let rows: Vec<DoctorRecord> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| store_error("Doctor lookup failed", e))?;

        rows.into_iter()
            .next()
            .ok_or(ConsultationError::DoctorNotFound)
    }

    pub async fn get_patient(&self, patient_id: Uuid) -> Result<PatientRecord, ConsultationError> {
        let path = format!("/rest/v1/patients?id=eq.{}&select=*", patient_id);

        let rows: Vec<PatientRecord> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| store_error("Patient lookup failed", e))?;

        rows.into_iter()
            .next()
            .ok_or(ConsultationError::PatientNotFound)
    }

    /// Take `amount` out of a patient wallet, refusing overdrafts.
    pub async fn debit_patient_wallet(
        &self,
        patient_id: Uuid,
        amount: i64,
    ) -> Result<i64, ConsultationError> {
        self.cas_adjust("patients", patient_id, -amount, true).await
    }

    pub async fn credit_patient_wallet(
        &self,
        patient_id: Uuid,
        amount: i64,
    ) -> Result<i64, ConsultationError> {
        self.cas_adjust("patients", patient_id, amount, false).await
    }

    pub async fn credit_doctor_wallet(
        &self,
        doctor_id: Uuid,
        amount: i64,
    ) -> Result<i64, ConsultationError> {
        self.cas_adjust("doctors", doctor_id, amount, false).await
    }

    /// Optimistic wallet mutation: read the balance, write conditionally on
    /// the value read, retry on a lost race. An empty representation means
    /// somebody else moved the balance first.
    async fn cas_adjust(
        &self,
        table: &str,
        account_id: Uuid,
        delta: i64,
        require_funds: bool,
    ) -> Result<i64, ConsultationError> {
        for attempt in 1..=WALLET_CAS_ATTEMPTS {
            let read_path = format!(
                "/rest/v1/{}?id=eq.{}&select=wallet_balance",
                table, account_id
            );

            let rows: Vec<WalletRow> = self
                .store
                .request(Method::GET, &read_path, None)
                .await
                .map_err(|e| store_error("Wallet read failed", e))?;

            let current = match rows.first() {
                Some(row) => row.wallet_balance,
                None if table == "doctors" => return Err(ConsultationError::DoctorNotFound),
                None => return Err(ConsultationError::PatientNotFound),
            };

            if require_funds && current + delta < 0 {
                return Err(ConsultationError::InsufficientFunds);
            }

            let write_path = format!(
                "/rest/v1/{}?id=eq.{}&wallet_balance=eq.{}",
                table, account_id, current
            );
            let updated: Vec<WalletRow> = self
                .store
                .request_with_prefer(
                    Method::PATCH,
                    &write_path,
                    Some(json!({ "wallet_balance": current + delta })),
                    Some("return=representation"),
                )
                .await
                .map_err(|e| store_error("Wallet update failed", e))?;

            if let Some(row) = updated.first() {
                return Ok(row.wallet_balance);
            }

            warn!(
                "Wallet update on {} {} lost a race, attempt {}/{}",
                table, account_id, attempt, WALLET_CAS_ATTEMPTS
            );
            tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempt as u64)).await;
        }

        Err(ConsultationError::DatabaseError(format!(
            "Wallet update on {} {} kept losing races",
            table, account_id
        )))
    }
}

// ==============================================================================
// DISCOUNTS
// ==============================================================================

#[derive(Clone)]
pub struct DiscountRepository {
    store: Arc<StoreClient>,
}

impl DiscountRepository {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    pub async fn find(&self, code: &str) -> Result<DiscountRecord, ConsultationError> {
        let path = format!("/rest/v1/discounts?code=eq.{}&select=*", code);

        let rows: Vec<DiscountRecord> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| store_error("Discount lookup failed", e))?;

        rows.into_iter()
            .next()
            .ok_or(ConsultationError::DiscountNotFound)
    }
}

// ==============================================================================
// BOOKING LOCKS
// ==============================================================================

/// Advisory per-(doctor, date) lock held in the store, so bookings for the
/// same day are serialized across every running instance. The slot-claim
/// unique constraint stays the hard guarantee underneath; this lock keeps
/// the free-slot check and the claim from interleaving in the common case.
#[derive(Clone)]
pub struct BookingLockRepository {
    store: Arc<StoreClient>,
    lock_timeout_seconds: u64,
}

impl BookingLockRepository {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self {
            store,
            lock_timeout_seconds: 30,
        }
    }

    pub fn lock_key(doctor_id: Uuid, date: NaiveDate) -> String {
        format!("booking_{}_{}", doctor_id, date.format("%Y-%m-%d"))
    }

    /// Try to take the lock. `false` means another booking holds it.
    pub async fn acquire(&self, lock_key: &str, doctor_id: Uuid) -> Result<bool, ConsultationError> {
        match self.try_insert(lock_key, doctor_id).await? {
            true => Ok(true),
            false => {
                // Lock row exists; clear it if its holder timed out
                if self.cleanup_expired(lock_key).await? {
                    self.try_insert(lock_key, doctor_id).await
                } else {
                    Ok(false)
                }
            }
        }
    }

    pub async fn release(&self, lock_key: &str) -> Result<(), ConsultationError> {
        let path = format!("/rest/v1/booking_locks?lock_key=eq.{}", lock_key);

        let _: Value = self
            .store
            .request_with_prefer(Method::DELETE, &path, None, Some("return=representation"))
            .await
            .map_err(|e| store_error("Lock release failed", e))?;

        debug!("Booking lock released: {}", lock_key);
        Ok(())
    }

    async fn try_insert(&self, lock_key: &str, doctor_id: Uuid) -> Result<bool, ConsultationError> {
        let now = Utc::now();
        let lock_data = json!({
            "lock_key": lock_key,
            "doctor_id": doctor_id,
            "acquired_at": now.to_rfc3339(),
            "expires_at": (now + chrono::Duration::seconds(self.lock_timeout_seconds as i64)).to_rfc3339(),
        });

        let result: Result<Value, anyhow::Error> = self
            .store
            .request_with_prefer(
                Method::POST,
                "/rest/v1/booking_locks",
                Some(lock_data),
                Some("return=representation"),
            )
            .await;

        match result {
            Ok(_) => {
                debug!("Booking lock acquired: {}", lock_key);
                Ok(true)
            }
            Err(e) if StoreClient::error_status(&e) == Some(409) => Ok(false),
            Err(e) => Err(store_error("Lock acquire failed", e)),
        }
    }

    /// Delete the lock row if its expiry has passed. Returns whether a
    /// retry is worth it.
    async fn cleanup_expired(&self, lock_key: &str) -> Result<bool, ConsultationError> {
        #[derive(Deserialize)]
        struct LockRow {
            expires_at: chrono::DateTime<Utc>,
        }

        let path = format!(
            "/rest/v1/booking_locks?lock_key=eq.{}&select=expires_at",
            lock_key
        );
        let rows: Vec<LockRow> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| store_error("Lock check failed", e))?;

        match rows.first() {
            Some(row) if row.expires_at < Utc::now() => {
                warn!("Clearing expired booking lock: {}", lock_key);
                self.release(lock_key).await?;
                Ok(true)
            }
            Some(_) => Ok(false),
            // Holder released it between our insert attempt and this check
            None => Ok(true),
        }
    }
}
