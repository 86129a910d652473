// libs/consultation-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::store::StoreClient;
use shared_models::actor::{Actor, ActorRole};

use crate::models::{
    BookConsultationRequest, Consultation, ConsultationDecision, ConsultationError,
    ConsultationStatus, DiscountSnapshot, SlotClaim, TransitionEvent,
};
use crate::repository::{
    AccountRepository, BookingLockRepository, ConsultationRepository, DiscountRepository,
};
use crate::services::availability::{parse_consultation_date, AvailabilityService};
use crate::services::lifecycle::ConsultationLifecycleService;
use crate::services::schedule::ScheduleClient;
use crate::services::settlement;
use crate::services::state::TransitionActor;
use crate::slots::{decode_slots, SLOTS_PER_DAY};

const LOCK_RETRY_ATTEMPTS: u32 = 3;

pub struct ConsultationBookingService {
    consultations: ConsultationRepository,
    accounts: AccountRepository,
    discounts: DiscountRepository,
    locks: BookingLockRepository,
    availability: AvailabilityService,
    schedule: ScheduleClient,
    lifecycle: ConsultationLifecycleService,
}

impl ConsultationBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let store = Arc::new(StoreClient::new(config));

        Self {
            consultations: ConsultationRepository::new(Arc::clone(&store)),
            accounts: AccountRepository::new(Arc::clone(&store)),
            discounts: DiscountRepository::new(Arc::clone(&store)),
            locks: BookingLockRepository::new(Arc::clone(&store)),
            availability: AvailabilityService::new(config, Arc::clone(&store)),
            schedule: ScheduleClient::new(config),
            lifecycle: ConsultationLifecycleService::new(config, store),
        }
    }

    /// Book a pending consultation for the requesting patient.
    pub async fn book(
        &self,
        actor: &Actor,
        request: BookConsultationRequest,
    ) -> Result<Consultation, ConsultationError> {
        info!(
            "Booking consultation for patient {} with doctor {}",
            actor.id, request.doctor_id
        );

        // **Step 1: Validate the request shape**
        let date = parse_consultation_date(&request.date)?;
        if date < Utc::now().date_naive() {
            return Err(ConsultationError::InvalidDate(format!(
                "{} is in the past",
                request.date
            )));
        }

        let slots = decode_slots(&request.slots)
            .map_err(|e| ConsultationError::InvalidSlots(e.to_string()))?;
        if slots.is_empty() {
            return Err(ConsultationError::ValidationError(
                "At least one slot must be requested".to_string(),
            ));
        }
        if let Some(&last) = slots.last() {
            if last >= SLOTS_PER_DAY {
                return Err(ConsultationError::InvalidSlots(format!(
                    "Slot {} is past the end of the day",
                    last
                )));
            }
        }

        // **Step 2: Resolve the parties and the discount, then price the booking**
        let doctor = self.accounts.get_doctor(request.doctor_id).await?;
        self.accounts.get_patient(actor.id).await?;
        let discount = self
            .resolve_discount(request.discount_code.as_deref())
            .await?;
        let price = settlement::consultation_price(doctor.fee_per_slot, slots.len(), discount.as_ref());

        let now = Utc::now();
        let consultation = Consultation {
            id: Uuid::new_v4(),
            patient_id: actor.id,
            doctor_id: doctor.id,
            date,
            slots,
            price,
            discount,
            symptoms: request.symptoms,
            medical_note: request.medical_note,
            status: ConsultationStatus::Pending,
            refund_amount: 0,
            payout_amount: 0,
            created_at: now,
            updated_at: now,
        };

        // **Step 3: Run the funded part on its own task**
        // Once money starts moving the sequence must run to completion or
        // roll back, even if the client hangs up mid-request.
        let consultations = self.consultations.clone();
        let accounts = self.accounts.clone();
        let locks = self.locks.clone();
        let availability = self.availability.clone();
        let record = consultation.clone();

        let handle = tokio::spawn(async move {
            Self::execute_booking(consultations, accounts, locks, availability, record).await
        });

        let booked = handle.await.map_err(|e| {
            error!("Booking task for patient {} aborted: {}", actor.id, e);
            ConsultationError::BookingFailed("Booking task aborted".to_string())
        })??;

        // **Step 4: Tell the schedule service about the reservation, best effort**
        let schedule = self.schedule.clone();
        let reserved = booked.clone();
        tokio::spawn(async move {
            if let Err(e) = schedule
                .publish_reservation(reserved.id, reserved.doctor_id, reserved.date, &reserved.slots)
                .await
            {
                warn!(
                    "Reservation event for consultation {} was not delivered: {}",
                    reserved.id, e
                );
            }
        });

        info!(
            "Consultation {} booked for {} at price {}",
            booked.id, booked.date, booked.price
        );
        Ok(booked)
    }

    /// Patient-side cancellation.
    pub async fn cancel(
        &self,
        actor: &Actor,
        consultation_id: Uuid,
    ) -> Result<Consultation, ConsultationError> {
        debug!("Cancelling consultation {} for {}", consultation_id, actor.id);

        self.lifecycle
            .apply_event(
                consultation_id,
                TransitionEvent::Cancel,
                &Self::transition_actor(actor),
            )
            .await
    }

    /// Doctor-side response to a pending request.
    pub async fn respond(
        &self,
        actor: &Actor,
        consultation_id: Uuid,
        decision: ConsultationDecision,
    ) -> Result<Consultation, ConsultationError> {
        debug!(
            "Doctor {} responding {:?} to consultation {}",
            actor.id, decision, consultation_id
        );

        let event = match decision {
            ConsultationDecision::Confirm => TransitionEvent::Confirm,
            ConsultationDecision::Deny => TransitionEvent::Deny,
        };

        self.lifecycle
            .apply_event(consultation_id, event, &Self::transition_actor(actor))
            .await
    }

    /// A consultation is visible to its patient and its doctor, nobody else.
    pub async fn get_consultation(
        &self,
        actor: &Actor,
        consultation_id: Uuid,
    ) -> Result<Consultation, ConsultationError> {
        let consultation = self.consultations.find(consultation_id).await?;

        if !consultation.involves(actor) {
            warn!(
                "Actor {} requested consultation {} they are not part of",
                actor.id, consultation_id
            );
            return Err(ConsultationError::Unauthorized);
        }

        Ok(consultation)
    }

    pub async fn list_consultations(
        &self,
        actor: &Actor,
        status: Option<ConsultationStatus>,
    ) -> Result<Vec<Consultation>, ConsultationError> {
        self.consultations.list_for_actor(actor, status).await
    }

    pub async fn free_slots(
        &self,
        doctor_id: Uuid,
        date: &str,
    ) -> Result<Vec<u16>, ConsultationError> {
        let date = parse_consultation_date(date)?;
        self.availability.free_slots(doctor_id, date).await
    }

    fn transition_actor(actor: &Actor) -> TransitionActor {
        match actor.role {
            ActorRole::Patient => TransitionActor::Patient(actor.id),
            ActorRole::Doctor => TransitionActor::Doctor(actor.id),
        }
    }

    async fn resolve_discount(
        &self,
        code: Option<&str>,
    ) -> Result<Option<DiscountSnapshot>, ConsultationError> {
        let code = match code {
            Some(code) => code,
            None => return Ok(None),
        };

        let record = self.discounts.find(code).await?;
        if record.is_expired(Utc::now()) {
            debug!("Discount {} expired at {}", record.code, record.expires_at);
            return Err(ConsultationError::DiscountExpired);
        }

        Ok(Some(record.snapshot()))
    }

    /// The funded booking sequence. Owns its collaborators so the caller can
    /// run it on a detached task.
    async fn execute_booking(
        consultations: ConsultationRepository,
        accounts: AccountRepository,
        locks: BookingLockRepository,
        availability: AvailabilityService,
        consultation: Consultation,
    ) -> Result<Consultation, ConsultationError> {
        let lock_key = BookingLockRepository::lock_key(consultation.doctor_id, consultation.date);

        for attempt in 1..=LOCK_RETRY_ATTEMPTS {
            if locks.acquire(&lock_key, consultation.doctor_id).await? {
                let result =
                    Self::book_under_lock(&consultations, &accounts, &availability, &consultation)
                        .await;

                if let Err(e) = locks.release(&lock_key).await {
                    warn!("Booking lock {} was not released cleanly: {}", lock_key, e);
                }

                return result;
            }

            debug!(
                "Booking lock {} busy, attempt {}/{}",
                lock_key, attempt, LOCK_RETRY_ATTEMPTS
            );
            tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempt as u64)).await;
        }

        // Another booking kept the day locked for the whole retry window
        Err(ConsultationError::SlotUnavailable)
    }

    /// Check, debit, claim, persist. Runs with the day lock held; every exit
    /// after the debit either keeps the money's new home or puts it back.
    async fn book_under_lock(
        consultations: &ConsultationRepository,
        accounts: &AccountRepository,
        availability: &AvailabilityService,
        consultation: &Consultation,
    ) -> Result<Consultation, ConsultationError> {
        // **Step 1: Free-slot check under the lock**
        let free = availability
            .free_slots(consultation.doctor_id, consultation.date)
            .await?;
        if let Some(taken) = consultation
            .slots
            .iter()
            .copied()
            .find(|slot| !free.contains(slot))
        {
            debug!(
                "Slot {} on {} for doctor {} is not free",
                taken, consultation.date, consultation.doctor_id
            );
            return Err(ConsultationError::SlotUnavailable);
        }

        // **Step 2: Take the money; the debit itself refuses overdrafts**
        accounts
            .debit_patient_wallet(consultation.patient_id, consultation.price)
            .await?;

        // **Step 3: Claim the slots; the unique constraint has the last word**
        let claims: Vec<SlotClaim> = consultation
            .slots
            .iter()
            .map(|&slot| SlotClaim {
                consultation_id: consultation.id,
                doctor_id: consultation.doctor_id,
                date: consultation.date,
                slot,
            })
            .collect();

        if let Err(e) = consultations.claim_slots(&claims).await {
            warn!(
                "Slot claim for consultation {} failed, refunding debit: {}",
                consultation.id, e
            );
            Self::refund_debit(accounts, consultation).await;
            return Err(match e {
                ConsultationError::SlotUnavailable => ConsultationError::SlotUnavailable,
                other => ConsultationError::BookingFailed(other.to_string()),
            });
        }

        // **Step 4: Persist the pending record**
        match consultations.insert(consultation).await {
            Ok(row) => Ok(row),
            Err(e) => {
                warn!(
                    "Consultation insert for {} failed after debit, rolling back: {}",
                    consultation.id, e
                );
                if let Err(release_err) = consultations.release_claims(consultation.id).await {
                    error!(
                        "Claim rollback for consultation {} failed: {}",
                        consultation.id, release_err
                    );
                }
                Self::refund_debit(accounts, consultation).await;
                Err(ConsultationError::BookingFailed(e.to_string()))
            }
        }
    }

    async fn refund_debit(accounts: &AccountRepository, consultation: &Consultation) {
        if let Err(e) = accounts
            .credit_patient_wallet(consultation.patient_id, consultation.price)
            .await
        {
            error!(
                "Refund of {} to patient {} for aborted booking {} was not applied: {}",
                consultation.price, consultation.patient_id, consultation.id, e
            );
        }
    }
}
