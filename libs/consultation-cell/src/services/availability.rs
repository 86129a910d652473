use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::store::StoreClient;

use crate::models::{ConsultationError, ConsultationStatus};
use crate::repository::ConsultationRepository;
use crate::services::schedule::{ScheduleClient, WorkingSlots};

/// Statuses that keep a slot booked. Canceled and denied consultations
/// release theirs.
pub const CONFLICT_STATUSES: [ConsultationStatus; 3] = [
    ConsultationStatus::Pending,
    ConsultationStatus::Confirmed,
    ConsultationStatus::Finished,
];

/// Dates cross the boundary as ISO 8601 calendar dates and nothing else.
pub fn parse_consultation_date(raw: &str) -> Result<NaiveDate, ConsultationError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ConsultationError::InvalidDate(raw.to_string()))
}

#[derive(Clone)]
pub struct AvailabilityService {
    schedule: ScheduleClient,
    consultations: ConsultationRepository,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig, store: Arc<StoreClient>) -> Self {
        Self {
            schedule: ScheduleClient::new(config),
            consultations: ConsultationRepository::new(store),
        }
    }

    /// Published minus booked, ascending. A doctor with no published
    /// schedule is its own outcome so callers can tell it apart from a
    /// fully booked day.
    pub async fn free_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<u16>, ConsultationError> {
        let working = match self.schedule.working_slots(doctor_id, date).await? {
            WorkingSlots::Published(slots) => slots,
            WorkingSlots::NotPublished => return Err(ConsultationError::ScheduleNotPublished),
        };

        let booked = self.booked_slots(doctor_id, date).await?;
        let free: Vec<u16> = working
            .into_iter()
            .filter(|slot| !booked.contains(slot))
            .collect();

        debug!(
            "Doctor {} on {}: {} free slots ({} booked)",
            doctor_id,
            date,
            free.len(),
            booked.len()
        );

        Ok(free)
    }

    /// Union of the slot sets of every non-terminal consultation on the day.
    pub async fn booked_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<BTreeSet<u16>, ConsultationError> {
        let consultations = self
            .consultations
            .for_doctor_date(doctor_id, date, &CONFLICT_STATUSES)
            .await?;

        Ok(consultations
            .iter()
            .flat_map(|consultation| consultation.slots.iter().copied())
            .collect())
    }
}
