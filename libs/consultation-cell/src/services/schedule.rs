use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::ConsultationError;
use crate::slots;

/// Answer from the schedule collaborator for one (doctor, date). "Nothing
/// published" is an explicit state of the world, never an error and never
/// the same thing as an empty or fully booked grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingSlots {
    Published(Vec<u16>),
    NotPublished,
}

#[derive(Debug, Deserialize)]
struct WorkingSlotsResponse {
    available: bool,
    #[serde(default)]
    slots: Vec<u16>,
}

#[derive(Debug, Serialize)]
struct SlotReservationEvent {
    consultation_id: Uuid,
    date: String,
    slots: String,
}

/// Client for the external schedule service that owns what doctors publish
/// as bookable. Every call carries the collaborator deadline; running into
/// it is a timeout failure, distinct from any "not available" answer.
#[derive(Clone)]
pub struct ScheduleClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ScheduleClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.schedule_service_url.clone(),
            timeout: Duration::from_secs(config.collaborator_timeout_seconds),
        }
    }

    /// The slot indices a doctor published for a date, or the explicit
    /// not-published sentinel.
    pub async fn working_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<WorkingSlots, ConsultationError> {
        let url = format!(
            "{}/schedules/{}?date={}",
            self.base_url,
            doctor_id,
            date.format("%Y-%m-%d")
        );
        debug!("Fetching working slots from {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Schedule service error ({}): {}", status, body);
            return Err(ConsultationError::Upstream(format!(
                "Schedule service answered {}",
                status
            )));
        }

        let parsed: WorkingSlotsResponse = response
            .json()
            .await
            .map_err(|e| ConsultationError::Upstream(format!("Malformed schedule response: {}", e)))?;

        if !parsed.available {
            debug!("No schedule published for doctor {} on {}", doctor_id, date);
            return Ok(WorkingSlots::NotPublished);
        }

        let mut working = parsed.slots;
        working.sort_unstable();
        working.dedup();
        Ok(WorkingSlots::Published(working))
    }

    /// Tell the schedule service which slots a new booking took. Best
    /// effort: the booking stands whether or not this lands, the caller
    /// only logs failures.
    pub async fn publish_reservation(
        &self,
        consultation_id: Uuid,
        doctor_id: Uuid,
        date: NaiveDate,
        booked: &[u16],
    ) -> Result<(), ConsultationError> {
        let url = format!("{}/schedules/{}/reservations", self.base_url, doctor_id);
        let event = SlotReservationEvent {
            consultation_id,
            date: date.format("%Y-%m-%d").to_string(),
            slots: slots::encode_slots(booked),
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&event)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !response.status().is_success() {
            warn!(
                "Slot reservation event rejected with {}",
                response.status()
            );
            return Err(ConsultationError::Upstream(format!(
                "Reservation event answered {}",
                response.status()
            )));
        }

        Ok(())
    }
}

fn classify_transport_error(err: reqwest::Error) -> ConsultationError {
    if err.is_timeout() {
        ConsultationError::UpstreamTimeout
    } else {
        ConsultationError::Upstream(err.to_string())
    }
}
