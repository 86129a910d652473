use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{Consultation, ConsultationError};

#[derive(Debug, Serialize)]
struct RoomProvisionEvent {
    consultation_id: Uuid,
    patient_id: Uuid,
    doctor_id: Uuid,
}

/// Client for the room-provisioning collaborator. Finishing a consultation
/// emits one event here so the chat/video side can open a room for the
/// follow-up; delivery is best effort.
#[derive(Clone)]
pub struct NotifyClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl NotifyClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.notify_service_url.clone(),
            timeout: Duration::from_secs(config.collaborator_timeout_seconds),
        }
    }

    pub async fn room_provision(&self, consultation: &Consultation) -> Result<(), ConsultationError> {
        let url = format!("{}/rooms", self.base_url);
        let event = RoomProvisionEvent {
            consultation_id: consultation.id,
            patient_id: consultation.patient_id,
            doctor_id: consultation.doctor_id,
        };
        debug!("Requesting room provision for consultation {}", consultation.id);

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&event)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ConsultationError::UpstreamTimeout
                } else {
                    ConsultationError::Upstream(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ConsultationError::Upstream(format!(
                "Notify service answered {}",
                response.status()
            )));
        }

        Ok(())
    }
}
