use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::actor::{Actor, ActorRole};

pub struct TestConfig {
    pub store_url: String,
    pub store_service_key: String,
    pub schedule_service_url: String,
    pub notify_service_url: String,
    pub collaborator_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            store_url: "http://localhost:54321".to_string(),
            store_service_key: "test-service-key".to_string(),
            schedule_service_url: "http://localhost:54322".to_string(),
            notify_service_url: "http://localhost:54323".to_string(),
            collaborator_timeout_seconds: 10,
            sweep_interval_seconds: 30,
        }
    }
}

impl TestConfig {
    /// Point every collaborator at one mock server, with the schedule and
    /// notify services nested under their own path prefixes.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            store_url: base_url.to_string(),
            schedule_service_url: format!("{}/schedule", base_url),
            notify_service_url: format!("{}/notify", base_url),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            store_url: self.store_url.clone(),
            store_service_key: self.store_service_key.clone(),
            schedule_service_url: self.schedule_service_url.clone(),
            notify_service_url: self.notify_service_url.clone(),
            collaborator_timeout_seconds: self.collaborator_timeout_seconds,
            sweep_interval_seconds: self.sweep_interval_seconds,
            port: 3000,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestActor {
    pub id: Uuid,
    pub role: String,
}

impl TestActor {
    pub fn new(role: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: role.to_string(),
        }
    }

    pub fn patient() -> Self {
        Self::new("patient")
    }

    pub fn doctor() -> Self {
        Self::new("doctor")
    }

    pub fn to_actor(&self) -> Actor {
        let role = match self.role.as_str() {
            "doctor" => ActorRole::Doctor,
            _ => ActorRole::Patient,
        };
        Actor::new(self.id, role)
    }
}

pub struct MockStoreResponses;

impl MockStoreResponses {
    pub fn doctor_row(doctor_id: Uuid, fee_per_slot: i64, wallet_balance: i64) -> Value {
        json!([{
            "id": doctor_id,
            "full_name": "Dr. Test",
            "fee_per_slot": fee_per_slot,
            "wallet_balance": wallet_balance
        }])
    }

    pub fn patient_row(patient_id: Uuid, wallet_balance: i64) -> Value {
        json!([{
            "id": patient_id,
            "full_name": "Test Patient",
            "wallet_balance": wallet_balance
        }])
    }

    pub fn discount_row(code: &str, kind: &str, value: i64, expires_in_hours: i64) -> Value {
        json!([{
            "code": code,
            "kind": kind,
            "value": value,
            "expires_at": (Utc::now() + Duration::hours(expires_in_hours)).to_rfc3339()
        }])
    }

    pub fn consultation_row(
        consultation_id: Uuid,
        patient_id: Uuid,
        doctor_id: Uuid,
        date: &str,
        slots: &str,
        price: i64,
        status: &str,
    ) -> Value {
        json!({
            "id": consultation_id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "date": date,
            "slots": slots,
            "price": price,
            "discount": null,
            "symptoms": null,
            "medical_note": null,
            "status": status,
            "refund_amount": 0,
            "payout_amount": 0,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn empty() -> Value {
        json!([])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.store_url, "http://localhost:54321");
        assert!(app_config.is_configured());
    }

    #[test]
    fn test_config_mock_server_urls() {
        let config = TestConfig::with_base_url("http://127.0.0.1:9000");

        assert_eq!(config.store_url, "http://127.0.0.1:9000");
        assert_eq!(config.schedule_service_url, "http://127.0.0.1:9000/schedule");
        assert_eq!(config.notify_service_url, "http://127.0.0.1:9000/notify");
    }

    #[test]
    fn test_actor_roles() {
        let patient = TestActor::patient();
        let doctor = TestActor::doctor();

        assert_eq!(patient.to_actor().role, ActorRole::Patient);
        assert_eq!(doctor.to_actor().role, ActorRole::Doctor);
    }
}
