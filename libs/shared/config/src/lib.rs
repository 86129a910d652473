use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_url: String,
    pub store_service_key: String,
    pub schedule_service_url: String,
    pub notify_service_url: String,
    pub collaborator_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            store_url: env::var("STORE_URL")
                .unwrap_or_else(|_| {
                    warn!("STORE_URL not set, using empty value");
                    String::new()
                }),
            store_service_key: env::var("STORE_SERVICE_KEY")
                .unwrap_or_else(|_| {
                    warn!("STORE_SERVICE_KEY not set, using empty value");
                    String::new()
                }),
            schedule_service_url: env::var("SCHEDULE_SERVICE_URL")
                .unwrap_or_else(|_| {
                    warn!("SCHEDULE_SERVICE_URL not set, using empty value");
                    String::new()
                }),
            notify_service_url: env::var("NOTIFY_SERVICE_URL")
                .unwrap_or_else(|_| {
                    warn!("NOTIFY_SERVICE_URL not set, using empty value");
                    String::new()
                }),
            collaborator_timeout_seconds: parse_env_u64("COLLABORATOR_TIMEOUT_SECONDS", 10),
            sweep_interval_seconds: parse_env_u64("SWEEP_INTERVAL_SECONDS", 30),
            port: parse_env_u64("PORT", 3000) as u16,
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.store_url.is_empty()
            && !self.store_service_key.is_empty()
            && !self.schedule_service_url.is_empty()
    }

    pub fn is_notify_configured(&self) -> bool {
        !self.notify_service_url.is_empty()
    }
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid number, using default {}", key, default);
            default
        }),
        Err(_) => default,
    }
}
