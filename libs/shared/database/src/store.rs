use std::time::Duration;

use anyhow::Result;
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Non-2xx answer from the store, kept typed so callers can react to the
/// status code (409 on a unique-constraint conflict in particular).
#[derive(Debug, Error)]
#[error("Store error ({status}): {body}")]
pub struct StoreApiError {
    pub status: u16,
    pub body: String,
}

pub struct StoreClient {
    client: Client,
    base_url: String,
    service_key: String,
    timeout: Duration,
}

impl StoreClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.store_url.clone(),
            service_key: config.store_service_key.clone(),
            timeout: Duration::from_secs(config.collaborator_timeout_seconds),
        }
    }

    fn get_headers(&self, prefer: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.service_key).unwrap());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.service_key)).unwrap(),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(prefer_value) = prefer {
            headers.insert("Prefer", HeaderValue::from_str(prefer_value).unwrap());
        }

        headers
    }

    pub async fn request<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.request_with_prefer(method, path, body, None).await
    }

    /// Same as `request`, with a `Prefer` header. Conditional writes pass
    /// `return=representation` and treat an empty result array as a lost race.
    pub async fn request_with_prefer<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        prefer: Option<&str>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let headers = self.get_headers(prefer);

        let mut req = self
            .client
            .request(method, &url)
            .headers(headers)
            .timeout(self.timeout);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("Store error ({}): {}", status, error_text);

            return Err(anyhow::Error::new(StoreApiError {
                status: status.as_u16(),
                body: error_text,
            }));
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Status code of a failed request, when the store answered at all.
    pub fn error_status(err: &anyhow::Error) -> Option<u16> {
        err.downcast_ref::<StoreApiError>().map(|e| e.status)
    }

    /// Whether a failed request died on the client-side deadline.
    pub fn is_timeout(err: &anyhow::Error) -> bool {
        err.downcast_ref::<reqwest::Error>()
            .map(|e| e.is_timeout())
            .unwrap_or(false)
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
