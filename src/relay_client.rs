use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use thiserror::Error;

use crate::models::{AlertPayload, NotifyReport, PushSubscription, VapidKeyResponse};
use crate::scheduler::RelayApi;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay answered {0}")]
    Status(StatusCode),
}

/// HTTP client for a push relay serving the routes in [`crate::routes`].
pub struct RelayClient {
    base_url: String,
    client: reqwest::Client,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl RelayApi for RelayClient {
    async fn vapid_public_key(&self) -> Result<String, RelayError> {
        let res = self.client.get(self.url("/vapidPublicKey")).send().await?;
        if !res.status().is_success() {
            return Err(RelayError::Status(res.status()));
        }
        Ok(res.json::<VapidKeyResponse>().await?.key)
    }

    async fn register(&self, subscription: &PushSubscription) -> Result<(), RelayError> {
        let res = self
            .client
            .post(self.url("/subscribe"))
            .json(subscription)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(RelayError::Status(res.status()));
        }
        debug!("relay_client:: subscription registered ({})", res.status());
        Ok(())
    }

    async fn broadcast(&self, payload: &AlertPayload) -> Result<NotifyReport, RelayError> {
        let res = self
            .client
            .post(self.url("/notify"))
            .json(payload)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(RelayError::Status(res.status()));
        }
        Ok(res.json().await?)
    }
}
