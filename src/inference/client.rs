//! JSON-over-HTTP plumbing shared by the model clients.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::InferenceError;

/// POSTs JSON to `{endpoint}/{path}` with a per-request timeout.
pub(crate) struct JsonClient {
    service: &'static str,
    endpoint: String,
    client: reqwest::Client,
}

impl JsonClient {
    pub(crate) fn new(
        service: &'static str,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::RequestFailed {
                service: service.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            service,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub(crate) fn service(&self) -> &'static str {
        self.service
    }

    pub(crate) async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, InferenceError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| InferenceError::RequestFailed {
                service: self.service.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::RequestFailed {
                service: self.service.to_string(),
                reason: format!("{url} returned {status}: {body}"),
            });
        }

        resp.json::<R>()
            .await
            .map_err(|e| InferenceError::InvalidResponse {
                service: self.service.to_string(),
                reason: e.to_string(),
            })
    }
}
