//! Spam classifier client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::JsonClient;
use crate::config::ServiceConfig;
use crate::error::InferenceError;
use crate::pipeline::types::SpamClassifier;

#[derive(Serialize)]
struct PredictRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    label: i64,
}

/// `POST {endpoint}/predict` → `{"label": 0|1}`.
pub struct HttpSpamClassifier {
    client: JsonClient,
}

impl HttpSpamClassifier {
    pub fn new(config: &ServiceConfig) -> Result<Self, InferenceError> {
        Ok(Self {
            client: JsonClient::new(
                "spam",
                &config.endpoint,
                Duration::from_secs(config.timeout_secs),
            )?,
        })
    }
}

fn label_to_spam(label: i64) -> Result<bool, InferenceError> {
    match label {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(InferenceError::InvalidResponse {
            service: "spam".to_string(),
            reason: format!("unexpected label {other}"),
        }),
    }
}

#[async_trait]
impl SpamClassifier for HttpSpamClassifier {
    async fn predict(&self, text: &str) -> Result<bool, InferenceError> {
        let resp: PredictResponse = self.client.post("predict", &PredictRequest { text }).await?;
        debug!(service = self.client.service(), label = resp.label, "Spam prediction");
        label_to_spam(resp.label)
    }
}
