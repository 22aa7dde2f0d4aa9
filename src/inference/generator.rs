//! Text generation client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::JsonClient;
use crate::config::GenerationConfig;
use crate::error::InferenceError;
use crate::pipeline::types::Generator;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    text: &'a str,
    num_return_sequences: u32,
    max_length: u32,
}

/// Either a single `text` or a list of `candidates`; the first non-blank wins.
#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    candidates: Vec<String>,
}

/// `POST {endpoint}/generate`.
pub struct HttpGenerator {
    client: JsonClient,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, InferenceError> {
        Ok(Self {
            client: JsonClient::new(
                "generation",
                &config.endpoint,
                Duration::from_secs(config.timeout_secs),
            )?,
        })
    }
}

fn pick_output(resp: GenerateResponse) -> Result<String, InferenceError> {
    resp.text
        .into_iter()
        .chain(resp.candidates)
        .find(|t| !t.trim().is_empty())
        .ok_or_else(|| InferenceError::EmptyOutput {
            service: "generation".to_string(),
        })
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        text: &str,
        num_candidates: u32,
        max_length: u32,
    ) -> Result<String, InferenceError> {
        let request = GenerateRequest {
            text,
            num_return_sequences: num_candidates,
            max_length,
        };
        let resp: GenerateResponse = self.client.post("generate", &request).await?;
        debug!(
            service = self.client.service(),
            candidates = resp.candidates.len(),
            "Generation complete"
        );
        pick_output(resp)
    }
}
