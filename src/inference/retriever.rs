//! Retrieval index client.
//!
//! The index answers every query; it signals "nothing close enough" with a
//! null `query`. A further acceptance threshold (`min_score`) is applied here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::JsonClient;
use crate::config::RetrievalConfig;
use crate::error::InferenceError;
use crate::pipeline::types::{RetrievalResult, RetrievedAnswer, Retriever};

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

/// `POST {endpoint}/retrieve` → `{"query", "answer", "score"}`.
pub struct HttpRetriever {
    client: JsonClient,
    min_score: f64,
}

impl HttpRetriever {
    pub fn new(config: &RetrievalConfig) -> Result<Self, InferenceError> {
        Ok(Self {
            client: JsonClient::new(
                "retrieval",
                &config.endpoint,
                Duration::from_secs(config.timeout_secs),
            )?,
            min_score: config.min_score,
        })
    }
}

fn interpret(resp: RetrieveResponse, min_score: f64) -> Result<RetrievalResult, InferenceError> {
    let Some(query) = resp.query else {
        return Ok(RetrievalResult::NoMatch);
    };
    let score = resp.score.unwrap_or(0.0);
    if score < min_score {
        return Ok(RetrievalResult::NoMatch);
    }
    match resp.answer {
        Some(reply) if !reply.trim().is_empty() => {
            Ok(RetrievalResult::Matched(RetrievedAnswer {
                query,
                reply,
                score,
            }))
        }
        _ => Err(InferenceError::InvalidResponse {
            service: "retrieval".to_string(),
            reason: format!("match for {query:?} has no answer"),
        }),
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, text: &str) -> Result<RetrievalResult, InferenceError> {
        let resp: RetrieveResponse = self.client.post("retrieve", &RetrieveRequest { text }).await?;
        let result = interpret(resp, self.min_score)?;
        debug!(
            service = self.client.service(),
            matched = result.is_match(),
            "Retrieval lookup"
        );
        Ok(result)
    }
}
