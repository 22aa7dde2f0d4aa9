//! Twitter channel: polls mentions and posts replies over the v2 REST API.
//!
//! Implements both sides of the reply loop: `InboundSource` (mentions since
//! an id) and `OutboundChannel` (reply + like).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::TwitterConfig;
use crate::error::ChannelError;
use crate::pipeline::types::{InboundMessage, InboundSource, MessageId, OutboundChannel};

const CHANNEL_NAME: &str = "twitter";

/// Twitter channel bound to one account.
pub struct TwitterChannel {
    api_base: String,
    user_id: String,
    username: String,
    token: SecretString,
    max_results: u32,
    max_pages: u32,
    client: reqwest::Client,
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MentionsPage {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    next_token: Option<String>,
}

impl TwitterChannel {
    pub fn new(config: &TwitterConfig, token: SecretString) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChannelError::FetchFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            user_id: config.user_id.clone(),
            username: config.username.clone(),
            token,
            max_results: config.max_results,
            max_pages: config.max_pages.max(1),
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base)
    }

    /// Fetch one page of mentions.
    async fn fetch_page(
        &self,
        since: Option<MessageId>,
        pagination_token: Option<&str>,
    ) -> Result<MentionsPage, ChannelError> {
        let mut query: Vec<(&str, String)> = vec![
            ("max_results", self.max_results.to_string()),
            ("expansions", "author_id".to_string()),
            ("tweet.fields", "created_at,author_id".to_string()),
            ("user.fields", "username".to_string()),
        ];
        if let Some(since) = since {
            query.push(("since_id", since.to_string()));
        }
        if let Some(token) = pagination_token {
            query.push(("pagination_token", token.to_string()));
        }

        let resp = self
            .client
            .get(self.api_url(&format!("users/{}/mentions", self.user_id)))
            .bearer_auth(self.token.expose_secret())
            .query(&query)
            .send()
            .await
            .map_err(|e| ChannelError::FetchFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, body, Operation::Fetch));
        }

        resp.json::<MentionsPage>()
            .await
            .map_err(|e| ChannelError::InvalidMessage(format!("mentions response: {e}")))
    }

    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.api_url(path))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, body, Operation::Send));
        }
        Ok(())
    }
}

#[async_trait]
impl InboundSource for TwitterChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn list_new_messages(
        &self,
        since: Option<MessageId>,
    ) -> Result<Vec<InboundMessage>, ChannelError> {
        let mut messages = Vec::new();
        let mut next_token: Option<String> = None;
        // Without a cursor only the newest page is taken; older history is
        // never answered.
        let pages = if since.is_some() { self.max_pages } else { 1 };

        for page_no in 0..pages {
            let page = self.fetch_page(since, next_token.as_deref()).await?;
            next_token = page.meta.next_token.clone();
            let parsed = parse_mentions(page, &self.user_id);
            debug!(page = page_no, count = parsed.len(), "Fetched mentions page");
            messages.extend(parsed);

            if next_token.is_none() {
                break;
            }
        }

        // Pages run newest to oldest, so a truncated walk would let the
        // cursor jump over the unread tail.
        if since.is_some() && next_token.is_some() {
            return Err(ChannelError::FetchFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("mention backlog exceeds {pages} pages; raise twitter.max_pages"),
            });
        }
        Ok(messages)
    }
}

#[async_trait]
impl OutboundChannel for TwitterChannel {
    async fn send_reply(&self, original: &InboundMessage, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "text": text,
            "reply": { "in_reply_to_tweet_id": original.id.to_string() },
        });
        self.post_json("tweets", body).await?;
        info!(
            id = %original.id,
            account = %self.username,
            to = %original.author_handle,
            "Posted reply"
        );
        Ok(())
    }

    async fn acknowledge(&self, original: &InboundMessage) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "tweet_id": original.id.to_string() });
        self.post_json(&format!("users/{}/likes", self.user_id), body)
            .await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Operation {
    Fetch,
    Send,
}

fn status_error(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
    op: Operation,
) -> ChannelError {
    let name = CHANNEL_NAME.to_string();
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChannelError::RateLimited { name, retry_after },
        // On a write, 403/404 is about the target post (deleted, protected,
        // replies restricted), not our credentials.
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND if matches!(op, Operation::Send) => {
            ChannelError::Rejected {
                name,
                reason: format!("{status}: {body}"),
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChannelError::AuthFailed {
            name,
            reason: format!("{status}: {body}"),
        },
        _ => {
            let reason = format!("{status}: {body}");
            match op {
                Operation::Fetch => ChannelError::FetchFailed { name, reason },
                Operation::Send => ChannelError::SendFailed { name, reason },
            }
        }
    }
}

/// Seconds until the rate-limit window resets, from `x-rate-limit-reset`
/// (epoch seconds).
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let reset: i64 = headers
        .get("x-rate-limit-reset")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    let wait = reset - Utc::now().timestamp();
    Some(Duration::from_secs(wait.max(0) as u64))
}

/// Turn a mentions page into inbound messages, dropping our own posts and
/// anything with an unparseable id.
fn parse_mentions(page: MentionsPage, self_id: &str) -> Vec<InboundMessage> {
    let handles: HashMap<&str, &str> = page
        .includes
        .users
        .iter()
        .map(|u| (u.id.as_str(), u.username.as_str()))
        .collect();

    page.data
        .iter()
        .filter_map(|tweet| {
            let author_id = tweet.author_id.clone().unwrap_or_default();
            if author_id == self_id {
                return None;
            }
            let id = match tweet.id.parse::<MessageId>() {
                Ok(id) => id,
                Err(e) => {
                    warn!(id = %tweet.id, error = %e, "Skipping mention with invalid id");
                    return None;
                }
            };
            Some(InboundMessage {
                id,
                author_handle: handles
                    .get(author_id.as_str())
                    .map(|h| h.to_string())
                    .unwrap_or_default(),
                author_id,
                text: strip_leading_mentions(&tweet.text).to_string(),
                received_at: tweet.created_at.unwrap_or_else(Utc::now),
            })
        })
        .collect()
}

/// Drop the `@handle` tokens a reply starts with.
fn strip_leading_mentions(text: &str) -> &str {
    let mut rest = text.trim_start();
    while rest.starts_with('@') {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest
}
