//! Shared types for the reply pipeline.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChannelError, InferenceError, PostProcessError};

// ── Message identity ────────────────────────────────────────────────

/// Platform message id. Ids are assigned in increasing order by the
/// platform, so comparing two ids compares their arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(MessageId)
    }
}

// ── Inbound message ─────────────────────────────────────────────────

/// A message addressed to the account, as fetched from the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform id.
    pub id: MessageId,
    /// Platform-native author id.
    pub author_id: String,
    /// Author handle (screen name, without the `@`).
    pub author_handle: String,
    /// Message body with the leading mention of the account removed.
    pub text: String,
    /// When the platform received the message.
    pub received_at: DateTime<Utc>,
}

/// Normalize message text before it reaches any model: lower-case, trimmed,
/// inner whitespace collapsed to single spaces.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ── Retrieval ───────────────────────────────────────────────────────

/// A previously known answer found by the retrieval index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedAnswer {
    /// The indexed question that matched.
    pub query: String,
    /// The stored reply for that question.
    pub reply: String,
    /// Relevance score reported by the index.
    pub score: f64,
}

/// Outcome of a retrieval lookup. `NoMatch` is a routing signal, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalResult {
    Matched(RetrievedAnswer),
    NoMatch,
}

impl RetrievalResult {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

// ── Reply decision ──────────────────────────────────────────────────

/// Which path produced the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Suppressed,
    Retrieved,
    Generated,
}

impl Provenance {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Suppressed => "suppressed",
            Self::Retrieved => "retrieved",
            Self::Generated => "generated",
        }
    }
}

/// The single outbound action chosen for one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyDecision {
    /// Spam: a fixed acknowledgement replaces the reply.
    Suppressed { text: String },
    /// A known answer, grammar-corrected.
    Retrieved { text: String, score: f64 },
    /// A novel reply from the generation model, post-processed.
    Generated { text: String },
}

impl ReplyDecision {
    /// The text to dispatch.
    pub fn text(&self) -> &str {
        match self {
            Self::Suppressed { text } | Self::Retrieved { text, .. } | Self::Generated { text } => {
                text
            }
        }
    }

    /// Provenance score; 0 unless the reply was retrieved.
    pub fn score(&self) -> f64 {
        match self {
            Self::Retrieved { score, .. } => *score,
            _ => 0.0,
        }
    }

    pub fn is_spam(&self) -> bool {
        matches!(self, Self::Suppressed { .. })
    }

    pub fn provenance(&self) -> Provenance {
        match self {
            Self::Suppressed { .. } => Provenance::Suppressed,
            Self::Retrieved { .. } => Provenance::Retrieved,
            Self::Generated { .. } => Provenance::Generated,
        }
    }
}

// ── Audit record ────────────────────────────────────────────────────

/// One immutable log entry per inbound message, created after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub message: InboundMessage,
    pub reply: String,
    pub score: f64,
    pub is_spam: bool,
    pub provenance: Provenance,
    /// Whether the secondary "like" went through.
    pub acknowledged: bool,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(message: &InboundMessage, decision: &ReplyDecision, acknowledged: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.clone(),
            reply: decision.text().to_string(),
            score: decision.score(),
            is_spam: decision.is_spam(),
            provenance: decision.provenance(),
            acknowledged,
            recorded_at: Utc::now(),
        }
    }
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Where new messages come from.
#[async_trait]
pub trait InboundSource: Send + Sync {
    /// Source name (e.g. "twitter").
    fn name(&self) -> &str;

    /// Messages with an id strictly greater than `since` (all recent ones when
    /// `None`). Order is not guaranteed; the platform usually returns
    /// newest-first.
    async fn list_new_messages(
        &self,
        since: Option<MessageId>,
    ) -> Result<Vec<InboundMessage>, ChannelError>;
}

/// Where replies go.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Post `text` as a reply to `original`.
    async fn send_reply(&self, original: &InboundMessage, text: &str) -> Result<(), ChannelError>;

    /// Secondary acknowledgement ("like") of `original`.
    async fn acknowledge(&self, original: &InboundMessage) -> Result<(), ChannelError>;
}

/// Binary spam model. `true` means spam.
#[async_trait]
pub trait SpamClassifier: Send + Sync {
    async fn predict(&self, text: &str) -> Result<bool, InferenceError>;
}

/// Knowledge-index lookup. Applies its own acceptance threshold.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, text: &str) -> Result<RetrievalResult, InferenceError>;
}

/// Text-generation model. Must return non-empty text or an error.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        text: &str,
        num_candidates: u32,
        max_length: u32,
    ) -> Result<String, InferenceError>;
}

/// Pure text transforms applied to the chosen reply.
pub trait PostProcessor: Send + Sync {
    /// Clean up a retrieved answer.
    fn correct_grammar(&self, answer: &RetrievedAnswer) -> Result<String, PostProcessError>;

    /// Clean up generated text addressed to `recipient`.
    fn postprocess(&self, generated: &str, recipient: &str) -> Result<String, PostProcessError>;
}
