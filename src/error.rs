//! Error types for the reply agent.

use std::time::Duration;

use crate::pipeline::types::MessageId;

/// Top-level error type for the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors (cursor and audit storage).
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Social-platform transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Fetching from channel {name} failed: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} rate limited, retry after {retry_after:?}")]
    RateLimited {
        name: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    /// The platform refused this particular message (deleted or protected
    /// post); resending will not help.
    #[error("Channel {name} rejected the message: {reason}")]
    Rejected { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Errors from the model/index services (spam, retrieval, generation).
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Service {service} request failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("Service {service} returned no output")]
    EmptyOutput { service: String },
}

/// Post-processing failures. Always recoverable: the caller passes the
/// untransformed text through.
#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error("Post-processing produced an empty reply")]
    EmptyOutput,

    #[error("Post-processing failed: {0}")]
    Failed(String),
}

/// How the orchestrator must react to a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Log, keep the cursor behind the message, carry on with the batch.
    TransientSkippable,
    /// Degrade to pass-through and continue the same message.
    StageRecoverable,
    /// The message cannot be answered this cycle; abort the cycle and retry.
    FatalToMessage,
    /// Stop the process; restart is the recovery mechanism.
    FatalToProcess,
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Inbound fetch failed: {0}")]
    Fetch(#[source] ChannelError),

    #[error("Inbound source unreachable after {attempts} consecutive attempts: {source}")]
    SourceUnavailable {
        attempts: u32,
        #[source]
        source: ChannelError,
    },

    #[error("Spam check failed: {0}")]
    SpamCheck(#[source] InferenceError),

    #[error("Retrieval failed: {0}")]
    Retrieval(#[source] InferenceError),

    #[error("Generation failed: {0}")]
    Generation(#[source] InferenceError),

    #[error("Post-processing failed: {0}")]
    PostProcess(#[from] PostProcessError),

    #[error("Reply dispatch failed for message {id}: {source}")]
    Dispatch {
        id: MessageId,
        #[source]
        source: ChannelError,
    },

    #[error("Cursor store failed: {0}")]
    Cursor(#[source] DatabaseError),
}

impl PipelineError {
    /// Classify this failure according to the error taxonomy.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Dispatch {
                source: ChannelError::Rejected { .. },
                ..
            } => FailureClass::FatalToMessage,
            Self::Fetch(_) | Self::SpamCheck(_) | Self::Retrieval(_) | Self::Dispatch { .. } => {
                FailureClass::TransientSkippable
            }
            Self::PostProcess(_) => FailureClass::StageRecoverable,
            Self::Generation(_) => FailureClass::FatalToMessage,
            Self::SourceUnavailable { .. } | Self::Cursor(_) => FailureClass::FatalToProcess,
        }
    }

    /// The platform asked us to slow down. Waiting out the window is
    /// expected and never counts toward a retry limit.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::Fetch(ChannelError::RateLimited { .. })
                | Self::Dispatch {
                    source: ChannelError::RateLimited { .. },
                    ..
                }
        )
    }
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
