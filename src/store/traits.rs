//! Storage traits: the cursor and the audit sinks.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::pipeline::types::{AuditRecord, MessageId};

/// Durable pointer to the last fully processed inbound message.
///
/// Owned by the orchestrator; never accessed concurrently.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// The last committed id, or `None` before the first commit.
    async fn read(&self) -> Result<Option<MessageId>, DatabaseError>;

    /// Advance the cursor to `id`. Ids at or below the current cursor are
    /// ignored so the cursor never moves backwards.
    async fn commit(&self, id: MessageId) -> Result<(), DatabaseError>;
}

/// Append-only destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Sink name for logging.
    fn name(&self) -> &str;

    async fn append(&self, record: &AuditRecord) -> Result<(), DatabaseError>;
}
