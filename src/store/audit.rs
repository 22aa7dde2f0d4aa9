//! Audit sinks and the fan-out log the orchestrator writes to.
//!
//! Sinks are independently failable: a sink error is logged and the next
//! sink still runs. Nothing here can fail the reply path.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::pipeline::types::AuditRecord;
use crate::store::traits::AuditSink;

/// Writes each record as one JSON line, on stdout unless told otherwise.
pub struct ConsoleAuditSink {
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl ConsoleAuditSink {
    pub fn stdout() -> Self {
        Self::with_writer(tokio::io::stdout())
    }

    pub fn with_writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }
}

#[async_trait]
impl AuditSink for ConsoleAuditSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn append(&self, record: &AuditRecord) -> Result<(), DatabaseError> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        line.push('\n');

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Fan-out over every configured sink.
#[derive(Default, Clone)]
pub struct AuditLog {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Append `record` to every sink. Returns how many sinks accepted it.
    pub async fn record(&self, record: &AuditRecord) -> usize {
        let mut accepted = 0;
        for sink in &self.sinks {
            match sink.append(record).await {
                Ok(()) => accepted += 1,
                Err(e) => {
                    warn!(
                        sink = sink.name(),
                        message_id = %record.message.id,
                        error = %e,
                        "Audit sink failed; continuing"
                    );
                }
            }
        }
        debug!(
            message_id = %record.message.id,
            accepted,
            total = self.sinks.len(),
            "Audit record written"
        );
        accepted
    }
}
