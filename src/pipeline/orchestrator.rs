//! Orchestrator: the poll / decide / dispatch / commit loop.
//!
//! One cycle:
//! 1. Read the cursor and fetch everything newer from the inbound source
//! 2. Sort the batch oldest-first, drop duplicates and already-seen ids
//! 3. Per message: decide → dispatch → audit → commit cursor
//! 4. Sleep the idle interval when there was nothing to do (or something
//!    failed), otherwise poll again straight away
//!
//! Messages are handled strictly one at a time. The cursor only moves past a
//! message once its reply has been sent and its audit record written.
//!
//! After a transient failure the rest of the batch is still answered, but the
//! cursor is held behind the failed message. Ids answered while the cursor is
//! held are remembered in memory so the retry cycle does not reply twice;
//! a restart loses that memory, which is the documented at-least-once gap.
//! Every per-message failure except a rate limit counts toward an attempt
//! limit, so no single message can hold the cursor indefinitely.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{ChannelError, FailureClass, PipelineError};
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::processor::ReplyProcessor;
use crate::pipeline::types::{AuditRecord, InboundMessage, InboundSource, MessageId};
use crate::store::audit::AuditLog;
use crate::store::traits::CursorStore;

/// Longest we sleep on a rate limit. Platform windows are 15 minutes.
const MAX_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(15 * 60);

/// Result of a single poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing new.
    Idle,
    /// The inbound source could not be reached; retried next cycle.
    FetchFailed,
    /// The inbound source is rate limited; `retry_after` is when the window
    /// resets, if the platform said.
    RateLimited { retry_after: Option<Duration> },
    /// A batch was worked through (fully or partially).
    Completed(CycleReport),
}

/// Per-cycle tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages in the batch after ordering and de-duplication.
    pub fetched: usize,
    /// Replies sent and audited this cycle.
    pub processed: usize,
    /// Already answered in an earlier cycle while the cursor was held.
    pub skipped: usize,
    /// Messages left for a later cycle.
    pub failed: usize,
    /// Messages given up on after too many attempts.
    pub abandoned: usize,
    /// The cycle stopped before the end of the batch.
    pub interrupted: bool,
}

impl CycleReport {
    /// Every message in the batch reached a final state.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }
}

/// Sole driver of the reply pipeline. Owns the cursor.
pub struct Orchestrator {
    source: Arc<dyn InboundSource>,
    processor: ReplyProcessor,
    dispatcher: Dispatcher,
    cursor: Arc<dyn CursorStore>,
    audit: AuditLog,
    config: OrchestratorConfig,
    /// Failed attempts per id, split by class.
    attempts: HashMap<MessageId, Attempts>,
    /// Finished ids above the durable cursor.
    completed: BTreeSet<MessageId>,
    consecutive_fetch_failures: u32,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn InboundSource>,
        processor: ReplyProcessor,
        dispatcher: Dispatcher,
        cursor: Arc<dyn CursorStore>,
        audit: AuditLog,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            source,
            processor,
            dispatcher,
            cursor,
            audit,
            config,
            attempts: HashMap::new(),
            completed: BTreeSet::new(),
            consecutive_fetch_failures: 0,
        }
    }

    /// Loop until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Returns early only on a fatal-to-process error.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        info!(
            source = self.source.name(),
            idle_secs = self.config.idle_interval.as_secs_f64(),
            "Reply loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = self.run_cycle().await?;
            let idle = self.config.idle_interval;
            let pause = match &outcome {
                CycleOutcome::Completed(report) => {
                    info!(
                        fetched = report.fetched,
                        processed = report.processed,
                        skipped = report.skipped,
                        failed = report.failed,
                        abandoned = report.abandoned,
                        interrupted = report.interrupted,
                        "Cycle complete"
                    );
                    (!report.is_clean()).then_some(idle)
                }
                CycleOutcome::Idle | CycleOutcome::FetchFailed => Some(idle),
                CycleOutcome::RateLimited { retry_after } => {
                    Some(rate_limit_pause(*retry_after, idle))
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("Reply loop stopped");
        Ok(())
    }

    /// Run exactly one poll cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, PipelineError> {
        let since = self.cursor.read().await.map_err(PipelineError::Cursor)?;

        let batch = match self.source.list_new_messages(since).await {
            Ok(batch) => {
                self.consecutive_fetch_failures = 0;
                batch
            }
            Err(ChannelError::RateLimited { retry_after, .. }) => {
                warn!(retry_after = ?retry_after, "Inbound source rate limited, waiting for the window to reset");
                return Ok(CycleOutcome::RateLimited { retry_after });
            }
            Err(e) => {
                self.consecutive_fetch_failures += 1;
                let attempts = self.consecutive_fetch_failures;
                if exhausted(attempts, self.config.max_consecutive_fetch_failures) {
                    error!(attempts, error = %e, "Inbound source unreachable, giving up");
                    return Err(PipelineError::SourceUnavailable { attempts, source: e });
                }
                warn!(attempts, error = %e, "Inbound fetch failed, will retry");
                return Ok(CycleOutcome::FetchFailed);
            }
        };

        self.completed.retain(|id| since.is_none_or(|s| *id > s));
        self.attempts.retain(|id, _| since.is_none_or(|s| *id > s));
        let batch = order_batch(batch, since);
        if batch.is_empty() {
            debug!(since = ?since, "No new messages");
            return Ok(CycleOutcome::Idle);
        }

        info!(count = batch.len(), since = ?since, "Fetched new messages");

        let mut report = CycleReport {
            fetched: batch.len(),
            ..CycleReport::default()
        };
        // Set once a message stays behind; the cursor may not pass it.
        let mut held = false;

        for message in &batch {
            let id = message.id;

            if self.completed.contains(&id) {
                report.skipped += 1;
                if !held {
                    self.commit(id).await?;
                    self.completed.remove(&id);
                }
                continue;
            }

            match self.process_message(message).await {
                Ok(()) => {
                    report.processed += 1;
                    self.attempts.remove(&id);
                    self.finish(id, held).await?;
                }
                Err(e) => match e.class() {
                    FailureClass::TransientSkippable | FailureClass::StageRecoverable => {
                        if e.is_rate_limited() {
                            warn!(id = %id, error = %e, "Rate limited, will retry next cycle");
                            report.failed += 1;
                            held = true;
                            continue;
                        }

                        let counts = self.attempts.entry(id).or_default();
                        counts.transient += 1;
                        let attempts = counts.transient;
                        if exhausted(attempts, self.config.max_transient_attempts) {
                            error!(id = %id, attempts, error = %e, "Abandoning message after repeated transient failures");
                            report.abandoned += 1;
                            self.attempts.remove(&id);
                            self.finish(id, held).await?;
                        } else {
                            warn!(id = %id, attempts, error = %e, "Message failed, will retry next cycle");
                            report.failed += 1;
                            held = true;
                        }
                    }
                    FailureClass::FatalToMessage => {
                        let counts = self.attempts.entry(id).or_default();
                        counts.fatal += 1;
                        let attempts = counts.fatal;

                        if exhausted(attempts, self.config.max_message_attempts) {
                            error!(id = %id, attempts, error = %e, "Abandoning message after repeated failures");
                            report.abandoned += 1;
                            self.attempts.remove(&id);
                            self.finish(id, held).await?;
                        } else {
                            error!(id = %id, attempts, error = %e, "Message cannot be answered, aborting cycle");
                            report.failed += 1;
                            report.interrupted = true;
                            break;
                        }
                    }
                    FailureClass::FatalToProcess => return Err(e),
                },
            }
        }

        Ok(CycleOutcome::Completed(report))
    }

    /// Decide, dispatch and audit one message.
    async fn process_message(&self, message: &InboundMessage) -> Result<(), PipelineError> {
        debug!(id = %message.id, author = %message.author_handle, "Processing message");

        let decision = self.processor.decide(message).await?;
        let receipt = self.dispatcher.dispatch(message, &decision).await?;

        let record = AuditRecord::new(message, &decision, receipt.acknowledged);
        self.audit.record(&record).await;
        Ok(())
    }

    /// Mark `id` done: commit it, or remember it while the cursor is held.
    async fn finish(&mut self, id: MessageId, held: bool) -> Result<(), PipelineError> {
        if held {
            self.completed.insert(id);
            Ok(())
        } else {
            self.commit(id).await
        }
    }

    async fn commit(&self, id: MessageId) -> Result<(), PipelineError> {
        self.cursor.commit(id).await.map_err(PipelineError::Cursor)
    }
}

#[derive(Debug, Default)]
struct Attempts {
    transient: u32,
    fatal: u32,
}

/// `limit` of 0 means retry forever.
fn exhausted(attempts: u32, limit: u32) -> bool {
    limit > 0 && attempts >= limit
}

/// Sleep for a rate limit: the platform's reset time, but never shorter than
/// the idle interval nor longer than one rate-limit window.
fn rate_limit_pause(retry_after: Option<Duration>, idle: Duration) -> Duration {
    match retry_after {
        Some(wait) => wait.min(MAX_RATE_LIMIT_PAUSE).max(idle),
        None => idle,
    }
}

/// Oldest-first, one entry per id, nothing at or below `since`.
fn order_batch(mut batch: Vec<InboundMessage>, since: Option<MessageId>) -> Vec<InboundMessage> {
    batch.retain(|m| since.is_none_or(|s| m.id > s));
    batch.sort_by_key(|m| m.id);
    batch.dedup_by_key(|m| m.id);
    batch
}
