//! Reply pipeline.
//!
//! Every inbound message flows through:
//! 1. `SpamGate::classify()`: suppress or continue
//! 2. `Retriever::retrieve()`: known answer, or no-match
//! 3. `Generator::generate()`: only when retrieval has no match
//! 4. `PostProcessor`: grammar correction / generated-text clean-up
//! 5. `Dispatcher::dispatch()`: reply, then best-effort like
//!
//! The `Orchestrator` drives the stages, one message at a time, and owns the
//! cursor.

pub mod dispatch;
pub mod orchestrator;
pub mod postprocess;
pub mod processor;
pub mod spam;
pub mod types;

pub use dispatch::{DispatchReceipt, Dispatcher};
pub use orchestrator::{CycleOutcome, CycleReport, Orchestrator};
pub use postprocess::TextPostProcessor;
pub use processor::ReplyProcessor;
pub use spam::SpamGate;
