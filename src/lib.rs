//! Reply agent: polls mentions, filters spam, answers from a retrieval index
//! or a generation model, and keeps a durable cursor and audit trail.

pub mod channels;
pub mod config;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod store;
