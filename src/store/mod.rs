//! Persistence layer: the cursor and the audit trail.

pub mod audit;
pub mod cursor;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use audit::{AuditLog, ConsoleAuditSink};
pub use cursor::{FileCursorStore, MemoryCursorStore};
pub use libsql_backend::{LibSqlStore, StoredAuditRecord};
pub use traits::{AuditSink, CursorStore};
