//! libSQL backend: durable audit records and an optional database cursor.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{AuditRecord, MessageId, Provenance};
use crate::store::migrations;
use crate::store::traits::{AuditSink, CursorStore};

/// Row name of the single cursor this agent keeps.
const CURSOR_NAME: &str = "mentions";

const AUDIT_COLUMNS: &str = "id, message_id, author_handle, message_text, reply, score, is_spam, provenance, acknowledged, recorded_at";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    // Serializes the read-compare-write of cursor commits.
    cursor_lock: Mutex<()>,
}

/// Audit row as read back for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAuditRecord {
    pub id: String,
    pub message_id: MessageId,
    pub author_handle: String,
    pub message_text: String,
    pub reply: String,
    pub score: f64,
    pub is_spam: bool,
    pub provenance: Provenance,
    pub acknowledged: bool,
    pub recorded_at: DateTime<Utc>,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            cursor_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Most recent audit records, newest first.
    pub async fn recent_audit_records(
        &self,
        limit: usize,
    ) -> Result<Vec<StoredAuditRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_records ORDER BY recorded_at DESC, rowid DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_audit_records: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_audit_records: {e}")))?
        {
            match row_to_audit(&row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping audit row: {e}"),
            }
        }
        Ok(records)
    }

    /// Number of stored audit records.
    pub async fn audit_count(&self) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM audit_records", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("audit_count: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("audit_count: {e}")))?
        {
            Some(row) => row
                .get::<i64>(0)
                .map(|n| n as u64)
                .map_err(|e| DatabaseError::Query(format!("audit_count: {e}"))),
            None => Ok(0),
        }
    }

    async fn read_cursor(&self) -> Result<Option<MessageId>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT last_processed_id FROM cursor_state WHERE name = ?1",
                params![CURSOR_NAME],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("read_cursor: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read_cursor: {e}")))?
        else {
            return Ok(None);
        };

        let raw: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("read_cursor: {e}")))?;
        raw.parse::<MessageId>()
            .map(Some)
            .map_err(|e| DatabaseError::Serialization(format!("invalid cursor id {raw:?}: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("invalid timestamp {s:?}: {e}")))
}

fn provenance_from_str(s: &str) -> Result<Provenance, DatabaseError> {
    match s {
        "suppressed" => Ok(Provenance::Suppressed),
        "retrieved" => Ok(Provenance::Retrieved),
        "generated" => Ok(Provenance::Generated),
        other => Err(DatabaseError::Serialization(format!(
            "unknown provenance {other:?}"
        ))),
    }
}

/// Map a libsql Row to a StoredAuditRecord. Column order matches AUDIT_COLUMNS.
fn row_to_audit(row: &libsql::Row) -> Result<StoredAuditRecord, DatabaseError> {
    let column = |e: libsql::Error| DatabaseError::Query(format!("row_to_audit: {e}"));

    let message_id: String = row.get(1).map_err(column)?;
    let provenance: String = row.get(7).map_err(column)?;
    let recorded_at: String = row.get(9).map_err(column)?;
    let message_id = message_id.parse::<MessageId>().map_err(|e| {
        DatabaseError::Serialization(format!("invalid message id {message_id:?}: {e}"))
    })?;

    Ok(StoredAuditRecord {
        id: row.get(0).map_err(column)?,
        message_id,
        author_handle: row.get(2).map_err(column)?,
        message_text: row.get(3).map_err(column)?,
        reply: row.get(4).map_err(column)?,
        score: row.get(5).map_err(column)?,
        is_spam: row.get::<i64>(6).map_err(column)? != 0,
        provenance: provenance_from_str(&provenance)?,
        acknowledged: row.get::<i64>(8).map_err(column)? != 0,
        recorded_at: parse_datetime(&recorded_at)?,
    })
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl AuditSink for LibSqlStore {
    fn name(&self) -> &str {
        "libsql"
    }

    async fn append(&self, record: &AuditRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO audit_records (id, message_id, author_id, author_handle, message_text,
                    received_at, reply, score, is_spam, provenance, acknowledged, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id.to_string(),
                    record.message.id.to_string(),
                    record.message.author_id.clone(),
                    record.message.author_handle.clone(),
                    record.message.text.clone(),
                    record.message.received_at.to_rfc3339(),
                    record.reply.clone(),
                    record.score,
                    record.is_spam as i64,
                    record.provenance.label(),
                    record.acknowledged as i64,
                    record.recorded_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append audit record: {e}")))?;

        debug!(id = %record.id, message_id = %record.message.id, "Audit record stored");
        Ok(())
    }
}

#[async_trait]
impl CursorStore for LibSqlStore {
    async fn read(&self) -> Result<Option<MessageId>, DatabaseError> {
        self.read_cursor().await
    }

    async fn commit(&self, id: MessageId) -> Result<(), DatabaseError> {
        let _guard = self.cursor_lock.lock().await;

        if let Some(current) = self.read_cursor().await?
            && id <= current
        {
            return Ok(());
        }

        self.conn()
            .execute(
                "INSERT INTO cursor_state (name, last_processed_id, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                    last_processed_id = excluded.last_processed_id,
                    updated_at = excluded.updated_at",
                params![CURSOR_NAME, id.to_string(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("commit cursor: {e}")))?;

        debug!(id = %id, "Cursor committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{InboundMessage, ReplyDecision};

    async fn test_db() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    fn message(id: u64, text: &str) -> InboundMessage {
        InboundMessage {
            id: MessageId(id),
            author_id: "2244994945".into(),
            author_handle: "alice".into(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let db = test_db().await;
        let record = AuditRecord::new(
            &message(1460323737035677698, "what is your favourite song?"),
            &ReplyDecision::Retrieved {
                text: "Spring Day, always.".into(),
                score: 17.25,
            },
            true,
        );
        db.append(&record).await.unwrap();

        let stored = db.recent_audit_records(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        let row = &stored[0];
        assert_eq!(row.id, record.id.to_string());
        assert_eq!(row.message_id, MessageId(1460323737035677698));
        assert_eq!(row.reply, "Spring Day, always.");
        assert!((row.score - 17.25).abs() < 1e-9);
        assert!(!row.is_spam);
        assert_eq!(row.provenance, Provenance::Retrieved);
        assert!(row.acknowledged);
    }

    #[tokio::test]
    async fn spam_records_round_trip_flags() {
        let db = test_db().await;
        let record = AuditRecord::new(
            &message(2, "buy followers"),
            &ReplyDecision::Suppressed { text: "....".into() },
            false,
        );
        db.append(&record).await.unwrap();
        let stored = db.recent_audit_records(1).await.unwrap();
        assert!(stored[0].is_spam);
        assert_eq!(stored[0].score, 0.0);
        assert_eq!(stored[0].provenance, Provenance::Suppressed);
    }

    #[tokio::test]
    async fn corrupt_rows_are_skipped_not_misread() {
        let db = test_db().await;
        let good = AuditRecord::new(
            &message(3, "hi"),
            &ReplyDecision::Generated { text: "hello".into() },
            true,
        );
        db.append(&good).await.unwrap();

        let now = Utc::now().to_rfc3339();
        for (id, message_id, provenance) in [
            ("bad-id", "not-a-number", "generated"),
            ("bad-provenance", "4", "hallucinated"),
        ] {
            db.conn()
                .execute(
                    "INSERT INTO audit_records (id, message_id, author_id, author_handle, message_text,
                        received_at, reply, score, is_spam, provenance, acknowledged, recorded_at)
                     VALUES (?1, ?2, '1', 'bob', 'x', ?3, 'y', 0.0, 0, ?4, 0, ?3)",
                    params![id, message_id, now.clone(), provenance],
                )
                .await
                .unwrap();
        }

        assert_eq!(db.audit_count().await.unwrap(), 3);
        let stored = db.recent_audit_records(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message_id, MessageId(3));
        assert_eq!(stored[0].provenance, Provenance::Generated);
    }

    #[test]
    fn unknown_provenance_is_an_error() {
        assert_eq!(provenance_from_str("retrieved").unwrap(), Provenance::Retrieved);
        assert!(matches!(
            provenance_from_str("Generated"),
            Err(DatabaseError::Serialization(_))
        ));
        assert!(parse_datetime("yesterday").is_err());
    }

    #[tokio::test]
    async fn count_and_limit() {
        let db = test_db().await;
        for id in 1..=3 {
            let record = AuditRecord::new(
                &message(id, "hi"),
                &ReplyDecision::Generated { text: "hello".into() },
                true,
            );
            db.append(&record).await.unwrap();
        }
        assert_eq!(db.audit_count().await.unwrap(), 3);
        assert_eq!(db.recent_audit_records(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cursor_starts_empty_and_is_monotonic() {
        let db = test_db().await;
        assert_eq!(db.read().await.unwrap(), None);
        db.commit(MessageId(10)).await.unwrap();
        db.commit(MessageId(4)).await.unwrap();
        assert_eq!(db.read().await.unwrap(), Some(MessageId(10)));
        db.commit(MessageId(u64::MAX)).await.unwrap();
        assert_eq!(db.read().await.unwrap(), Some(MessageId(u64::MAX)));
    }

    #[tokio::test]
    async fn local_database_persists_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("agent.db");
        {
            let db = LibSqlStore::new_local(&path).await.unwrap();
            db.commit(MessageId(77)).await.unwrap();
        }
        let reopened = LibSqlStore::new_local(&path).await.unwrap();
        assert_eq!(reopened.read().await.unwrap(), Some(MessageId(77)));
    }
}
