//! Cursor stores: a last-seen-id text file and an in-memory variant.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::DatabaseError;
use crate::pipeline::types::MessageId;
use crate::store::traits::CursorStore;

/// Cursor persisted as a single id in a text file.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash leaves either the old or the new id, never a torn one.
pub struct FileCursorStore {
    path: PathBuf,
    // Serializes read-compare-write in `commit`.
    lock: Mutex<()>,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Option<MessageId>, DatabaseError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DatabaseError::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        content.parse::<MessageId>().map(Some).map_err(|e| {
            DatabaseError::Serialization(format!(
                "cursor file {} holds an invalid id: {e}",
                self.path.display()
            ))
        })
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn read(&self) -> Result<Option<MessageId>, DatabaseError> {
        self.read_file().await
    }

    async fn commit(&self, id: MessageId) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;

        if let Some(current) = self.read_file().await?
            && id <= current
        {
            return Ok(());
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, format!("{id}\n")).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(id = %id, path = %self.path.display(), "Cursor committed");
        Ok(())
    }
}

/// In-process cursor (tests, dry runs).
#[derive(Default)]
pub struct MemoryCursorStore {
    current: Mutex<Option<MessageId>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(id: MessageId) -> Self {
        Self {
            current: Mutex::new(Some(id)),
        }
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn read(&self) -> Result<Option<MessageId>, DatabaseError> {
        Ok(*self.current.lock().await)
    }

    async fn commit(&self, id: MessageId) -> Result<(), DatabaseError> {
        let mut current = self.current.lock().await;
        if current.is_none_or(|c| id > c) {
            *current = Some(id);
        }
        Ok(())
    }
}
