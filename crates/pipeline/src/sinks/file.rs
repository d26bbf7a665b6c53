//! JSON-lines audit file

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::AuditEvent;
use crate::sink::{AuditSink, SinkError};

/// Appends each event as one JSON line
///
/// Writes are serialized so lines from concurrent workers never interleave.
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileAuditSink {
    /// Open (or create) the file in append mode
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn send(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(SinkError::Closed)?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        let Some(mut file) = self.file.lock().await.take() else {
            return Ok(());
        };

        file.flush().await?;
        file.sync_all().await?;
        debug!(path = %self.path.display(), "Audit file closed");
        Ok(())
    }
}
