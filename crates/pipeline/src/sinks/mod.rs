//! Audit sinks shipped with the pipeline
//!
//! - [`FileAuditSink`] - one JSON object per line, appended to a local file
//! - [`HttpAuditSink`] - one POST per event to a remote collector
//!
//! [`AuditSinkConfig`] picks one of them from `AUDIT_FILE` / `AUDIT_URL`.

mod file;
mod http;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::{env_parse, ConfigError};
use crate::sink::{AuditSink, SinkError};

pub use file::FileAuditSink;
pub use http::HttpAuditSink;

/// Errors building an audit sink
#[derive(Debug, thiserror::Error)]
pub enum AuditSinkBuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Where audit events go
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditSinkConfig {
    /// Append events to this file
    pub file: Option<PathBuf>,
    /// POST events to this URL
    pub url: Option<String>,
}

impl AuditSinkConfig {
    /// Read `AUDIT_FILE` and `AUDIT_URL`; blank values count as unset
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            file: env_parse("AUDIT_FILE")?,
            url: env_parse("AUDIT_URL")?,
        })
    }

    /// Audit to a file
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Audit to a remote collector
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Whether any destination is configured
    pub fn is_configured(&self) -> bool {
        self.file.is_some() || self.url.is_some()
    }

    /// Build the configured sink; a file takes precedence over a URL
    pub async fn build(&self) -> Result<Arc<dyn AuditSink>, AuditSinkBuildError> {
        if let Some(path) = &self.file {
            info!(path = %path.display(), "Auditing to file");
            let sink = FileAuditSink::open(path).await?;
            return Ok(Arc::new(sink));
        }

        if let Some(url) = &self.url {
            info!(url = %url, "Auditing to remote collector");
            let sink = HttpAuditSink::new(url.clone())?;
            return Ok(Arc::new(sink));
        }

        Err(ConfigError::Invalid("audit file and url are empty".into()).into())
    }
}
