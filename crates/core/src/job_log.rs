//! Per-job log file.
//!
//! Every status transition and every error is appended as a timestamped line
//! in addition to the `tracing` output of the process.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, level: LogLevel, message: &str) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let line = format!(
            "{} {:<5} {}\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level.as_str(),
            message
        );
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Append, logging instead of failing. A broken job log never changes
    /// the outcome of a task.
    pub async fn write(&self, level: LogLevel, message: &str) {
        if let Err(e) = self.append(level, message).await {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write job log");
        }
    }

    pub async fn info(&self, message: &str) {
        self.write(LogLevel::Info, message).await;
    }

    pub async fn warn(&self, message: &str) {
        self.write(LogLevel::Warn, message).await;
    }

    pub async fn error(&self, message: &str) {
        self.write(LogLevel::Error, message).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = JobLog::new(dir.path().join("nested").join("job.log"));

        log.info("status waiting -> running").await;
        log.error("task failed").await;

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO  status waiting -> running"));
        assert!(lines[1].contains("ERROR task failed"));
    }
}
