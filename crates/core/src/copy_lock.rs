//! Cross-process bound on concurrent network copies.
//!
//! Processes sharing a volume share a lock directory holding a fixed number
//! of slot files. A slot is taken by creating its file exclusively and
//! released when the [`CopyLockGuard`] is dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CoreError;

/// Default number of concurrent copies.
pub const DEFAULT_SLOTS: usize = 2;

/// Default wait for a free slot before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default delay between acquisition attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CopyLockConfig {
    pub dir: PathBuf,
    pub slots: usize,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl CopyLockConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            slots: DEFAULT_SLOTS,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyLock {
    config: Arc<CopyLockConfig>,
}

impl CopyLock {
    pub fn new(config: CopyLockConfig) -> Result<Self, CoreError> {
        if config.slots == 0 {
            return Err(CoreError::Validation(
                "Copy lock needs at least one slot".to_string(),
            ));
        }
        Ok(Self {
            config: Arc::new(config),
        })
    }

    fn slot_path(&self, slot: usize) -> PathBuf {
        self.config.dir.join(format!("copy-slot-{slot}.lock"))
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<CopyLockGuard, CoreError> {
        tokio::fs::create_dir_all(&self.config.dir).await?;
        let started = Instant::now();

        loop {
            for slot in 0..self.config.slots {
                let path = self.slot_path(slot);
                match tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await
                {
                    Ok(_) => {
                        tracing::debug!(slot, path = %path.display(), "Acquired copy lock");
                        return Ok(CopyLockGuard { path });
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            if started.elapsed() >= self.config.timeout {
                return Err(CoreError::Infrastructure(format!(
                    "Timed out after {}s waiting for a copy lock in {}",
                    self.config.timeout.as_secs(),
                    self.config.dir.display()
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// Holds one slot; the slot file is deleted on drop.
#[derive(Debug)]
pub struct CopyLockGuard {
    path: PathBuf,
}

impl Drop for CopyLockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release copy lock");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
