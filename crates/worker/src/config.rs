use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// PostgreSQL connection string; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub work_dir: PathBuf,
    pub large_work_dir: PathBuf,
    /// Roots whose files tasks read in place instead of copying.
    pub local_roots: Vec<PathBuf>,
    /// Number of local runner loops.
    pub local_threads: usize,
    /// Interval of the remote poll / input re-check monitor.
    pub poll_interval: Duration,
    pub copy_lock_dir: Option<PathBuf>,
    pub copy_lock_slots: usize,
    /// JSON file with commands, factory and pipeline settings, and locations.
    pub pipeline_config: Option<PathBuf>,
    pub worker_name: String,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default           |
    /// |-----------------------------|-------------------|
    /// | `DATABASE_URL`              | unset (in-memory) |
    /// | `TASKLINE_WORK_DIR`         | `data/work`       |
    /// | `TASKLINE_LARGE_WORK_DIR`   | `data/work-large` |
    /// | `TASKLINE_LOCAL_ROOTS`      | empty             |
    /// | `TASKLINE_LOCAL_THREADS`    | `2`               |
    /// | `TASKLINE_POLL_INTERVAL_MS` | `1000`            |
    /// | `TASKLINE_COPY_LOCK_DIR`    | unset             |
    /// | `TASKLINE_COPY_LOCK_SLOTS`  | `2`               |
    /// | `TASKLINE_PIPELINE_CONFIG`  | unset             |
    /// | `TASKLINE_WORKER_NAME`      | `local`           |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let local_roots = var("TASKLINE_LOCAL_ROOTS")
            .map(|roots| {
                roots
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let local_threads: usize = parse_or(&var, "TASKLINE_LOCAL_THREADS", 2)?;
        if local_threads == 0 {
            anyhow::bail!("TASKLINE_LOCAL_THREADS must be at least 1");
        }

        Ok(Self {
            database_url: var("DATABASE_URL"),
            work_dir: var("TASKLINE_WORK_DIR").unwrap_or_else(|| "data/work".into()).into(),
            large_work_dir: var("TASKLINE_LARGE_WORK_DIR")
                .unwrap_or_else(|| "data/work-large".into())
                .into(),
            local_roots,
            local_threads,
            poll_interval: Duration::from_millis(parse_or(&var, "TASKLINE_POLL_INTERVAL_MS", 1000)?),
            copy_lock_dir: var("TASKLINE_COPY_LOCK_DIR").map(PathBuf::from),
            copy_lock_slots: parse_or(&var, "TASKLINE_COPY_LOCK_SLOTS", 2)?,
            pipeline_config: var("TASKLINE_PIPELINE_CONFIG").map(PathBuf::from),
            worker_name: var("TASKLINE_WORKER_NAME").unwrap_or_else(|| "local".into()),
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
