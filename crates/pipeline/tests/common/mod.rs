//! Shared fixtures for dispatcher integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskline_core::codec::JobCodec;
use taskline_core::error::CoreError;
use taskline_core::factory::{FactoryConfig, TaskBehavior, TaskFactory};
use taskline_core::job::Job;
use taskline_core::job_kind::{FileAnalysisSpec, GenericSpec};
use taskline_core::pipeline::TaskPipeline;
use taskline_core::registry::TaskRegistry;
use taskline_core::status::TaskStatus;
use taskline_core::store::{JobListQuery, JobRef, JobStore, JobSummary, MemoryJobStore};
use taskline_core::task::{Task, TaskContext};
use taskline_core::task_id::TaskId;
use taskline_core::types::{DbId, JobGuid};
use taskline_core::workdir::{WorkDirectoryManager, WorkPool};
use taskline_pipeline::{Dispatcher, InfraRetryConfig, Locations, Services};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Task id `it:task:<name>`.
pub fn t(name: &str) -> TaskId {
    TaskId::task("it", name)
}

pub fn pipeline_id() -> TaskId {
    TaskId::pipeline("it", "p")
}

// ---------------------------------------------------------------------------
// Behaviors
// ---------------------------------------------------------------------------

/// Writes one output named after the task and the job, and counts runs.
#[derive(Default)]
pub struct WritesOutput {
    pub runs: AtomicU32,
}

struct WriteTask {
    name: String,
}

#[async_trait]
impl Task for WriteTask {
    async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<(), CoreError> {
        ctx.check_cancelled()?;
        let file = format!("{}-{}.out", self.name, ctx.job.guid);
        let path = ctx.expect_output(&file, "result")?;
        tokio::fs::write(&path, self.name.as_bytes()).await?;
        Ok(())
    }
}

impl TaskBehavior for WritesOutput {
    fn create_task(&self, config: &FactoryConfig, _job: &Job) -> Result<Box<dyn Task>, CoreError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(WriteTask {
            name: config.id.display_name().to_string(),
        }))
    }
}

/// Fails its first `failures` runs, then succeeds.
pub struct FailsTimes {
    pub failures: u32,
    pub runs: AtomicU32,
}

impl FailsTimes {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            runs: AtomicU32::new(0),
        }
    }

    pub fn always() -> Self {
        Self::new(u32::MAX)
    }
}

struct FailTask {
    fail: bool,
}

#[async_trait]
impl Task for FailTask {
    async fn run(&self, _ctx: &mut TaskContext<'_>) -> Result<(), CoreError> {
        if self.fail {
            return Err(CoreError::TaskFailed("exit status 1".into()));
        }
        Ok(())
    }
}

impl TaskBehavior for FailsTimes {
    fn create_task(&self, _config: &FactoryConfig, _job: &Job) -> Result<Box<dyn Task>, CoreError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FailTask {
            fail: run < self.failures,
        }))
    }
}

/// Blocks until cancelled.
pub struct WaitsForCancel;

struct BlockingTask;

#[async_trait]
impl Task for BlockingTask {
    async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<(), CoreError> {
        ctx.cancel.cancelled().await;
        Err(CoreError::Cancelled)
    }
}

impl TaskBehavior for WaitsForCancel {
    fn create_task(&self, _config: &FactoryConfig, _job: &Job) -> Result<Box<dyn Task>, CoreError> {
        Ok(Box::new(BlockingTask))
    }
}

/// Requires a file before it may start.
pub struct NeedsFile {
    pub path: PathBuf,
    pub inner: WritesOutput,
}

impl TaskBehavior for NeedsFile {
    fn create_task(&self, config: &FactoryConfig, job: &Job) -> Result<Box<dyn Task>, CoreError> {
        self.inner.create_task(config, job)
    }

    fn required_inputs(&self, _config: &FactoryConfig, _job: &Job) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub fn factory(name: &str, behavior: Arc<dyn TaskBehavior>) -> TaskFactory {
    TaskFactory::new(FactoryConfig::new(t(name)), behavior)
}

pub fn configured(
    name: &str,
    behavior: Arc<dyn TaskBehavior>,
    configure: impl FnOnce(&mut FactoryConfig),
) -> TaskFactory {
    let mut config = FactoryConfig::new(t(name));
    configure(&mut config);
    TaskFactory::new(config, behavior)
}

/// Registry with pipeline `it:pipeline:p` running `factories` in order.
pub fn registry(factories: Vec<TaskFactory>) -> TaskRegistry {
    let registry = TaskRegistry::new();
    let progression = factories.iter().map(|f| f.id().clone()).collect();
    for factory in factories {
        registry.register_factory(factory).unwrap();
    }
    registry
        .register_pipeline(TaskPipeline::new(pipeline_id(), progression).unwrap())
        .unwrap();
    registry
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// In-memory store whose next `failures` checkpoints fail as if the
/// database were unreachable.
pub struct FlakyStore {
    inner: MemoryJobStore,
    pub failures: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryJobStore::new(JobCodec::default()),
            failures: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn checkpoint(&self, job: &mut Job) -> Result<DbId, CoreError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CoreError::Infrastructure("database unavailable".into()));
        }
        self.inner.checkpoint(job).await
    }

    async fn load(&self, guid: JobGuid) -> Result<Job, CoreError> {
        self.inner.load(guid).await
    }

    async fn resolve(&self, job_ref: JobRef) -> Result<JobGuid, CoreError> {
        self.inner.resolve(job_ref).await
    }

    async fn children(&self, parent: JobGuid) -> Result<Vec<Job>, CoreError> {
        self.inner.children(parent).await
    }

    async fn list(&self, query: &JobListQuery) -> Result<Vec<JobSummary>, CoreError> {
        self.inner.list(query).await
    }

    async fn delete(&self, guid: JobGuid) -> Result<bool, CoreError> {
        self.inner.delete(guid).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn JobStore>,
    pub dir: Arc<TempDir>,
    shutdown: CancellationToken,
}

impl Harness {
    pub fn new(registry: TaskRegistry) -> Self {
        Self::with_locations(registry, Locations::new())
    }

    pub fn with_locations(registry: TaskRegistry, locations: Locations) -> Self {
        let dir = Arc::new(TempDir::new().unwrap());
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(JobCodec::default()));
        Self::with_store(registry, locations, store, dir)
    }

    /// A fresh dispatcher over an existing store, as after a restart.
    pub fn with_store(
        registry: TaskRegistry,
        locations: Locations,
        store: Arc<dyn JobStore>,
        dir: Arc<TempDir>,
    ) -> Self {
        let workdirs = WorkDirectoryManager::new(
            WorkPool::new(dir.path().join("work")),
            WorkPool::new(dir.path().join("large")),
        );
        let services = Services::new(
            Arc::new(registry),
            Arc::clone(&store),
            workdirs,
        )
        .with_locations(locations)
        .with_retry(InfraRetryConfig::immediate());
        Self {
            dispatcher: Arc::new(Dispatcher::new(services)),
            store,
            dir,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn start_runners(&self, count: usize) {
        for n in 0..count {
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(dispatcher.run_local_worker(format!("runner-{n}"), self.shutdown.clone()));
        }
    }

    pub fn analysis_dir(&self) -> PathBuf {
        self.dir.path().join("analysis")
    }

    pub fn generic_job(&self) -> Job {
        Job::new(Box::new(GenericSpec::default()), Some(pipeline_id()), self.analysis_dir())
    }

    pub fn split_job(&self, inputs: &[&str]) -> Job {
        Job::new(
            Box::new(FileAnalysisSpec::new("search", true)),
            Some(pipeline_id()),
            self.analysis_dir(),
        )
        .with_inputs(inputs.iter().map(|name| self.dir.path().join("in").join(name)))
    }

    pub async fn load(&self, guid: JobGuid) -> Job {
        self.store.load(guid).await.unwrap()
    }

    /// Poll the store until the job reaches `status`.
    pub async fn wait_for(&self, guid: JobGuid, status: TaskStatus) -> Job {
        self.wait_until(guid, |job| job.active_status == status).await
    }

    /// Poll the store until `done` holds for the job.
    pub async fn wait_until(&self, guid: JobGuid, done: impl Fn(&Job) -> bool) -> Job {
        let polled = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = self.load(guid).await;
                if done(&job) {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        match polled {
            Ok(job) => job,
            Err(_) => {
                let job = self.load(guid).await;
                panic!(
                    "job {guid} timed out in {} with error count {}",
                    job.active_status, job.error_count
                )
            }
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
