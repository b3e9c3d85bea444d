//! Startup wiring: store, registry, work directories, locations and the
//! dispatcher with its background loops.

use std::sync::Arc;

use anyhow::Context;
use taskline_core::codec::JobCodec;
use taskline_core::copy_lock::{CopyLock, CopyLockConfig};
use taskline_core::store::{JobStore, MemoryJobStore};
use taskline_core::workdir::{WorkDirectoryManager, WorkPool};
use taskline_db::PgJobStore;
use taskline_events::{EventBus, JobJournal};
use taskline_pipeline::{Dispatcher, Services};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::pipeline_config::PipelineConfig;

pub struct Worker {
    pub config: WorkerConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: CancellationToken,
    events: Arc<EventBus>,
}

impl Worker {
    pub async fn build(config: WorkerConfig) -> anyhow::Result<Self> {
        let codec = JobCodec::default();
        let store = open_store(&config, &codec).await?;

        let pipelines = match &config.pipeline_config {
            Some(path) => PipelineConfig::load(path).await?,
            None => {
                tracing::warn!("TASKLINE_PIPELINE_CONFIG not set, no pipelines are configured");
                PipelineConfig::default()
            }
        };
        let registry = pipelines.build_registry()?;
        let locations = pipelines.build_locations(&codec)?;
        tracing::info!(
            factories = registry.factory_count(),
            locations = ?locations.names().collect::<Vec<_>>(),
            "Pipeline configuration loaded"
        );

        let mut workdirs = WorkDirectoryManager::new(
            WorkPool::new(&config.work_dir).with_local_roots(config.local_roots.clone()),
            WorkPool::new(&config.large_work_dir).with_local_roots(config.local_roots.clone()),
        );
        if let Some(dir) = &config.copy_lock_dir {
            let lock = CopyLock::new(CopyLockConfig {
                slots: config.copy_lock_slots,
                ..CopyLockConfig::new(dir)
            })?;
            workdirs = workdirs.with_copy_lock(lock);
        }

        let events = Arc::new(EventBus::default());
        let services = Services::new(Arc::new(registry), store, workdirs)
            .with_locations(locations)
            .with_events(Arc::clone(&events));

        Ok(Self {
            config,
            dispatcher: Arc::new(Dispatcher::new(services)),
            shutdown: CancellationToken::new(),
            events,
        })
    }

    /// Spawn the journal, the local runner loops and the monitor.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.local_threads + 2);

        let receiver = self.events.subscribe();
        let shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = JobJournal::run(receiver) => {}
                _ = shutdown.cancelled() => {}
            }
        }));

        for n in 0..self.config.local_threads {
            let worker = format!("{}-{n}", self.config.worker_name);
            handles.push(tokio::spawn(
                Arc::clone(&self.dispatcher).run_local_worker(worker, self.shutdown.clone()),
            ));
        }
        handles.push(tokio::spawn(
            Arc::clone(&self.dispatcher).run_monitor(self.config.poll_interval, self.shutdown.clone()),
        ));
        handles
    }

    pub async fn stop(&self, handles: Vec<JoinHandle<()>>) {
        self.shutdown.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background task panicked");
            }
        }
        tracing::info!("Worker stopped");
    }
}

async fn open_store(config: &WorkerConfig, codec: &JobCodec) -> anyhow::Result<Arc<dyn JobStore>> {
    let Some(url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, job checkpoints are kept in memory");
        return Ok(Arc::new(MemoryJobStore::new(codec.clone())));
    };
    let pool = taskline_db::create_pool(url)
        .await
        .context("Failed to connect to database")?;
    taskline_db::health_check(&pool).await?;
    taskline_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database connected and migrated");
    Ok(Arc::new(PgJobStore::new(pool, codec.clone())))
}
