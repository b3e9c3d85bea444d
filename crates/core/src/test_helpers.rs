//! Shared test helpers for registry, driver and factory tests.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::factory::{FactoryConfig, TaskBehavior, TaskFactory};
use crate::job::Job;
use crate::job_kind::GenericSpec;
use crate::pipeline::TaskPipeline;
use crate::registry::TaskRegistry;
use crate::task::{Task, TaskContext};
use crate::task_id::TaskId;

/// Task id `test:task:<name>`.
pub fn t(name: &str) -> TaskId {
    TaskId::task("test", name)
}

struct NoopTask;

#[async_trait]
impl Task for NoopTask {
    async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<(), CoreError> {
        ctx.check_cancelled()
    }
}

struct NoopBehavior;

impl TaskBehavior for NoopBehavior {
    fn create_task(&self, _config: &FactoryConfig, _job: &Job) -> Result<Box<dyn Task>, CoreError> {
        Ok(Box::new(NoopTask))
    }
}

/// Behavior that requires a file to exist before its task may start.
pub struct RequiresFile(pub PathBuf);

impl TaskBehavior for RequiresFile {
    fn create_task(&self, _config: &FactoryConfig, _job: &Job) -> Result<Box<dyn Task>, CoreError> {
        Ok(Box::new(NoopTask))
    }

    fn required_inputs(&self, _config: &FactoryConfig, _job: &Job) -> Vec<PathBuf> {
        vec![self.0.clone()]
    }
}

/// Local factory `test:task:<name>` whose task does nothing.
pub fn factory(name: &str) -> TaskFactory {
    TaskFactory::new(FactoryConfig::new(t(name)), Arc::new(NoopBehavior))
}

/// Registry holding `factories` and pipeline `test:pipeline:p` running them
/// in the given order.
pub fn registry_with(factories: Vec<TaskFactory>) -> TaskRegistry {
    let registry = TaskRegistry::new();
    let progression = factories.iter().map(|f| f.id().clone()).collect();
    for factory in factories {
        registry.register_factory(factory).unwrap();
    }
    registry
        .register_pipeline(TaskPipeline::new(TaskId::pipeline("test", "p"), progression).unwrap())
        .unwrap();
    registry
}

/// Fresh generic job bound to `test:pipeline:p`.
pub fn test_job() -> Job {
    Job::new(
        Box::new(GenericSpec::default()),
        Some(TaskId::pipeline("test", "p")),
        "/tmp/taskline-test",
    )
}
