//! Task factories: execution metadata plus a constructor of task instances.
//!
//! A [`TaskFactory`] pairs an immutable [`FactoryConfig`] with a shared
//! [`TaskBehavior`]. Settings produce configured copies; the behavior is
//! shared between every copy.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::Job;
use crate::settings::FactoryOverrides;
use crate::task::Task;
use crate::task_id::TaskId;

/// Name of the in-process execution location.
pub const LOCAL_LOCATION: &str = "local";

/// A named class of input files, recognized by suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileType {
    pub name: String,
    pub suffixes: Vec<String>,
}

impl FileType {
    pub fn new(name: impl Into<String>, suffixes: &[&str]) -> Self {
        Self {
            name: name.into(),
            suffixes: suffixes.iter().map(|s| s.to_ascii_lowercase()).collect(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        self.suffixes.iter().any(|s| file_name.ends_with(s.as_str()))
    }
}

/// Execution metadata of a factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryConfig {
    pub id: TaskId,
    pub module: Option<String>,
    pub dependency_id: Option<TaskId>,
    pub join: bool,
    pub large_work: bool,
    pub location: String,
    pub auto_retry: u32,
    pub group_parameter_name: Option<String>,
    pub input_types: Vec<FileType>,
}

impl FactoryConfig {
    pub fn new(id: TaskId) -> Self {
        Self {
            module: id.module().map(str::to_string),
            id,
            dependency_id: None,
            join: false,
            large_work: false,
            location: LOCAL_LOCATION.to_string(),
            auto_retry: 0,
            group_parameter_name: None,
            input_types: Vec::new(),
        }
    }

    pub fn apply(&mut self, overrides: &FactoryOverrides) {
        if let Some(location) = &overrides.location {
            self.location = location.clone();
        }
        if let Some(join) = overrides.join {
            self.join = join;
        }
        if let Some(large_work) = overrides.large_work {
            self.large_work = large_work;
        }
        if let Some(auto_retry) = overrides.auto_retry {
            self.auto_retry = auto_retry;
        }
        if let Some(name) = &overrides.group_parameter_name {
            self.group_parameter_name = Some(name.clone());
        }
        if let Some(dependency) = &overrides.dependency_id {
            self.dependency_id = Some(dependency.clone());
        }
    }
}

/// Behavior hooks supplied by each kind of task.
///
/// Every hook receives the factory's own config so one behavior can serve
/// many configured copies.
pub trait TaskBehavior: Send + Sync {
    fn create_task(&self, config: &FactoryConfig, job: &Job) -> Result<Box<dyn Task>, CoreError>;

    /// Whether the task runs at all for this job. Defaults to matching at
    /// least one job input against the accepted file types.
    fn is_participant(&self, config: &FactoryConfig, job: &Job) -> Result<bool, CoreError> {
        if config.input_types.is_empty() {
            return Ok(true);
        }
        Ok(job
            .inputs
            .iter()
            .any(|input| config.input_types.iter().any(|t| t.matches(input))))
    }

    fn is_job_complete(&self, config: &FactoryConfig, job: &Job) -> bool {
        job.is_task_complete(&config.id)
    }

    fn is_auto_retry_enabled(&self, _config: &FactoryConfig, _job: &Job) -> bool {
        true
    }

    /// Identifier recorded as the job's active task while this one runs.
    fn active_id(&self, config: &FactoryConfig) -> TaskId {
        config.id.clone()
    }

    /// Files that must exist before the task may start.
    fn required_inputs(&self, _config: &FactoryConfig, _job: &Job) -> Vec<PathBuf> {
        Vec::new()
    }
}

#[derive(Clone)]
pub struct TaskFactory {
    config: FactoryConfig,
    behavior: Arc<dyn TaskBehavior>,
}

impl fmt::Debug for TaskFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskFactory {
    pub fn new(config: FactoryConfig, behavior: Arc<dyn TaskBehavior>) -> Self {
        Self { config, behavior }
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn id(&self) -> &TaskId {
        &self.config.id
    }

    pub fn module(&self) -> Option<&str> {
        self.config.module.as_deref()
    }

    pub fn dependency_id(&self) -> Option<&TaskId> {
        self.config.dependency_id.as_ref()
    }

    pub fn is_join(&self) -> bool {
        self.config.join
    }

    pub fn is_large_work(&self) -> bool {
        self.config.large_work
    }

    pub fn location(&self) -> &str {
        &self.config.location
    }

    pub fn is_local(&self) -> bool {
        self.config.location == LOCAL_LOCATION
    }

    pub fn auto_retry(&self) -> u32 {
        self.config.auto_retry
    }

    /// Copy of this factory with `overrides` applied; unset options inherit.
    pub fn configure(&self, overrides: &FactoryOverrides) -> Self {
        let mut config = self.config.clone();
        config.apply(overrides);
        Self {
            config,
            behavior: Arc::clone(&self.behavior),
        }
    }

    pub fn with_id(&self, id: TaskId) -> Self {
        let mut config = self.config.clone();
        config.id = id;
        Self {
            config,
            behavior: Arc::clone(&self.behavior),
        }
    }

    pub fn behavior(&self) -> Arc<dyn TaskBehavior> {
        Arc::clone(&self.behavior)
    }

    pub fn create_task(&self, job: &Job) -> Result<Box<dyn Task>, CoreError> {
        self.behavior.create_task(&self.config, job)
    }

    /// Participation also requires the dependency task, if any, to have
    /// completed for the job.
    pub fn is_participant(&self, job: &Job) -> Result<bool, CoreError> {
        if let Some(dependency) = &self.config.dependency_id {
            if !job.is_task_complete(dependency) {
                return Ok(false);
            }
        }
        self.behavior.is_participant(&self.config, job)
    }

    pub fn is_job_complete(&self, job: &Job) -> bool {
        self.behavior.is_job_complete(&self.config, job)
    }

    pub fn is_auto_retry_enabled(&self, job: &Job) -> bool {
        self.behavior.is_auto_retry_enabled(&self.config, job)
    }

    pub fn active_id(&self) -> TaskId {
        self.behavior.active_id(&self.config)
    }

    /// Whether `id` is this factory's id or the id it reports while active.
    pub fn matches_active(&self, id: &TaskId) -> bool {
        id == self.id() || *id == self.active_id()
    }

    /// Required inputs that do not exist yet.
    pub fn missing_inputs(&self, job: &Job) -> Vec<PathBuf> {
        self.behavior
            .required_inputs(&self.config, job)
            .into_iter()
            .filter(|path| !path.exists())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{factory, test_job};

    #[test]
    fn defaults_run_locally_without_retries() {
        let f = factory("a");
        assert!(f.is_local());
        assert_eq!(f.auto_retry(), 0);
        assert!(!f.is_join());
        assert_eq!(f.module(), Some("test"));
    }

    #[test]
    fn configure_overrides_only_set_options() {
        let base = factory("a").configure(&FactoryOverrides {
            location: Some("cluster".into()),
            auto_retry: Some(3),
            ..FactoryOverrides::default()
        });
        let copy = base.configure(&FactoryOverrides {
            large_work: Some(true),
            ..FactoryOverrides::default()
        });
        assert_eq!(copy.location(), "cluster");
        assert_eq!(copy.auto_retry(), 3);
        assert!(copy.is_large_work());
    }

    #[test]
    fn with_id_keeps_behavior_and_config() {
        let renamed = factory("a")
            .configure(&FactoryOverrides {
                join: Some(true),
                ..FactoryOverrides::default()
            })
            .with_id(TaskId::task("test", "b"));
        assert_eq!(renamed.id(), &TaskId::task("test", "b"));
        assert!(renamed.is_join());
    }

    #[test]
    fn dependency_gates_participation() {
        let f = factory("b").configure(&FactoryOverrides {
            dependency_id: Some(TaskId::task("test", "a")),
            ..FactoryOverrides::default()
        });
        let mut job = test_job();
        assert!(!f.is_participant(&job).unwrap());
        job.mark_task_complete(&TaskId::task("test", "a"));
        assert!(f.is_participant(&job).unwrap());
    }

    #[test]
    fn input_types_gate_participation() {
        let mut config = FactoryConfig::new(TaskId::task("test", "convert"));
        config.input_types = vec![FileType::new("raw", &[".raw"])];
        let f = TaskFactory::new(config, factory("x").behavior());

        let mut job = test_job();
        job.inputs = vec![PathBuf::from("/data/sample.mzXML")];
        assert!(!f.is_participant(&job).unwrap());
        job.inputs.push(PathBuf::from("/data/sample.RAW"));
        assert!(f.is_participant(&job).unwrap());
    }

    #[test]
    fn file_type_matching_ignores_case() {
        let t = FileType::new("fasta", &[".fasta", ".fa"]);
        assert!(t.matches(Path::new("/db/human.FASTA")));
        assert!(!t.matches(Path::new("/db/human.txt")));
    }
}
