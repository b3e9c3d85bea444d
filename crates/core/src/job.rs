//! The job entity and its state transitions.
//!
//! A [`Job`] is a value snapshot: it is mutated in memory by the driver and
//! runners, and made durable through a [`JobStore`](crate::store::JobStore)
//! checkpoint after every transition.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::action::{RecordedAction, RecordedActionSet};
use crate::job_kind::{GenericSpec, JobSpec, SplitPart};
use crate::job_log::JobLog;
use crate::status::TaskStatus;
use crate::task_id::TaskId;
use crate::types::{JobGuid, Timestamp};

fn default_spec() -> Box<dyn JobSpec> {
    Box::new(GenericSpec::default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub guid: JobGuid,
    #[serde(default)]
    pub parent_guid: Option<JobGuid>,
    /// `None` for monolithic jobs that complete on their first advance.
    #[serde(default)]
    pub pipeline_id: Option<TaskId>,
    #[serde(default)]
    pub active_task_id: Option<TaskId>,
    pub active_status: TaskStatus,
    #[serde(default)]
    pub active_task_retries: u32,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub submitted: bool,
    #[serde(default)]
    pub actions: RecordedActionSet,
    /// Analysis directory that receives finalized outputs.
    pub root: PathBuf,
    pub log_path: PathBuf,
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub completed_tasks: BTreeSet<TaskId>,
    #[serde(default)]
    pub split_children: Vec<JobGuid>,
    /// Set on a split parent once its children were merged back.
    #[serde(default)]
    pub joined: bool,
    #[serde(default)]
    pub active_location: Option<String>,
    #[serde(default)]
    pub active_worker: Option<String>,
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: Timestamp,

    /// Store revision the snapshot was loaded at. Owned by the store.
    #[serde(skip)]
    pub revision: i64,
    #[serde(skip, default = "default_spec")]
    pub spec: Box<dyn JobSpec>,
}

impl Job {
    pub fn new(spec: Box<dyn JobSpec>, pipeline_id: Option<TaskId>, root: impl Into<PathBuf>) -> Self {
        let guid = uuid::Uuid::new_v4();
        let root = root.into();
        Self {
            guid,
            parent_guid: None,
            pipeline_id,
            active_task_id: None,
            active_status: TaskStatus::Waiting,
            active_task_retries: 0,
            error_count: 0,
            interrupted: false,
            submitted: false,
            actions: RecordedActionSet::new(),
            log_path: root.join(format!("{guid}.log")),
            root,
            inputs: Vec::new(),
            parameters: BTreeMap::new(),
            completed_tasks: BTreeSet::new(),
            split_children: Vec::new(),
            joined: false,
            active_location: None,
            active_worker: None,
            remote_id: None,
            last_error: None,
            created_at: chrono::Utc::now(),
            revision: 0,
            spec,
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn log(&self) -> JobLog {
        JobLog::new(&self.log_path)
    }

    pub fn description(&self) -> String {
        self.spec.description(self)
    }

    // -- posture -------------------------------------------------------------

    pub fn is_split_child(&self) -> bool {
        self.parent_guid.is_some()
    }

    pub fn is_split(&self) -> bool {
        !self.split_children.is_empty() || self.is_split_child()
    }

    pub fn is_splittable(&self) -> bool {
        !self.is_split() && self.spec.is_splittable(self)
    }

    pub fn is_task_complete(&self, task_id: &TaskId) -> bool {
        self.completed_tasks.contains(task_id)
    }

    // -- transitions ---------------------------------------------------------

    /// Point the job at `task_id`. The retry counter resets only when the
    /// active task changes.
    pub fn activate(&mut self, task_id: TaskId, status: TaskStatus) {
        if self.active_task_id.as_ref() != Some(&task_id) {
            self.active_task_retries = 0;
        }
        self.active_task_id = Some(task_id);
        self.active_status = status;
        self.active_worker = None;
        self.remote_id = None;
    }

    /// Returns the previous status.
    pub fn set_status(&mut self, status: TaskStatus) -> TaskStatus {
        std::mem::replace(&mut self.active_status, status)
    }

    pub fn add_action(&mut self, action: RecordedAction) {
        self.actions.add(action);
    }

    /// Record success of the active task. The driver moves on from here.
    pub fn mark_task_complete(&mut self, task_id: &TaskId) {
        self.completed_tasks.insert(task_id.clone());
        if self.active_task_id.as_ref() == Some(task_id) {
            self.active_status = TaskStatus::Complete;
        }
    }

    pub fn mark_job_complete(&mut self) {
        self.active_task_id = None;
        self.active_status = TaskStatus::Complete;
        self.active_worker = None;
        self.remote_id = None;
    }

    /// A task execution failure: counts against the job and the retry policy.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.active_status = TaskStatus::Error;
        self.last_error = Some(message.into());
    }

    /// A configuration failure: terminal without consuming a retry.
    pub fn fail_configuration(&mut self, message: impl Into<String>) {
        self.active_status = TaskStatus::Error;
        self.last_error = Some(message.into());
    }

    /// Automatic retry of the active task. The counter increment is part of
    /// the snapshot that gets checkpointed before the job is requeued.
    pub fn prepare_retry(&mut self) -> u32 {
        self.active_task_retries += 1;
        self.active_status = TaskStatus::Waiting;
        self.interrupted = false;
        self.active_worker = None;
        self.remote_id = None;
        self.active_task_retries
    }

    /// Operator retry of an errored or cancelled job: a fresh retry budget
    /// at the same task.
    pub fn reset_for_retry(&mut self) {
        self.active_task_retries = 0;
        self.active_status = TaskStatus::Waiting;
        self.interrupted = false;
        self.last_error = None;
        self.active_worker = None;
        self.remote_id = None;
    }

    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    // -- split / join --------------------------------------------------------

    /// Build the child for one split part. The child inherits the recorded
    /// actions and completed tasks up to the split point and starts with a
    /// clean error count.
    pub fn make_split_child(&self, part: SplitPart) -> Job {
        self.split_child_with_guid(uuid::Uuid::new_v4(), part)
    }

    fn split_child_with_guid(&self, guid: JobGuid, part: SplitPart) -> Job {
        Job {
            guid,
            parent_guid: Some(self.guid),
            pipeline_id: self.pipeline_id.clone(),
            active_task_id: self.active_task_id.clone(),
            active_status: TaskStatus::Waiting,
            active_task_retries: 0,
            error_count: 0,
            interrupted: false,
            submitted: false,
            actions: self.actions.clone(),
            root: self.root.clone(),
            log_path: self.root.join(format!("{guid}.log")),
            inputs: part.inputs,
            parameters: self.parameters.clone(),
            completed_tasks: self.completed_tasks.clone(),
            split_children: Vec::new(),
            joined: false,
            active_location: None,
            active_worker: None,
            remote_id: None,
            last_error: None,
            created_at: chrono::Utc::now(),
            revision: 0,
            spec: part.spec,
        }
    }

    /// Partition into children and park the parent until they rejoin.
    pub fn split(&mut self) -> Vec<Job> {
        let parts = self.spec.split(self);
        let children: Vec<Job> = parts
            .into_iter()
            .map(|part| self.make_split_child(part))
            .collect();
        self.split_children = children.iter().map(|c| c.guid).collect();
        self.joined = false;
        self.active_status = TaskStatus::SplitWaiting;
        children
    }

    /// Rebuild the children recorded by an earlier [`split`](Self::split),
    /// keeping their GUIDs. `None` when the partition no longer matches the
    /// recorded children.
    pub fn rebuild_split_children(&self) -> Option<Vec<Job>> {
        let parts = self.spec.split(self);
        if parts.len() != self.split_children.len() {
            return None;
        }
        Some(
            self.split_children
                .iter()
                .zip(parts)
                .map(|(guid, part)| self.split_child_with_guid(*guid, part))
                .collect(),
        )
    }

    /// A child parks at the join point (or at its last task when the
    /// progression is exhausted) until the parent joins it.
    pub fn await_join(&mut self, join_task: Option<TaskId>) {
        if let Some(task_id) = join_task {
            self.activate(task_id, TaskStatus::SplitWaiting);
        } else {
            self.active_status = TaskStatus::SplitWaiting;
        }
    }

    pub fn is_ready_to_join(&self) -> bool {
        self.active_status == TaskStatus::SplitWaiting
            || (self.active_status == TaskStatus::Complete && self.active_task_id.is_none())
    }

    /// Fold a child's provenance into this parent.
    pub fn merge_joined_child(&mut self, child: &Job) {
        self.actions.merge(&child.actions);
        self.completed_tasks
            .extend(child.completed_tasks.iter().cloned());
        self.error_count += child.error_count;
    }

    /// Resume the parent after every child was merged: `waiting` at the join
    /// task, or complete when the children ran out of tasks.
    pub fn finish_join(&mut self, join_task: Option<TaskId>) {
        self.joined = true;
        match join_task {
            Some(task_id) => self.activate(task_id, TaskStatus::Waiting),
            None => self.mark_job_complete(),
        }
    }

    // -- paths ---------------------------------------------------------------

    /// Rewrite every embedded path through `map`.
    pub fn map_paths<E>(&mut self, map: &impl Fn(&Path) -> Result<PathBuf, E>) -> Result<(), E> {
        self.root = map(&self.root)?;
        self.log_path = map(&self.log_path)?;
        for input in &mut self.inputs {
            *input = map(input)?;
        }
        self.actions.map_paths(map)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_kind::FileAnalysisSpec;

    fn pipeline_job() -> Job {
        Job::new(
            Box::new(FileAnalysisSpec::new("search", true)),
            Some(TaskId::pipeline("ms2", "default")),
            "/data/analysis",
        )
        .with_inputs(["/data/a.raw", "/data/b.raw"])
    }

    #[test]
    fn new_job_is_waiting_without_active_task() {
        let job = pipeline_job();
        assert_eq!(job.active_status, TaskStatus::Waiting);
        assert!(job.active_task_id.is_none());
        assert_eq!(job.log_path, PathBuf::from(format!("/data/analysis/{}.log", job.guid)));
    }

    #[test]
    fn reactivating_same_task_keeps_retry_counter() {
        let mut job = pipeline_job();
        let a = TaskId::task("ms2", "a");
        job.activate(a.clone(), TaskStatus::Waiting);
        job.record_error("boom");
        job.prepare_retry();
        job.activate(a, TaskStatus::Waiting);
        assert_eq!(job.active_task_retries, 1);

        job.activate(TaskId::task("ms2", "b"), TaskStatus::Waiting);
        assert_eq!(job.active_task_retries, 0);
    }

    #[test]
    fn configuration_failure_does_not_count_as_task_error() {
        let mut job = pipeline_job();
        job.fail_configuration("unknown location");
        assert_eq!(job.active_status, TaskStatus::Error);
        assert_eq!(job.error_count, 0);
        assert_eq!(job.last_error.as_deref(), Some("unknown location"));
    }

    #[test]
    fn split_creates_children_linked_to_parent() {
        let mut job = pipeline_job();
        job.activate(TaskId::task("ms2", "a"), TaskStatus::Waiting);
        job.error_count = 2;

        let children = job.split();

        assert_eq!(children.len(), 2);
        assert_eq!(job.active_status, TaskStatus::SplitWaiting);
        assert_eq!(job.split_children, children.iter().map(|c| c.guid).collect::<Vec<_>>());
        for child in &children {
            assert_eq!(child.parent_guid, Some(job.guid));
            assert_eq!(child.active_task_id, job.active_task_id);
            assert_eq!(child.error_count, 0);
            assert!(child.is_split());
            assert!(!child.is_splittable());
            assert_ne!(child.log_path, job.log_path);
        }
        assert!(!job.is_splittable());
    }

    #[test]
    fn rebuilt_children_keep_recorded_guids_and_parts() {
        let mut job = pipeline_job();
        job.activate(TaskId::task("ms2", "a"), TaskStatus::Waiting);
        let children = job.split();

        let rebuilt = job.rebuild_split_children().unwrap();
        assert_eq!(rebuilt.len(), children.len());
        for (original, again) in children.iter().zip(&rebuilt) {
            assert_eq!(again.guid, original.guid);
            assert_eq!(again.inputs, original.inputs);
            assert_eq!(again.parent_guid, Some(job.guid));
            assert_eq!(again.active_task_id, original.active_task_id);
        }

        job.split_children.pop();
        assert!(job.rebuild_split_children().is_none());
    }

    #[test]
    fn join_sums_errors_and_unions_actions() {
        let mut parent = pipeline_job();
        parent.activate(TaskId::task("ms2", "a"), TaskStatus::Waiting);
        let mut children = parent.split();

        for (i, child) in children.iter_mut().enumerate() {
            let mut action = RecordedAction::start(TaskId::task("ms2", "a"), format!("a{i}"));
            action.complete();
            child.add_action(action);
            child.mark_task_complete(&TaskId::task("ms2", "a"));
            child.error_count = i as u32 + 1;
            child.await_join(Some(TaskId::task("ms2", "b")));
            assert!(child.is_ready_to_join());
        }

        for child in &children {
            parent.merge_joined_child(child);
        }
        parent.finish_join(Some(TaskId::task("ms2", "b")));

        assert_eq!(parent.actions.len(), 2);
        assert_eq!(parent.error_count, 3);
        assert!(parent.joined);
        assert_eq!(parent.active_task_id, Some(TaskId::task("ms2", "b")));
        assert_eq!(parent.active_status, TaskStatus::Waiting);
        assert!(parent.is_task_complete(&TaskId::task("ms2", "a")));
    }

    #[test]
    fn map_paths_rewrites_root_log_and_inputs() {
        let mut job = pipeline_job();
        job.map_paths(&|p: &Path| {
            Ok::<_, ()>(PathBuf::from("/mnt").join(p.strip_prefix("/data").unwrap()))
        })
        .unwrap();
        assert_eq!(job.root, PathBuf::from("/mnt/analysis"));
        assert!(job.log_path.starts_with("/mnt/analysis"));
        assert_eq!(job.inputs[0], PathBuf::from("/mnt/a.raw"));
    }
}
