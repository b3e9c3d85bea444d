//! Task pipelines: an ordered progression of task ids plus metadata.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::settings::ProgressionEdit;
use crate::task_id::TaskId;
use crate::types::JobGuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPipeline {
    id: TaskId,
    progression: Vec<TaskId>,
    module: Option<String>,
    protocol_name: Option<String>,
    use_unique_analysis_directory: bool,
    workflow: Option<String>,
    description: Option<String>,
}

impl TaskPipeline {
    pub fn new(id: TaskId, progression: Vec<TaskId>) -> Result<Self, CoreError> {
        let pipeline = Self {
            module: id.module().map(str::to_string),
            id,
            progression,
            protocol_name: None,
            use_unique_analysis_directory: false,
            workflow: None,
            description: None,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// A progression must be non-empty and free of duplicates.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.progression.is_empty() {
            return Err(CoreError::Configuration(format!(
                "Pipeline {} has an empty progression",
                self.id
            )));
        }
        let mut seen = HashSet::new();
        for task_id in &self.progression {
            if !seen.insert(task_id) {
                return Err(CoreError::Configuration(format!(
                    "Pipeline {} lists task {task_id} more than once",
                    self.id
                )));
            }
        }
        Ok(())
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn progression(&self) -> &[TaskId] {
        &self.progression
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn protocol_name(&self) -> Option<&str> {
        self.protocol_name.as_deref()
    }

    pub fn use_unique_analysis_directory(&self) -> bool {
        self.use_unique_analysis_directory
    }

    pub fn workflow(&self) -> Option<&str> {
        self.workflow.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.module = id.module().map(str::to_string).or(self.module);
        self.id = id;
        self
    }

    pub fn with_module(mut self, module: Option<String>) -> Self {
        self.module = module;
        self
    }

    pub fn with_protocol_name(mut self, name: impl Into<String>) -> Self {
        self.protocol_name = Some(name.into());
        self
    }

    pub fn with_unique_analysis_directory(mut self, unique: bool) -> Self {
        self.use_unique_analysis_directory = unique;
        self
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub(crate) fn set_progression(&mut self, progression: Vec<TaskId>) {
        self.progression = progression;
    }

    pub fn index_of(&self, task_id: &TaskId) -> Option<usize> {
        self.progression.iter().position(|id| id == task_id)
    }

    /// Replace every occurrence of `from` with `to`.
    pub(crate) fn substitute(&mut self, from: &TaskId, to: &TaskId) {
        for id in &mut self.progression {
            if id == from {
                *id = to.clone();
            }
        }
    }

    pub fn apply_edits(&mut self, edits: &[ProgressionEdit]) -> Result<(), CoreError> {
        for edit in edits {
            let index = self.index_of(edit.target()).ok_or_else(|| {
                CoreError::Configuration(format!(
                    "Pipeline {} has no task {} to edit",
                    self.id,
                    edit.target()
                ))
            })?;
            match edit {
                ProgressionEdit::Replace { with, .. } => self.progression[index] = with.clone(),
                ProgressionEdit::InsertBefore { task, .. } => {
                    self.progression.insert(index, task.clone())
                }
                ProgressionEdit::InsertAfter { task, .. } => {
                    self.progression.insert(index + 1, task.clone())
                }
                ProgressionEdit::Remove { .. } => {
                    self.progression.remove(index);
                }
            }
        }
        self.validate()
    }

    /// Directory that receives a job's outputs under `root`.
    pub fn analysis_directory(&self, root: &Path, protocol_name: &str, guid: JobGuid) -> PathBuf {
        let base = root.join(sanitize(protocol_name));
        if self.use_unique_analysis_directory {
            base.join(guid.simple().to_string())
        } else {
            base
        }
    }
}

/// Keep path components portable.
pub(crate) fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn t(name: &str) -> TaskId {
        TaskId::task("m", name)
    }

    fn abc() -> TaskPipeline {
        TaskPipeline::new(TaskId::pipeline("m", "p"), vec![t("a"), t("b"), t("c")]).unwrap()
    }

    #[test]
    fn empty_progression_is_rejected() {
        assert_matches!(
            TaskPipeline::new(TaskId::pipeline("m", "p"), vec![]),
            Err(CoreError::Configuration(_))
        );
    }

    #[test]
    fn duplicate_tasks_are_rejected() {
        assert_matches!(
            TaskPipeline::new(TaskId::pipeline("m", "p"), vec![t("a"), t("a")]),
            Err(CoreError::Configuration(_))
        );
    }

    #[test]
    fn edits_apply_in_order() {
        let mut p = abc();
        p.apply_edits(&[
            ProgressionEdit::Replace { target: t("b"), with: t("b2") },
            ProgressionEdit::InsertBefore { target: t("a"), task: t("zero") },
            ProgressionEdit::InsertAfter { target: t("c"), task: t("d") },
            ProgressionEdit::Remove { target: t("a") },
        ])
        .unwrap();
        assert_eq!(p.progression(), &[t("zero"), t("b2"), t("c"), t("d")]);
    }

    #[test]
    fn edit_of_missing_task_is_rejected() {
        let mut p = abc();
        assert_matches!(
            p.apply_edits(&[ProgressionEdit::Remove { target: t("zz") }]),
            Err(CoreError::Configuration(_))
        );
    }

    #[test]
    fn analysis_directory_honors_unique_flag() {
        let guid = uuid::Uuid::new_v4();
        let shared = abc().with_protocol_name("Search 1");
        assert_eq!(
            shared.analysis_directory(Path::new("/data"), "Search 1", guid),
            PathBuf::from("/data/Search_1")
        );

        let unique = abc().with_unique_analysis_directory(true);
        let dir = unique.analysis_directory(Path::new("/data"), "run", guid);
        assert_eq!(dir, PathBuf::from("/data/run").join(guid.simple().to_string()));
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize("a/b:c"), "a_b_c");
        assert_eq!(sanitize(".."), "_");
    }
}
