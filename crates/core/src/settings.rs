//! Server-local configuration objects for factories and pipelines.
//!
//! Settings wrap an existing definition and override parts of it; any option
//! left unset inherits from the base.

use serde::{Deserialize, Serialize};

use crate::task_id::TaskId;

/// Overridable options of a task factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_work: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_retry: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_parameter_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_id: Option<TaskId>,
}

impl FactoryOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Settings that produce a (possibly renamed) copy of a registered factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFactorySettings {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_from: Option<TaskId>,
    #[serde(flatten)]
    pub overrides: FactoryOverrides,
}

impl TaskFactorySettings {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            clone_from: None,
            overrides: FactoryOverrides::default(),
        }
    }

    /// The factory these settings are applied on top of.
    pub fn base_id(&self) -> &TaskId {
        self.clone_from.as_ref().unwrap_or(&self.id)
    }
}

/// A factory private to one pipeline.
///
/// Every occurrence of `clone_from` in the pipeline's progression is replaced
/// by the local factory's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTaskSettings {
    pub name: String,
    pub clone_from: TaskId,
    #[serde(flatten)]
    pub overrides: FactoryOverrides,
}

/// Edit applied to a base pipeline's progression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ProgressionEdit {
    Replace { target: TaskId, with: TaskId },
    InsertBefore { target: TaskId, task: TaskId },
    InsertAfter { target: TaskId, task: TaskId },
    Remove { target: TaskId },
}

impl ProgressionEdit {
    pub fn target(&self) -> &TaskId {
        match self {
            Self::Replace { target, .. }
            | Self::InsertBefore { target, .. }
            | Self::InsertAfter { target, .. }
            | Self::Remove { target } => target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_from: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progression: Option<Vec<TaskId>>,
    #[serde(default)]
    pub edits: Vec<ProgressionEdit>,
    #[serde(default)]
    pub local_tasks: Vec<LocalTaskSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_unique_analysis_directory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PipelineSettings {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            clone_from: None,
            progression: None,
            edits: Vec::new(),
            local_tasks: Vec::new(),
            protocol_name: None,
            use_unique_analysis_directory: None,
            workflow: None,
            description: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_settings_use_camel_case_and_inherit_unset_options() {
        let json = r#"{
            "id": "ms2:task:search-fast",
            "cloneFrom": "ms2:task:search",
            "largeWork": true,
            "autoRetry": 2
        }"#;
        let settings: TaskFactorySettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.base_id(), &TaskId::task("ms2", "search"));
        assert_eq!(settings.overrides.large_work, Some(true));
        assert_eq!(settings.overrides.auto_retry, Some(2));
        assert_eq!(settings.overrides.location, None);
        assert_eq!(settings.overrides.join, None);
    }

    #[test]
    fn base_id_defaults_to_own_id() {
        let settings = TaskFactorySettings::new(TaskId::task("m", "t"));
        assert_eq!(settings.base_id(), &settings.id);
        assert!(settings.overrides.is_empty());
    }

    #[test]
    fn progression_edits_are_tagged_by_op() {
        let json = r#"[
            {"op": "replace", "target": "m:task:a", "with": "m:task:b"},
            {"op": "insertAfter", "target": "m:task:b", "task": "m:task:c"},
            {"op": "remove", "target": "m:task:z"}
        ]"#;
        let edits: Vec<ProgressionEdit> = serde_json::from_str(json).unwrap();
        assert_eq!(edits.len(), 3);
        assert_eq!(edits[2].target(), &TaskId::task("m", "z"));
        assert!(matches!(edits[1], ProgressionEdit::InsertAfter { .. }));
    }

    #[test]
    fn pipeline_settings_defaults() {
        let settings: PipelineSettings =
            serde_json::from_str(r#"{"id": "m:pipeline:p", "cloneFrom": "m:pipeline:base"}"#).unwrap();
        assert!(settings.edits.is_empty());
        assert!(settings.local_tasks.is_empty());
        assert_eq!(settings.progression, None);
    }
}
