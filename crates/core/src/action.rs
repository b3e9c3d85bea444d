//! Recorded actions: the provenance a job accumulates as tasks complete.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::task_id::TaskId;
use crate::types::Timestamp;

/// One input or output file of an action, tagged with its role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionFile {
    pub role: String,
    pub path: PathBuf,
}

impl ActionFile {
    pub fn new(role: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            role: role.into(),
            path: path.into(),
        }
    }
}

/// A single unit of provenance produced by a task run.
///
/// Field order matters: the derived ordering sorts by completion time
/// first, which is the order of the set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAction {
    pub completed_at: Option<Timestamp>,
    pub started_at: Timestamp,
    pub name: String,
    pub task_id: TaskId,
    #[serde(default)]
    pub inputs: Vec<ActionFile>,
    #[serde(default)]
    pub outputs: Vec<ActionFile>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl RecordedAction {
    pub fn start(task_id: TaskId, name: impl Into<String>) -> Self {
        Self {
            completed_at: None,
            started_at: chrono::Utc::now(),
            name: name.into(),
            task_id,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn add_input(&mut self, role: impl Into<String>, path: impl Into<PathBuf>) {
        self.inputs.push(ActionFile::new(role, path));
    }

    pub fn add_output(&mut self, role: impl Into<String>, path: impl Into<PathBuf>) {
        self.outputs.push(ActionFile::new(role, path));
    }

    pub fn add_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(key.into(), value.into());
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(chrono::Utc::now());
    }

    pub fn produces(&self, path: &Path) -> bool {
        self.outputs.iter().any(|o| o.path == path)
    }

    /// Rewrite every embedded path through `map`.
    pub fn map_paths<E>(&mut self, map: &impl Fn(&Path) -> Result<PathBuf, E>) -> Result<(), E> {
        for file in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            file.path = map(&file.path)?;
        }
        Ok(())
    }
}

/// Ordered set of recorded actions. Identical actions collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordedActionSet(BTreeSet<RecordedAction>);

impl RecordedActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, action: RecordedAction) -> bool {
        self.0.insert(action)
    }

    pub fn merge(&mut self, other: &RecordedActionSet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordedAction> {
        self.0.iter()
    }

    pub fn output_paths(&self) -> BTreeSet<&Path> {
        self.0
            .iter()
            .flat_map(|a| a.outputs.iter().map(|o| o.path.as_path()))
            .collect()
    }

    pub fn map_paths<E>(&mut self, map: &impl Fn(&Path) -> Result<PathBuf, E>) -> Result<(), E> {
        let mut mapped = BTreeSet::new();
        for mut action in std::mem::take(&mut self.0) {
            action.map_paths(map)?;
            mapped.insert(action);
        }
        self.0 = mapped;
        Ok(())
    }
}

impl FromIterator<RecordedAction> for RecordedActionSet {
    fn from_iter<T: IntoIterator<Item = RecordedAction>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
