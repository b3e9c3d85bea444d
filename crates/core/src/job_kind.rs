//! Job kinds: the polymorphic part of a job.
//!
//! Each kind is a [`JobSpec`] implementation identified by a discriminator
//! string. Persisted jobs carry the discriminator and are decoded through a
//! [`JobKindRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::job::Job;

/// One child produced by a split: its spec and the inputs it owns.
pub struct SplitPart {
    pub spec: Box<dyn JobSpec>,
    pub inputs: Vec<PathBuf>,
}

pub trait JobSpec: fmt::Debug + Send + Sync {
    /// Discriminator stored with the persisted record.
    fn kind(&self) -> &'static str;

    fn to_value(&self) -> Result<Value, CoreError>;

    fn box_clone(&self) -> Box<dyn JobSpec>;

    fn is_splittable(&self, _job: &Job) -> bool {
        false
    }

    /// Partition the job. The default is a single child owning everything.
    fn split(&self, job: &Job) -> Vec<SplitPart> {
        vec![SplitPart {
            spec: self.box_clone(),
            inputs: job.inputs.clone(),
        }]
    }

    fn description(&self, job: &Job) -> String {
        format!("{} job {}", self.kind(), job.guid)
    }
}

impl Clone for Box<dyn JobSpec> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// A job with no kind-specific behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericSpec {}

impl GenericSpec {
    pub const KIND: &'static str = "generic";
}

impl JobSpec for GenericSpec {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn to_value(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(self)?)
    }

    fn box_clone(&self) -> Box<dyn JobSpec> {
        Box::new(self.clone())
    }
}

/// Analysis of a set of input files under a named protocol. Optionally split
/// into one child per input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysisSpec {
    pub protocol_name: String,
    #[serde(default)]
    pub split_by_input: bool,
}

impl FileAnalysisSpec {
    pub const KIND: &'static str = "fileAnalysis";

    pub fn new(protocol_name: impl Into<String>, split_by_input: bool) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            split_by_input,
        }
    }
}

impl JobSpec for FileAnalysisSpec {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn to_value(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(self)?)
    }

    fn box_clone(&self) -> Box<dyn JobSpec> {
        Box::new(self.clone())
    }

    fn is_splittable(&self, job: &Job) -> bool {
        self.split_by_input && job.inputs.len() > 1
    }

    fn split(&self, job: &Job) -> Vec<SplitPart> {
        job.inputs
            .iter()
            .map(|input| SplitPart {
                spec: Box::new(Self {
                    protocol_name: self.protocol_name.clone(),
                    split_by_input: false,
                }),
                inputs: vec![input.clone()],
            })
            .collect()
    }

    fn description(&self, job: &Job) -> String {
        match job.inputs.as_slice() {
            [single] => format!(
                "{} ({})",
                self.protocol_name,
                single.file_name().unwrap_or_default().to_string_lossy()
            ),
            inputs => format!("{} ({} files)", self.protocol_name, inputs.len()),
        }
    }
}

type Decoder = fn(Value) -> Result<Box<dyn JobSpec>, CoreError>;

fn decode_as<T>(value: Value) -> Result<Box<dyn JobSpec>, CoreError>
where
    T: JobSpec + DeserializeOwned + 'static,
{
    Ok(Box::new(serde_json::from_value::<T>(value)?))
}

/// Discriminator-keyed decoders for every known job kind.
#[derive(Clone)]
pub struct JobKindRegistry {
    decoders: HashMap<String, Decoder>,
}

impl JobKindRegistry {
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registry with the kinds shipped by this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register::<GenericSpec>(GenericSpec::KIND);
        registry.register::<FileAnalysisSpec>(FileAnalysisSpec::KIND);
        registry
    }

    pub fn register<T>(&mut self, kind: &str)
    where
        T: JobSpec + DeserializeOwned + 'static,
    {
        self.decoders.insert(kind.to_string(), decode_as::<T>);
    }

    pub fn decode(&self, kind: &str, value: Value) -> Result<Box<dyn JobSpec>, CoreError> {
        let decoder = self
            .decoders
            .get(kind)
            .ok_or_else(|| CoreError::Configuration(format!("Unknown job kind '{kind}'")))?;
        decoder(value)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.decoders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for JobKindRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::task_id::TaskId;

    fn analysis_job(inputs: &[&str], split_by_input: bool) -> Job {
        let mut job = Job::new(
            Box::new(FileAnalysisSpec::new("search", split_by_input)),
            Some(TaskId::pipeline("ms2", "default")),
            "/data/analysis"
        );
        job.inputs = inputs.iter().map(PathBuf::from).collect();
        job
    }

    #[test]
    fn file_analysis_splits_one_child_per_input() {
        let job = analysis_job(&["/data/a.raw", "/data/b.raw"], true);
        assert!(job.spec.is_splittable(&job));

        let parts = job.spec.split(&job);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].inputs, vec![PathBuf::from("/data/b.raw")]);
        assert_eq!(parts[0].spec.kind(), FileAnalysisSpec::KIND);
    }

    #[test]
    fn single_input_is_not_splittable() {
        let job = analysis_job(&["/data/a.raw"], true);
        assert!(!job.spec.is_splittable(&job));
        assert_eq!(job.spec.description(&job), "search (a.raw)");
    }

    #[test]
    fn generic_split_is_a_single_child() {
        let mut job = Job::new(Box::new(GenericSpec::default()), None, "/data");
        job.inputs = vec![PathBuf::from("/data/x"), PathBuf::from("/data/y")];
        let parts = job.spec.split(&job);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].inputs.len(), 2);
    }

    #[test]
    fn registry_decodes_by_discriminator() {
        let registry = JobKindRegistry::with_builtin();
        let spec = FileAnalysisSpec::new("search", true);
        let decoded = registry
            .decode(FileAnalysisSpec::KIND, spec.to_value().unwrap())
            .unwrap();
        assert_eq!(decoded.to_value().unwrap(), spec.to_value().unwrap());
        assert_eq!(registry.kinds(), vec!["fileAnalysis", "generic"]);
    }

    #[test]
    fn unknown_kind_is_a_configuration_error() {
        let registry = JobKindRegistry::with_builtin();
        assert_matches!(
            registry.decode("mystery", Value::Null),
            Err(CoreError::Configuration(_))
        );
    }
}
