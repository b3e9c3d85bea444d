//! Task identifiers and their canonical string encoding.
//!
//! A [`TaskId`] has two forms:
//!
//! - a namespace identifier optionally qualified by a name
//!   (`namespace` or `namespace:name`),
//! - a declaring module, a kind and a name, optionally versioned
//!   (`module:task:name` or `module:pipeline:name:version`).
//!
//! Components are percent-escaped (`%` as `%25`, `:` as `%3A`) so the
//! colon-delimited canonical form always round-trips.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Namespace prefix reserved for pipeline-local task factories.
const LOCAL_PREFIX: &str = "local$";

/// Whether a module-qualified id names a single task or a whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    Task,
    Pipeline,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Pipeline => "pipeline",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "task" => Some(Self::Task),
            "pipeline" => Some(Self::Pipeline),
            _ => None,
        }
    }
}

/// Structural identifier of a task factory or a task pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskId {
    Named {
        namespace: String,
        name: Option<String>,
    },
    Module {
        module: String,
        kind: TaskKind,
        name: String,
        version: Option<String>,
    },
}

impl TaskId {
    pub fn named(namespace: impl Into<String>) -> Self {
        Self::Named {
            namespace: namespace.into(),
            name: None,
        }
    }

    pub fn qualified(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Named {
            namespace: namespace.into(),
            name: Some(name.into()),
        }
    }

    pub fn task(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Module {
            module: module.into(),
            kind: TaskKind::Task,
            name: name.into(),
            version: None,
        }
    }

    pub fn pipeline(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Module {
            module: module.into(),
            kind: TaskKind::Pipeline,
            name: name.into(),
            version: None,
        }
    }

    /// Attach a version. Has no effect on the namespace form.
    pub fn with_version(self, version: impl Into<String>) -> Self {
        match self {
            Self::Module {
                module, kind, name, ..
            } => Self::Module {
                module,
                kind,
                name,
                version: Some(version.into()),
            },
            named => named,
        }
    }

    /// Identifier of a factory that is private to `pipeline`.
    ///
    /// Local ids are never visible to global registry lookups.
    pub fn local(pipeline: &TaskId, name: impl Into<String>) -> Self {
        Self::Named {
            namespace: format!("{LOCAL_PREFIX}{pipeline}"),
            name: Some(name.into()),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Named { namespace, .. } if namespace.starts_with(LOCAL_PREFIX))
    }

    /// The pipeline that owns a local id, if this is one.
    pub fn local_owner(&self) -> Option<TaskId> {
        match self {
            Self::Named { namespace, .. } => namespace
                .strip_prefix(LOCAL_PREFIX)
                .and_then(|owner| owner.parse().ok()),
            Self::Module { .. } => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named { name, .. } => name.as_deref(),
            Self::Module { name, .. } => Some(name),
        }
    }

    pub fn kind(&self) -> Option<TaskKind> {
        match self {
            Self::Named { .. } => None,
            Self::Module { kind, .. } => Some(*kind),
        }
    }

    pub fn module(&self) -> Option<&str> {
        match self {
            Self::Named { .. } => None,
            Self::Module { module, .. } => Some(module),
        }
    }

    pub fn is_pipeline(&self) -> bool {
        self.kind() == Some(TaskKind::Pipeline)
    }

    /// A short human-readable label, used for work directory names and logs.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Named {
                name: Some(name), ..
            } => name,
            Self::Named { namespace, .. } => namespace,
            Self::Module { name, .. } => name,
        }
    }

    /// Parse the canonical string form.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        let malformed = || CoreError::Configuration(format!("Malformed TaskId '{value}'"));

        let parts = value
            .split(':')
            .map(unescape)
            .collect::<Option<Vec<String>>>()
            .ok_or_else(malformed)?;
        if parts.iter().any(String::is_empty) {
            return Err(malformed());
        }

        let mut parts = parts.into_iter();
        match parts.len() {
            1 | 2 => Ok(Self::Named {
                namespace: parts.next().ok_or_else(malformed)?,
                name: parts.next(),
            }),
            3 | 4 => {
                let module = parts.next().ok_or_else(malformed)?;
                let kind = parts
                    .next()
                    .as_deref()
                    .and_then(TaskKind::parse)
                    .ok_or_else(malformed)?;
                let name = parts.next().ok_or_else(malformed)?;
                Ok(Self::Module {
                    module,
                    kind,
                    name,
                    version: parts.next(),
                })
            }
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { namespace, name } => {
                f.write_str(&escape(namespace))?;
                if let Some(name) = name {
                    write!(f, ":{}", escape(name))?;
                }
                Ok(())
            }
            Self::Module {
                module,
                kind,
                name,
                version,
            } => {
                write!(f, "{}:{}:{}", escape(module), kind.as_str(), escape(name))?;
                if let Some(version) = version {
                    write!(f, ":{}", escape(version))?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for TaskId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(component: &str) -> Option<String> {
    let mut out = String::with_capacity(component.len());
    let mut chars = component.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.to_ascii_uppercase().as_str() {
            "25" => out.push('%'),
            "3A" => out.push(':'),
            _ => return None,
        }
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
