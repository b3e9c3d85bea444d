//! Execution locations a task can be routed to.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use taskline_core::error::CoreError;
use taskline_core::factory::LOCAL_LOCATION;
use taskline_remote::RemoteEngine;

#[derive(Clone)]
pub enum LocationKind {
    /// Runs in this process on the local runner loops.
    Local,
    /// Queued until a remote worker claims it.
    Polling,
    /// Submitted to a remote execution engine.
    Engine(Arc<dyn RemoteEngine>),
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Polling => "polling",
            Self::Engine(_) => "engine",
        }
    }
}

impl fmt::Debug for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(engine) => write!(f, "Engine({})", engine.name()),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Location {
    pub name: String,
    pub kind: LocationKind,
}

/// Named execution locations. `local` is always present.
#[derive(Debug, Clone)]
pub struct Locations {
    by_name: BTreeMap<String, Location>,
}

impl Default for Locations {
    fn default() -> Self {
        Self::new()
    }
}

impl Locations {
    pub fn new() -> Self {
        let mut by_name = BTreeMap::new();
        by_name.insert(
            LOCAL_LOCATION.to_string(),
            Location {
                name: LOCAL_LOCATION.to_string(),
                kind: LocationKind::Local,
            },
        );
        Self { by_name }
    }

    /// Add or replace a location.
    pub fn insert(&mut self, name: impl Into<String>, kind: LocationKind) {
        let name = name.into();
        tracing::debug!(location = %name, kind = kind.as_str(), "Registered execution location");
        self.by_name.insert(name.clone(), Location { name, kind });
    }

    pub fn with_polling(mut self, name: impl Into<String>) -> Self {
        self.insert(name, LocationKind::Polling);
        self
    }

    /// Register `engine` under its own name.
    pub fn with_engine(mut self, engine: Arc<dyn RemoteEngine>) -> Self {
        let name = engine.name().to_string();
        self.insert(name, LocationKind::Engine(engine));
        self
    }

    pub fn get(&self, name: &str) -> Result<&Location, CoreError> {
        self.by_name
            .get(name)
            .ok_or_else(|| CoreError::Configuration(format!("Unknown execution location '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn engines(&self) -> impl Iterator<Item = (&str, &Arc<dyn RemoteEngine>)> {
        self.by_name.values().filter_map(|l| match &l.kind {
            LocationKind::Engine(engine) => Some((l.name.as_str(), engine)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn local_is_always_available() {
        let locations = Locations::new();
        assert_matches!(locations.get("local").unwrap().kind, LocationKind::Local);
    }

    #[test]
    fn unknown_location_is_configuration_error() {
        let locations = Locations::new().with_polling("cluster");
        assert_matches!(locations.get("cluster").unwrap().kind, LocationKind::Polling);
        assert!(locations.get("elsewhere").unwrap_err().is_configuration());
    }
}
