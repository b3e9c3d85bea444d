//! Pipeline configuration file.
//!
//! ```json
//! {
//!   "commands":  [{ "id": "ms2:task:convert", "program": "convert", "args": ["{input}"] }],
//!   "factories": [{ "id": "ms2:task:search-fast", "cloneFrom": "ms2:task:search", "autoRetry": 2 }],
//!   "pipelines": [{ "id": "ms2:pipeline:default", "progression": ["ms2:task:convert"] }],
//!   "locations": [{ "name": "cluster", "kind": "engine", "url": "http://grid:8080",
//!                   "pathMappings": [{ "localPrefix": "/data", "remotePrefix": "/mnt/data" }] }]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use taskline_core::codec::JobCodec;
use taskline_core::command_task::CommandSpec;
use taskline_core::registry::TaskRegistry;
use taskline_core::settings::{PipelineSettings, TaskFactorySettings};
use taskline_pipeline::{LocationKind, Locations};
use taskline_remote::path_mapper::PathMapping;
use taskline_remote::{HttpEngine, PrefixPathMapper};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub factories: Vec<TaskFactorySettings>,
    #[serde(default)]
    pub pipelines: Vec<PipelineSettings>,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LocationConfig {
    /// Another name for the in-process runners.
    Local { name: String },
    /// Jobs wait until an external worker claims them.
    Polling { name: String },
    Engine {
        name: String,
        url: String,
        #[serde(default, rename = "pathMappings")]
        path_mappings: Vec<PathMapping>,
    },
}

impl PipelineConfig {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("Invalid pipeline configuration")
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read pipeline configuration {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("In {}", path.display()))
    }

    /// Register commands, then factory settings, then pipelines, in file
    /// order so later entries may build on earlier ones.
    pub fn build_registry(&self) -> anyhow::Result<TaskRegistry> {
        let registry = TaskRegistry::new();
        for command in &self.commands {
            registry.register_factory(command.clone().into_factory())?;
        }
        for settings in &self.factories {
            registry.apply_factory_settings(settings)?;
        }
        for settings in &self.pipelines {
            let pipeline = registry.apply_pipeline_settings(settings)?;
            tracing::debug!(
                pipeline_id = %pipeline.id(),
                tasks = pipeline.progression().len(),
                "Configured pipeline"
            );
        }
        Ok(registry)
    }

    pub fn build_locations(&self, codec: &JobCodec) -> anyhow::Result<Locations> {
        let mut locations = Locations::new();
        for location in &self.locations {
            match location {
                LocationConfig::Local { name } => locations.insert(name.clone(), LocationKind::Local),
                LocationConfig::Polling { name } => locations.insert(name.clone(), LocationKind::Polling),
                LocationConfig::Engine {
                    name,
                    url,
                    path_mappings,
                } => {
                    let mapper = PrefixPathMapper::new(path_mappings.clone())
                        .with_context(|| format!("Location '{name}'"))?;
                    let engine = HttpEngine::new(name.clone(), url.clone(), Arc::new(mapper), codec.clone());
                    locations.insert(name.clone(), LocationKind::Engine(Arc::new(engine)));
                }
            }
        }
        Ok(locations)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
