//! Registry of task factories and task pipelines.
//!
//! Registrations replace earlier entries with the same id. Every write is
//! checked against the reference graph (pipeline -> progression tasks,
//! factory -> dependency, pipeline -> its local factories) and rejected if it
//! would close a cycle, leaving the registry unchanged.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::CoreError;
use crate::factory::TaskFactory;
use crate::pipeline::TaskPipeline;
use crate::settings::{PipelineSettings, TaskFactorySettings};
use crate::task_id::TaskId;

/// Which pipelines are visible to a caller.
#[derive(Debug, Clone, Default)]
pub struct PipelineScope {
    /// `None` means every module is active.
    pub active_modules: Option<BTreeSet<String>>,
}

impl PipelineScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn modules<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            active_modules: Some(modules.into_iter().map(Into::into).collect()),
        }
    }

    /// Pipelines without a declaring module are always visible.
    pub fn includes(&self, module: Option<&str>) -> bool {
        match (&self.active_modules, module) {
            (None, _) | (_, None) => true,
            (Some(active), Some(module)) => active.contains(module),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Inner {
    factories: HashMap<TaskId, TaskFactory>,
    pipelines: HashMap<TaskId, TaskPipeline>,
}

impl Inner {
    fn references(&self, id: &TaskId) -> Vec<TaskId> {
        let mut refs = Vec::new();
        if let Some(pipeline) = self.pipelines.get(id) {
            refs.extend(pipeline.progression().iter().cloned());
            refs.extend(
                self.factories
                    .keys()
                    .filter(|f| f.local_owner().as_ref() == Some(id))
                    .cloned(),
            );
        }
        if let Some(dependency) = self.factories.get(id).and_then(TaskFactory::dependency_id) {
            refs.push(dependency.clone());
        }
        refs
    }

    /// Depth-first search for a back edge.
    fn find_cycle(&self) -> Option<TaskId> {
        let mut done: HashSet<TaskId> = HashSet::new();
        let mut on_path: HashSet<TaskId> = HashSet::new();

        let roots: Vec<TaskId> = self
            .pipelines
            .keys()
            .chain(self.factories.keys())
            .cloned()
            .collect();

        for root in roots {
            if done.contains(&root) {
                continue;
            }
            // Explicit stack of (node, next child index).
            let mut stack: Vec<(TaskId, Vec<TaskId>, usize)> = Vec::new();
            on_path.insert(root.clone());
            let refs = self.references(&root);
            stack.push((root, refs, 0));

            while let Some((node, refs, next)) = stack.last_mut() {
                if let Some(child) = refs.get(*next).cloned() {
                    *next += 1;
                    if on_path.contains(&child) {
                        return Some(child);
                    }
                    if !done.contains(&child) {
                        on_path.insert(child.clone());
                        let child_refs = self.references(&child);
                        stack.push((child, child_refs, 0));
                    }
                } else {
                    let node = node.clone();
                    on_path.remove(&node);
                    done.insert(node);
                    stack.pop();
                }
            }
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    inner: RwLock<Inner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` to a copy and commit only if no cycle results.
    fn commit(&self, change: impl FnOnce(&mut Inner)) -> Result<(), CoreError> {
        let mut guard = self.write();
        let mut next = guard.clone();
        change(&mut next);
        if let Some(at) = next.find_cycle() {
            return Err(CoreError::Configuration(format!(
                "Circular task reference through {at}"
            )));
        }
        *guard = next;
        Ok(())
    }

    pub fn register_factory(&self, factory: TaskFactory) -> Result<(), CoreError> {
        let id = factory.id().clone();
        self.commit(|inner| {
            inner.factories.insert(id.clone(), factory);
        })?;
        tracing::debug!(task_id = %id, "Registered task factory");
        Ok(())
    }

    pub fn register_pipeline(&self, pipeline: TaskPipeline) -> Result<(), CoreError> {
        self.register_pipeline_with_locals(pipeline, Vec::new())
    }

    /// Register a pipeline together with its private factories. Local
    /// factories previously registered for the same pipeline are dropped.
    pub fn register_pipeline_with_locals(
        &self,
        pipeline: TaskPipeline,
        locals: Vec<TaskFactory>,
    ) -> Result<(), CoreError> {
        pipeline.validate()?;
        let id = pipeline.id().clone();
        if let Some(stray) = locals
            .iter()
            .find(|f| f.id().local_owner().as_ref() != Some(&id))
        {
            return Err(CoreError::Configuration(format!(
                "Factory {} is not local to pipeline {id}",
                stray.id()
            )));
        }
        let local_count = locals.len();

        self.commit(|inner| {
            inner
                .factories
                .retain(|fid, _| fid.local_owner().as_ref() != Some(&id));
            for factory in locals {
                inner.factories.insert(factory.id().clone(), factory);
            }
            inner.pipelines.insert(id.clone(), pipeline);
        })?;
        tracing::debug!(pipeline_id = %id, local_tasks = local_count, "Registered task pipeline");
        Ok(())
    }

    /// Global lookup. Pipeline-local factories are never visible here.
    pub fn lookup(&self, id: &TaskId) -> Result<TaskFactory, CoreError> {
        if id.is_local() {
            return Err(CoreError::not_found("task factory", id));
        }
        self.read()
            .factories
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("task factory", id))
    }

    /// Lookup on behalf of a pipeline: its local factories, then global ones.
    pub fn lookup_in(&self, pipeline_id: &TaskId, id: &TaskId) -> Result<TaskFactory, CoreError> {
        if id.is_local() && id.local_owner().as_ref() != Some(pipeline_id) {
            return Err(CoreError::not_found("task factory", id));
        }
        self.read()
            .factories
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("task factory", id))
    }

    pub fn pipeline(&self, id: &TaskId) -> Result<TaskPipeline, CoreError> {
        self.read()
            .pipelines
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("task pipeline", id))
    }

    /// Visible pipelines sorted by id.
    pub fn resolve_pipelines(&self, scope: &PipelineScope) -> Vec<TaskPipeline> {
        let mut pipelines: Vec<TaskPipeline> = self
            .read()
            .pipelines
            .values()
            .filter(|p| scope.includes(p.module()))
            .cloned()
            .collect();
        pipelines.sort_by(|a, b| a.id().cmp(b.id()));
        pipelines
    }

    pub fn apply_factory_settings(&self, settings: &TaskFactorySettings) -> Result<TaskFactory, CoreError> {
        let base = self.lookup(settings.base_id()).map_err(|_| {
            CoreError::Configuration(format!(
                "Factory settings {} refer to unknown factory {}",
                settings.id,
                settings.base_id()
            ))
        })?;
        let factory = base.with_id(settings.id.clone()).configure(&settings.overrides);
        self.register_factory(factory.clone())?;
        Ok(factory)
    }

    pub fn apply_pipeline_settings(&self, settings: &PipelineSettings) -> Result<TaskPipeline, CoreError> {
        let mut pipeline = match &settings.clone_from {
            Some(base_id) => {
                let base = self.pipeline(base_id).map_err(|_| {
                    CoreError::Configuration(format!(
                        "Pipeline settings {} refer to unknown pipeline {base_id}",
                        settings.id
                    ))
                })?;
                let mut pipeline = base.with_id(settings.id.clone());
                if let Some(progression) = &settings.progression {
                    pipeline.set_progression(progression.clone());
                }
                pipeline
            }
            None => TaskPipeline::new(
                settings.id.clone(),
                settings.progression.clone().unwrap_or_default(),
            )?,
        };

        if let Some(name) = &settings.protocol_name {
            pipeline = pipeline.with_protocol_name(name.clone());
        }
        if let Some(unique) = settings.use_unique_analysis_directory {
            pipeline = pipeline.with_unique_analysis_directory(unique);
        }
        if let Some(workflow) = &settings.workflow {
            pipeline = pipeline.with_workflow(workflow.clone());
        }
        if let Some(description) = &settings.description {
            pipeline = pipeline.with_description(description.clone());
        }
        pipeline.apply_edits(&settings.edits)?;

        let mut locals = Vec::with_capacity(settings.local_tasks.len());
        for local in &settings.local_tasks {
            let base = self.lookup(&local.clone_from).map_err(|_| {
                CoreError::Configuration(format!(
                    "Local task {} of pipeline {} refers to unknown factory {}",
                    local.name, settings.id, local.clone_from
                ))
            })?;
            let local_id = TaskId::local(&settings.id, &local.name);
            pipeline.substitute(&local.clone_from, &local_id);
            locals.push(base.with_id(local_id).configure(&local.overrides));
        }

        self.register_pipeline_with_locals(pipeline.clone(), locals)?;
        Ok(pipeline)
    }

    pub fn factory_count(&self) -> usize {
        self.read().factories.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
