//! Per-task staging directories.
//!
//! A [`WorkDirectory`] is owned by one running task. Inputs that are not
//! local to its pool are copied in (at most once per source path), outputs
//! are staged under declared names and moved to their permanent location by
//! [`WorkDirectory::finalize`], and [`WorkDirectory::discard`] removes
//! everything afterwards.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::action::RecordedAction;
use crate::copy_lock::{CopyLock, CopyLockGuard};
use crate::error::CoreError;
use crate::pipeline::sanitize;
use crate::task_id::TaskId;
use crate::types::JobGuid;

/// An output a task promised to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedOutput {
    pub name: String,
    pub role: String,
    /// Explicit permanent location. Defaults to the job's analysis directory.
    pub destination: Option<PathBuf>,
}

impl ExpectedOutput {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            destination: None,
        }
    }

    pub fn to(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// A staging area root plus the roots whose files need no copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPool {
    pub root: PathBuf,
    pub local_roots: Vec<PathBuf>,
}

impl WorkPool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            local_roots: Vec::new(),
        }
    }

    pub fn with_local_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.local_roots = roots;
        self
    }

    /// The staging root is always local.
    pub fn is_local(&self, path: &Path) -> bool {
        path.starts_with(&self.root) || self.local_roots.iter().any(|r| path.starts_with(r))
    }
}

#[derive(Debug, Clone)]
pub struct WorkDirectoryManager {
    standard: WorkPool,
    large: WorkPool,
    copy_lock: Option<CopyLock>,
}

impl WorkDirectoryManager {
    pub fn new(standard: WorkPool, large: WorkPool) -> Self {
        Self {
            standard,
            large,
            copy_lock: None,
        }
    }

    pub fn with_copy_lock(mut self, lock: CopyLock) -> Self {
        self.copy_lock = Some(lock);
        self
    }

    pub fn pool(&self, large_work: bool) -> &WorkPool {
        if large_work {
            &self.large
        } else {
            &self.standard
        }
    }

    /// Create a clean staging directory `<pool root>/<job guid>/<task name>`.
    pub async fn allocate(
        &self,
        guid: JobGuid,
        task_id: &TaskId,
        large_work: bool,
    ) -> Result<WorkDirectory, CoreError> {
        let pool = self.pool(large_work).clone();
        let dir = pool
            .root
            .join(guid.to_string())
            .join(sanitize(task_id.display_name()));

        if tokio::fs::try_exists(&dir).await? {
            tracing::debug!(dir = %dir.display(), "Clearing stale work directory");
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;

        tracing::debug!(
            job_guid = %guid,
            task_id = %task_id,
            dir = %dir.display(),
            large_work,
            "Allocated work directory"
        );
        Ok(WorkDirectory {
            dir,
            pool,
            copy_lock: self.copy_lock.clone(),
            materialized: HashMap::new(),
            copied: BTreeSet::new(),
            declared: BTreeSet::new(),
            copies_performed: 0,
        })
    }
}

#[derive(Debug)]
pub struct WorkDirectory {
    dir: PathBuf,
    pool: WorkPool,
    copy_lock: Option<CopyLock>,
    /// Source path -> path the task should read.
    materialized: HashMap<PathBuf, PathBuf>,
    /// Files this directory copied in.
    copied: BTreeSet<PathBuf>,
    declared: BTreeSet<String>,
    copies_performed: usize,
}

impl WorkDirectory {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn is_local(&self, source: &Path) -> bool {
        self.pool.is_local(source)
    }

    pub fn copies_performed(&self) -> usize {
        self.copies_performed
    }

    /// Take a copy-lock slot, if a copy lock is configured.
    pub async fn ensure_copying_lock(&self) -> Result<Option<CopyLockGuard>, CoreError> {
        match &self.copy_lock {
            Some(lock) => lock.acquire().await.map(Some),
            None => Ok(None),
        }
    }

    /// Path the task should read `source` from. Foreign inputs (or every
    /// input when `force_copy` is set) are copied in once; repeated calls
    /// return the same path.
    pub async fn materialize_input(&mut self, source: &Path, force_copy: bool) -> Result<PathBuf, CoreError> {
        if let Some(local) = self.materialized.get(source) {
            return Ok(local.clone());
        }
        if !force_copy && self.is_local(source) {
            self.materialized
                .insert(source.to_path_buf(), source.to_path_buf());
            return Ok(source.to_path_buf());
        }

        let destination = self.unique_destination(source)?;
        {
            let _guard = self.ensure_copying_lock().await?;
            tokio::fs::copy(source, &destination).await.map_err(|e| {
                CoreError::Infrastructure(format!(
                    "Failed to copy input {} to {}: {e}",
                    source.display(),
                    destination.display()
                ))
            })?;
        }
        self.copies_performed += 1;
        tracing::debug!(
            source = %source.display(),
            destination = %destination.display(),
            "Copied input into work directory"
        );

        self.copied.insert(destination.clone());
        self.materialized
            .insert(source.to_path_buf(), destination.clone());
        Ok(destination)
    }

    fn unique_destination(&self, source: &Path) -> Result<PathBuf, CoreError> {
        let file_name = source
            .file_name()
            .ok_or_else(|| CoreError::Validation(format!("Input {} has no file name", source.display())))?
            .to_string_lossy()
            .into_owned();
        let mut candidate = self.dir.join(&file_name);
        let mut n = 1;
        while self.copied.contains(&candidate) || self.declared.contains(&file_name_of(&candidate)) {
            candidate = self.dir.join(format!("{n}_{file_name}"));
            n += 1;
        }
        Ok(candidate)
    }

    /// Reserve the staged path of an output.
    pub fn declare_output(&mut self, name: &str) -> Result<PathBuf, CoreError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(CoreError::Validation(format!("Invalid output name '{name}'")));
        }
        self.declared.insert(name.to_string());
        Ok(self.dir.join(name))
    }

    /// Move every present expected output to its permanent location and
    /// record it on `action`. Missing outputs are skipped; unexpected extra
    /// files are reported only when the task succeeded.
    pub async fn finalize(
        &self,
        expected: &[ExpectedOutput],
        analysis_dir: &Path,
        action: &mut RecordedAction,
        succeeded: bool,
    ) -> Result<Vec<PathBuf>, CoreError> {
        let mut persisted = Vec::new();
        for output in expected {
            let staged = self.dir.join(&output.name);
            if !tokio::fs::try_exists(&staged).await? {
                tracing::debug!(output = %output.name, "Expected output not produced");
                continue;
            }
            let destination = output
                .destination
                .clone()
                .unwrap_or_else(|| analysis_dir.join(&output.name));
            move_file(&staged, &destination).await?;
            action.add_output(&output.role, &destination);
            persisted.push(destination);
        }

        if succeeded {
            let expected_names: BTreeSet<&str> = expected.iter().map(|o| o.name.as_str()).collect();
            let mut entries = tokio::fs::read_dir(&self.dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = file_name_of(&path);
                if !expected_names.contains(name.as_str()) && !self.copied.contains(&path) {
                    tracing::warn!(
                        file = %path.display(),
                        "Unexpected file left in work directory"
                    );
                }
            }
        }
        Ok(persisted)
    }

    /// Delete copied inputs and the staging directory. Failures are logged
    /// and never replace the task's own outcome.
    pub async fn discard(self, succeeded: bool) {
        for copy in &self.copied {
            if let Err(e) = tokio::fs::remove_file(copy).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(file = %copy.display(), error = %e, "Failed to delete copied input");
                }
            }
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            tracing::warn!(
                dir = %self.dir.display(),
                error = %e,
                succeeded,
                "Failed to delete work directory"
            );
        }
        if let Some(parent) = self.dir.parent() {
            // Only succeeds once the job's last work directory is gone.
            let _ = tokio::fs::remove_dir(parent).await;
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn move_file(from: &Path, to: &Path) -> Result<(), CoreError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // Different filesystem.
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
