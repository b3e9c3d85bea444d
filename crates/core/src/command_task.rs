//! Tasks that run an external command.
//!
//! A [`CommandSpec`] is declared in the pipeline configuration file and turned
//! into a [`TaskFactory`]. Arguments may contain placeholders:
//!
//! | Placeholder       | Expands to                                   |
//! |-------------------|----------------------------------------------|
//! | `{inputs}`        | one argument per materialized input          |
//! | `{input}`         | the first materialized input                 |
//! | `{output:NAME}`   | staged path of declared output `NAME`        |
//! | `{param:KEY}`     | job parameter `KEY`                          |
//! | `{workdir}`       | the staging directory                        |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::factory::{FactoryConfig, FileType, TaskBehavior, TaskFactory};
use crate::job::Job;
use crate::settings::FactoryOverrides;
use crate::subprocess::{run_command, ProcessInput};
use crate::task::{Task, TaskContext};
use crate::task_id::TaskId;

/// Default command timeout (1 hour).
const DEFAULT_TIMEOUT_SECS: u64 = 60 * 60;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_role() -> String {
    "output".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub id: TaskId,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<CommandOutput>,
    /// Accepted input suffixes; empty accepts every input.
    #[serde(default)]
    pub input_suffixes: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub force_copy_inputs: bool,
    #[serde(flatten)]
    pub overrides: FactoryOverrides,
}

impl CommandSpec {
    pub fn into_factory(self) -> TaskFactory {
        let mut config = FactoryConfig::new(self.id.clone());
        if !self.input_suffixes.is_empty() {
            let suffixes: Vec<&str> = self.input_suffixes.iter().map(String::as_str).collect();
            config.input_types = vec![FileType::new(self.id.display_name(), &suffixes)];
        }
        config.apply(&self.overrides);
        TaskFactory::new(config, Arc::new(CommandBehavior { spec: Arc::new(self) }))
    }
}

struct CommandBehavior {
    spec: Arc<CommandSpec>,
}

impl TaskBehavior for CommandBehavior {
    fn create_task(&self, config: &FactoryConfig, _job: &Job) -> Result<Box<dyn Task>, CoreError> {
        Ok(Box::new(CommandTask {
            task_id: config.id.clone(),
            input_types: config.input_types.clone(),
            spec: Arc::clone(&self.spec),
        }))
    }
}

pub struct CommandTask {
    task_id: TaskId,
    input_types: Vec<FileType>,
    spec: Arc<CommandSpec>,
}

impl CommandTask {
    fn accepts(&self, input: &std::path::Path) -> bool {
        self.input_types.is_empty() || self.input_types.iter().any(|t| t.matches(input))
    }
}

#[async_trait]
impl Task for CommandTask {
    async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<(), CoreError> {
        ctx.check_cancelled()?;

        let mut inputs: Vec<PathBuf> = Vec::new();
        for source in ctx.job.inputs.iter().filter(|i| self.accepts(i)) {
            let local = ctx
                .work
                .materialize_input(source, self.spec.force_copy_inputs)
                .await?;
            ctx.action.add_input("input", source);
            inputs.push(local);
        }

        let mut outputs = Vec::with_capacity(self.spec.outputs.len());
        for output in &self.spec.outputs {
            let path = ctx.expect_output(&output.name, &output.role)?;
            outputs.push((output.name.clone(), path));
        }

        let workdir = ctx.work.path().to_path_buf();
        let args = expand_args(&self.spec.args, &inputs, &outputs, ctx.job, &workdir)?;
        for (key, value) in &ctx.job.parameters {
            ctx.action.add_parameter(key, value);
        }

        let input = ProcessInput::new(&self.spec.program, Duration::from_secs(self.spec.timeout_secs))
            .args(args)
            .current_dir(&workdir);

        tracing::info!(
            job_guid = %ctx.job.guid,
            task_id = %self.task_id,
            command = %input.command_line(),
            "Running command"
        );
        ctx.log.info(&format!("Running {}", input.command_line())).await;

        let output = run_command(&input, &ctx.cancel).await?.check()?;
        ctx.log
            .info(&format!(
                "{} finished in {}ms",
                self.spec.program, output.duration_ms
            ))
            .await;
        Ok(())
    }
}

fn expand_args(
    templates: &[String],
    inputs: &[PathBuf],
    outputs: &[(String, PathBuf)],
    job: &Job,
    workdir: &std::path::Path,
) -> Result<Vec<String>, CoreError> {
    let mut args = Vec::with_capacity(templates.len());
    for template in templates {
        if template == "{inputs}" {
            args.extend(inputs.iter().map(|p| p.display().to_string()));
            continue;
        }
        args.push(expand_one(template, inputs, outputs, job, workdir)?);
    }
    Ok(args)
}

fn expand_one(
    template: &str,
    inputs: &[PathBuf],
    outputs: &[(String, PathBuf)],
    job: &Job,
    workdir: &std::path::Path,
) -> Result<String, CoreError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let key = &after[..close];
        let value = match key.split_once(':') {
            None if key == "input" => inputs
                .first()
                .map(|p| p.display().to_string())
                .ok_or_else(|| CoreError::TaskFailed("Command needs an input but the job has none".into()))?,
            None if key == "workdir" => workdir.display().to_string(),
            Some(("output", name)) => outputs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, p)| p.display().to_string())
                .ok_or_else(|| CoreError::Configuration(format!("Undeclared output '{name}' in command arguments")))?,
            Some(("param", name)) => job
                .parameters
                .get(name)
                .cloned()
                .ok_or_else(|| CoreError::TaskFailed(format!("Job parameter '{name}' is not set")))?,
            _ => format!("{{{key}}}"),
        };
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
