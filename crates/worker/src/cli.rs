use std::path::PathBuf;

use clap::{Parser, Subcommand};
use taskline_core::status::TaskStatus;
use taskline_core::store::{JobRef, DEFAULT_LIMIT};

#[derive(Parser, Debug)]
#[command(name = "taskline-worker")]
#[command(version)]
#[command(about = "Runs task pipelines and manages their jobs.", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Resume checkpointed jobs and run until interrupted
    Run,

    /// Submit a job and run it until it settles
    Submit {
        /// Pipeline id, e.g. `ms2:pipeline:default`
        pipeline: String,

        /// Input file (repeatable)
        #[arg(short, long = "input")]
        inputs: Vec<PathBuf>,

        /// Directory receiving the job's outputs and log
        #[arg(long)]
        root: PathBuf,

        /// Protocol name of a file-analysis job
        #[arg(long)]
        protocol: Option<String>,

        /// Split into one child per input
        #[arg(long, action)]
        split: bool,

        /// Job parameter `key=value` (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// List persisted jobs
    List {
        #[arg(long)]
        status: Option<TaskStatus>,

        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Cancel a job by GUID or row id
    Cancel { id: JobRef },

    /// Retry a failed or cancelled job by GUID or row id
    Retry { id: JobRef },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
