//! Simrun Runner
//!
//! Container entry point that runs exactly one simulation job, either a JSON
//! job description or (with `run-dir`) a prepared experiment tree.
//!
//! Architecture:
//! - Configuration: runner settings from environment, overridable by flags
//! - Services: input staging, command execution, output publishing
//! - Runner: sequences the services and maps the outcome to an exit code
//!
//! Tracing goes to stderr; stdout carries only the command's own output.

mod config;
mod error;
mod run_dir;
mod runner;
mod service;
mod workspace;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use simrun_core::exit;
use simrun_store::{StoreClient, StoreConfig};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::run_dir::{RunDirRequest, RunDirRunner};
use crate::runner::JobRunner;

const JOB_FORMAT: &str = r#"The JOB argument is a JSON object:

  {"inputs": ["s3://bucket/input.nc",
              ["https://example.org/climate.nc", "forcing.nc"]],
   "command": "mpiexec -n 8 pismr -i input.nc -o output.nc",
   "output": "s3://bucket/prefix/",
   "outputs": ["output.nc"]}

'inputs' lists files the command needs. s3:// and http(s):// entries are
downloaded into the working directory under the last path segment of the URL,
or under the given name for [url, name] pairs. Other entries are expected to
exist already.

'command' is run by the shell inside the working directory.

'output' (optional) is the S3 prefix results are uploaded to. Without
'outputs', every file the command created is uploaded, including the captured
stdout.log and stderr.log.

Exit codes: 0 success, 65 malformed job, 66 input download failed,
69 command could not start, 70 runner setup failed, 74 upload failed;
otherwise the command's own exit code.

`simrun run-dir --bucket B --bucket-prefix P --run-dir D` instead mirrors
s3://B/P into the working directory, runs every run_scripts/*.sh below D with
`bash -ex`, and uploads new or changed files back to s3://B/P.

AWS credentials and region come from the usual AWS_* environment variables."#;

#[derive(Parser)]
#[command(name = "simrun")]
#[command(about = "Downloads inputs, runs a simulation command, uploads results", long_about = None)]
#[command(after_help = JOB_FORMAT)]
#[command(subcommand_negates_reqs = true)]
struct Cli {
    /// JSON job description
    #[arg(required = true)]
    job: Option<String>,

    #[command(subcommand)]
    mode: Option<Mode>,

    /// Directory in which the per-job working directory is created
    #[arg(long, global = true)]
    work_root: Option<PathBuf>,

    /// Keep the working directory after the job finishes
    #[arg(long, global = true)]
    keep_workdir: bool,

    /// Shell used to interpret the command
    #[arg(long, global = true)]
    shell: Option<String>,

    /// Do not write command output into log files
    #[arg(long, global = true)]
    no_capture_logs: bool,

    /// Maximum number of concurrent uploads
    #[arg(long, global = true)]
    upload_concurrency: Option<usize>,
}

#[derive(Subcommand)]
enum Mode {
    /// Sync an S3 prefix, run its run_scripts/*.sh, sync the results back
    RunDir(RunDirArgs),
}

#[derive(Args)]
struct RunDirArgs {
    /// Bucket to mirror into the working directory; without it the run directory is used in place
    #[arg(long)]
    bucket: Option<String>,

    /// Prefix within the bucket
    #[arg(long, default_value = "")]
    bucket_prefix: String,

    /// Directory whose run_scripts are executed, relative to the mirrored prefix
    #[arg(long, default_value = ".")]
    run_dir: PathBuf,

    /// Interpreter the run scripts are passed to, with -ex
    #[arg(long, default_value = "bash")]
    interpreter: String,
}

impl RunDirArgs {
    fn to_request(&self) -> RunDirRequest {
        RunDirRequest {
            bucket: self.bucket.clone(),
            prefix: self.bucket_prefix.clone(),
            run_dir: self.run_dir.clone(),
            interpreter: self.interpreter.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simrun_runner=info,simrun_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid runner configuration: {:#}", e);
            return to_exit_code(exit::RUNNER_SETUP);
        }
    };
    info!(
        "Loaded configuration: work_root={}, shell={}, keep_workdir={}",
        config.work_root.display(),
        config.shell,
        config.keep_workdir
    );

    let store = Arc::new(StoreClient::s3(StoreConfig::from_env()));

    let outcome = match &cli.mode {
        Some(Mode::RunDir(args)) => {
            RunDirRunner::new(config, store)
                .run(&args.to_request())
                .await
        }
        None => {
            let job = cli.job.as_deref().unwrap_or_default();
            JobRunner::new(config, store).run(job).await
        }
    };
    to_exit_code(outcome.exit_code())
}

/// Loads configuration from the environment, then applies command-line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env().context("Failed to read configuration from environment")?;

    if let Some(root) = &cli.work_root {
        config.work_root = root.clone();
    }
    if cli.keep_workdir {
        config.keep_workdir = true;
    }
    if let Some(shell) = &cli.shell {
        config.shell = shell.clone();
    }
    if cli.no_capture_logs {
        config.capture_logs = false;
    }
    if let Some(concurrency) = cli.upload_concurrency {
        config.upload_concurrency = concurrency;
    }

    config.validate()?;
    Ok(config)
}

fn to_exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_status_byte(code))
}

/// Exit statuses are a single byte on every platform the runner targets
///
/// Codes that do not fit are clamped, and negative codes never read as success.
fn exit_status_byte(code: i32) -> u8 {
    if code < 0 {
        return exit::RUNNER_SETUP as u8;
    }
    code.min(255) as u8
}
