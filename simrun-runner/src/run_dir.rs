//! Run-directory mode
//!
//! Instead of a single command, runs a prepared experiment tree:
//! 1. Mirrors `s3://<bucket>/<prefix>` into a fresh working directory
//! 2. Creates the standard run layout below the run directory
//! 3. Runs every `run_scripts/*.sh` found below the run directory with
//!    `<interpreter> -ex`, in path order, stopping at the first failure
//! 4. Uploads every file that is new or changed back under the same prefix
//!
//! Without a bucket the run directory is used in place and nothing is synced.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use simrun_core::{InputSource, JobError, JobState, ObjectUri};
use simrun_store::ObjectStoreClient;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::RunnerError;
use crate::runner::{JobOutcome, abort, advance, log_outcome, log_transition};
use crate::service::{CommandExecutor, OutputPublisher};
use crate::workspace::{TreeSnapshot, WorkingDirectory};

/// Directories every run directory is given before its scripts run
pub const RUN_LAYOUT: [&str; 6] = [
    "input",
    "logs",
    "output/post_processing",
    "output/spatial",
    "output/state",
    "run_scripts",
];

const SCRIPT_DIR: &str = "run_scripts";

/// A run-directory request as given on the command line
#[derive(Debug, Clone)]
pub struct RunDirRequest {
    /// Bucket to mirror; `None` runs the directory in place
    pub bucket: Option<String>,
    /// Prefix within the bucket, empty for the bucket root
    pub prefix: String,
    /// Run directory, relative to the mirrored tree when a bucket is given
    pub run_dir: PathBuf,
    /// Program the run scripts are passed to
    pub interpreter: String,
}

/// Validated form of a [`RunDirRequest`]
#[derive(Debug)]
struct RunDirPlan {
    source: Option<ObjectUri>,
    run_dir: PathBuf,
    interpreter: String,
}

impl RunDirPlan {
    fn parse(request: &RunDirRequest) -> Result<Self, JobError> {
        let source = match &request.bucket {
            Some(bucket) => Some(ObjectUri::parse_prefix(&format!(
                "{}{}/{}",
                ObjectUri::SCHEME,
                bucket,
                request.prefix
            ))?),
            None => None,
        };

        // A synced run directory must stay inside the mirrored tree
        let escapes = request.run_dir.is_absolute()
            || request
                .run_dir
                .components()
                .any(|c| matches!(c, Component::ParentDir));
        if source.is_some() && escapes {
            return Err(JobError::InvalidFileName {
                name: request.run_dir.display().to_string(),
                reason: "run directory must be relative to the synced prefix".to_string(),
            });
        }

        if request.interpreter.trim().is_empty() {
            return Err(JobError::EmptyCommand);
        }

        Ok(Self {
            source,
            run_dir: request.run_dir.clone(),
            interpreter: request.interpreter.clone(),
        })
    }
}

/// Runs experiment trees end to end
pub struct RunDirRunner {
    config: Config,
    store: Arc<dyn ObjectStoreClient>,
    executor: CommandExecutor,
    publisher: OutputPublisher,
}

impl RunDirRunner {
    pub fn new(config: Config, store: Arc<dyn ObjectStoreClient>) -> Self {
        let executor = CommandExecutor::new(config.shell.clone(), config.capture_logs);
        let publisher = OutputPublisher::new(Arc::clone(&store), config.upload_concurrency);

        Self {
            config,
            store,
            executor,
            publisher,
        }
    }

    #[cfg(test)]
    pub fn with_executor(mut self, executor: CommandExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub async fn run(&self, request: &RunDirRequest) -> JobOutcome {
        let job_id = Uuid::new_v4();
        let outcome = self
            .run_job(job_id, request)
            .instrument(info_span!("run_dir", id = %job_id))
            .await;

        log_outcome(job_id, &outcome);
        outcome
    }

    async fn run_job(&self, job_id: Uuid, request: &RunDirRequest) -> JobOutcome {
        let state = JobState::Start;

        let plan = match RunDirPlan::parse(request) {
            Ok(plan) => plan,
            Err(e) => return abort(state, e.into()),
        };
        let state = advance(state);

        if plan.source.is_none() {
            let base = match std::env::current_dir() {
                Ok(base) => base,
                Err(e) => return abort(state, RunnerError::Workspace(e)),
            };
            return self.run_in(&plan, &base, state).await;
        }

        let workdir = match WorkingDirectory::create(
            &self.config.work_root,
            job_id,
            self.config.keep_workdir,
        ) {
            Ok(workdir) => workdir,
            Err(e) => return abort(state, RunnerError::Workspace(e)),
        };

        let outcome = self.run_in(&plan, workdir.path(), state).await;

        if let Err(e) = workdir.close() {
            warn!("Failed to remove working directory: {}", e);
        }

        outcome
    }

    async fn run_in(&self, plan: &RunDirPlan, base: &Path, state: JobState) -> JobOutcome {
        if let Some(source) = &plan.source {
            match self.sync_down(source, base).await {
                Ok(count) => info!("Synced {} object(s) from {}", count, source),
                Err(e) => return abort(state, e),
            }
        }
        let state = advance(state);

        // Anything unchanged after the scripts ran is not uploaded again
        let before = match TreeSnapshot::capture(base) {
            Ok(snapshot) => snapshot,
            Err(e) => return abort(state, RunnerError::Workspace(e)),
        };

        let run_dir = base.join(&plan.run_dir);
        let scripts = match prepare(&run_dir) {
            Ok(scripts) => scripts,
            Err(e) => return abort(state, RunnerError::Workspace(e)),
        };
        if scripts.is_empty() {
            warn!("No run scripts found below {}", run_dir.display());
        }

        let log_dir = run_dir.join("logs");
        for (idx, script) in scripts.iter().enumerate() {
            info!("Run script {}/{}: {}", idx + 1, scripts.len(), script.display());

            let result = match self
                .executor
                .execute_script(&plan.interpreter, script, &run_dir, &log_dir)
                .await
            {
                Ok(result) => result,
                Err(e) => return abort(state, e),
            };

            if !result.success() {
                info!("Skipping sync after failure of {}", script.display());
                log_transition(state, JobState::Aborted);
                return JobOutcome::CommandFailed {
                    exit_code: result.exit_code,
                };
            }
        }
        let state = advance(state);

        let uploaded = match &plan.source {
            Some(source) => {
                let changed = match TreeSnapshot::capture(base) {
                    Ok(after) => after.changed_since(&before),
                    Err(e) => return abort(state, RunnerError::Workspace(e)),
                };
                match self.publisher.publish(base, Some(source), changed).await {
                    Ok(uploaded) => uploaded,
                    Err(e) => return abort(state, e),
                }
            }
            None => Vec::new(),
        };
        let state = advance(state);
        advance(state);

        JobOutcome::Done { uploaded }
    }

    /// Downloads every object below `source` to the same relative path under `base`
    async fn sync_down(&self, source: &ObjectUri, base: &Path) -> Result<usize, RunnerError> {
        let objects = self
            .store
            .list(source)
            .await
            .map_err(|e| RunnerError::InputFetch {
                reference: source.to_string(),
                source: e,
            })?;

        let mut downloaded = 0;
        for object in objects {
            let Some(relative) = relative_key(source, &object) else {
                warn!("Skipping {} outside of {}", object, source);
                continue;
            };

            let destination = base.join(relative);
            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(RunnerError::Workspace)?;
            }

            debug!("Syncing {} to {}", object, destination.display());
            let reference = object.to_string();
            self.store
                .download(&InputSource::Object(object), &destination)
                .await
                .map_err(|e| RunnerError::InputFetch {
                    reference,
                    source: e,
                })?;
            downloaded += 1;
        }

        Ok(downloaded)
    }
}

/// Key of `object` relative to `prefix`
fn relative_key<'a>(prefix: &ObjectUri, object: &'a ObjectUri) -> Option<&'a str> {
    if prefix.key().is_empty() {
        return Some(object.key());
    }
    object
        .key()
        .strip_prefix(prefix.key())?
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
}

/// Creates the run layout and returns the run scripts below `run_dir`, sorted by path
fn prepare(run_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    for dir in RUN_LAYOUT {
        std::fs::create_dir_all(run_dir.join(dir))?;
    }

    let tree = TreeSnapshot::capture(run_dir)?;
    let scripts = tree
        .paths()
        .map(Path::new)
        .filter(|path| {
            path.extension() == Some(OsStr::new("sh"))
                && path.parent().and_then(Path::file_name) == Some(OsStr::new(SCRIPT_DIR))
        })
        .map(|path| run_dir.join(path))
        .collect();

    Ok(scripts)
}
