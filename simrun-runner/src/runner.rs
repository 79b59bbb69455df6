//! Job runner
//!
//! Drives one job through its phases, strictly in order:
//! parse → stage inputs → execute → publish outputs.
//!
//! Any phase failure aborts the job with that failure's exit code. A command
//! that exits non-zero also aborts the job (nothing is published), but the
//! runner then exits with the command's own code.

use std::sync::Arc;

use simrun_core::{JobDescription, JobState, exit};
use simrun_store::ObjectStoreClient;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::RunnerError;
use crate::service::{CommandExecutor, InputStager, OutputPublisher};
use crate::workspace::WorkingDirectory;

/// How a job ended
#[derive(Debug)]
pub enum JobOutcome {
    /// Every phase succeeded
    Done { uploaded: Vec<String> },
    /// The command ran and exited non-zero; nothing was published
    CommandFailed { exit_code: i32 },
    /// A phase failed
    Aborted(RunnerError),
}

impl JobOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Done { .. } => exit::SUCCESS,
            Self::CommandFailed { exit_code } => *exit_code,
            Self::Aborted(e) => e.exit_code(),
        }
    }
}

/// Runs single jobs end to end
pub struct JobRunner {
    config: Config,
    stager: InputStager,
    executor: CommandExecutor,
    publisher: OutputPublisher,
}

impl JobRunner {
    pub fn new(config: Config, store: Arc<dyn ObjectStoreClient>) -> Self {
        let stager = InputStager::new(Arc::clone(&store));
        let executor = CommandExecutor::new(config.shell.clone(), config.capture_logs);
        let publisher = OutputPublisher::new(store, config.upload_concurrency);

        Self {
            config,
            stager,
            executor,
            publisher,
        }
    }

    /// Replaces the command executor, e.g. to silence relayed output
    #[cfg(test)]
    pub fn with_executor(mut self, executor: CommandExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Runs the job described by `raw_job` (JSON text)
    pub async fn run(&self, raw_job: &str) -> JobOutcome {
        let job_id = Uuid::new_v4();
        let outcome = self
            .run_job(job_id, raw_job)
            .instrument(info_span!("job", id = %job_id))
            .await;

        log_outcome(job_id, &outcome);
        outcome
    }

    async fn run_job(&self, job_id: Uuid, raw_job: &str) -> JobOutcome {
        let state = JobState::Start;

        let job = match JobDescription::parse(raw_job) {
            Ok(job) => job,
            Err(e) => return abort(state, e.into()),
        };
        let state = advance(state);

        let workdir = match WorkingDirectory::create(
            &self.config.work_root,
            job_id,
            self.config.keep_workdir,
        ) {
            Ok(workdir) => workdir,
            Err(e) => return abort(state, RunnerError::Workspace(e)),
        };

        let outcome = self.run_in(&job, &workdir, state).await;

        if let Err(e) = workdir.close() {
            warn!("Failed to remove working directory: {}", e);
        }

        outcome
    }

    async fn run_in(
        &self,
        job: &JobDescription,
        workdir: &WorkingDirectory,
        state: JobState,
    ) -> JobOutcome {
        let path = workdir.path();

        match self.stager.stage(job.inputs(), path).await {
            Ok(count) => info!("Staged {} remote input(s)", count),
            Err(e) => return abort(state, e),
        }
        let state = advance(state);

        // Everything present now is an input, not an output
        let before = match workdir.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => return abort(state, RunnerError::Workspace(e)),
        };

        let result = match self.executor.execute(job.command(), path).await {
            Ok(result) => result,
            Err(e) => return abort(state, e),
        };
        let state = advance(state);

        if !result.success() {
            info!("Skipping publish after command failure");
            log_transition(state, JobState::Aborted);
            return JobOutcome::CommandFailed {
                exit_code: result.exit_code,
            };
        }

        let published = match self.publisher.select(job.output_policy(), path, &before) {
            Ok(files) => self.publisher.publish(path, job.output(), files).await,
            Err(e) => Err(e),
        };

        let uploaded = match published {
            Ok(uploaded) => uploaded,
            Err(e) => return abort(state, e),
        };
        let state = advance(state);
        advance(state);

        JobOutcome::Done { uploaded }
    }
}

pub(crate) fn log_outcome(job_id: Uuid, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Done { uploaded } => {
            info!("Job {} done, {} file(s) published", job_id, uploaded.len());
        }
        JobOutcome::CommandFailed { exit_code } => {
            error!("Job {} failed: command exited with code {}", job_id, exit_code);
        }
        JobOutcome::Aborted(e) => {
            error!("Job {} aborted: {}", job_id, e);
        }
    }
}

pub(crate) fn advance(state: JobState) -> JobState {
    match state.successor() {
        Some(next) => {
            log_transition(state, next);
            next
        }
        None => state,
    }
}

pub(crate) fn abort(state: JobState, error: RunnerError) -> JobOutcome {
    log_transition(state, JobState::Aborted);
    JobOutcome::Aborted(error)
}

pub(crate) fn log_transition(from: JobState, to: JobState) {
    info!("Job state: {} -> {}", from, to);
}
