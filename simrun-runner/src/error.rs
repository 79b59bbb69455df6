//! Runner error types
//!
//! Each fatal condition of a job maps to its own process exit code. A command
//! that exits non-zero is not an error and has no variant here.

use std::io;

use simrun_core::{JobError, exit};
use simrun_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The job description was rejected
    #[error("Malformed job: {0}")]
    MalformedJob(#[from] JobError),

    /// An input could not be staged; the command is never run
    #[error("Failed to stage input {reference}: {source}")]
    InputFetch {
        reference: String,
        #[source]
        source: StoreError,
    },

    /// The shell could not be spawned or waited on
    #[error("Failed to run command with {shell}: {source}")]
    ExecutionStart {
        shell: String,
        #[source]
        source: io::Error,
    },

    /// Some outputs were not uploaded; the others were
    #[error("Failed to publish {} output file(s): {}", failed.len(), failed.join(", "))]
    OutputPublish { failed: Vec<String> },

    /// The working directory could not be created or read
    #[error("Working directory error: {0}")]
    Workspace(#[source] io::Error),
}

impl RunnerError {
    /// Process exit code reported for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MalformedJob(_) => exit::MALFORMED_JOB,
            Self::InputFetch { .. } => exit::INPUT_FETCH,
            Self::ExecutionStart { .. } => exit::EXECUTION_START,
            Self::OutputPublish { .. } => exit::OUTPUT_PUBLISH,
            Self::Workspace(_) => exit::RUNNER_SETUP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            RunnerError::MalformedJob(JobError::EmptyCommand),
            RunnerError::InputFetch {
                reference: "s3://bucket/a.nc".to_string(),
                source: StoreError::NotFound("s3://bucket/a.nc".to_string()),
            },
            RunnerError::ExecutionStart {
                shell: "/bin/sh".to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
            RunnerError::OutputPublish {
                failed: vec!["out.nc".to_string()],
            },
            RunnerError::Workspace(io::Error::from(io::ErrorKind::PermissionDenied)),
        ];

        let mut codes: Vec<i32> = errors.iter().map(RunnerError::exit_code).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_publish_error_names_files() {
        let err = RunnerError::OutputPublish {
            failed: vec!["a.nc".to_string(), "b.nc".to_string()],
        };
        assert_eq!(err.to_string(), "Failed to publish 2 output file(s): a.nc, b.nc");
    }
}
