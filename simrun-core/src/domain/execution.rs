//! Execution domain types

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Outcome of running the job command
///
/// A non-zero `exit_code` is a regular result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    /// Captured copy of the child's stdout, when it wrote anything
    pub stdout_log: Option<PathBuf>,
    /// Captured copy of the child's stderr, when it wrote anything
    pub stderr_log: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Lifecycle of one job
///
/// Strictly linear: `Start → Parsed → Staged → Executed → Published → Done`,
/// with `Aborted` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Start,
    Parsed,
    Staged,
    Executed,
    Published,
    Done,
    Aborted,
}

impl JobState {
    /// Next state on the success path, `None` for terminal states
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::Parsed),
            Self::Parsed => Some(Self::Staged),
            Self::Staged => Some(Self::Executed),
            Self::Executed => Some(Self::Published),
            Self::Published => Some(Self::Done),
            Self::Done | Self::Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.successor().is_none()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Parsed => "parsed",
            Self::Staged => "staged",
            Self::Executed => "executed",
            Self::Published => "published",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
