//! Job description errors

use thiserror::Error;

/// Reasons a job description is rejected as malformed
///
/// Every variant is fatal for the job and maps to the malformed-job exit code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The text is not a JSON object of the expected shape
    #[error("Invalid job description: {0}")]
    Syntax(String),

    /// `command` is empty or whitespace only
    #[error("Job command must not be empty")]
    EmptyCommand,

    /// An `s3://` reference that cannot address an object or prefix
    #[error("Invalid object store URI '{uri}': {reason}")]
    InvalidObjectUri { uri: String, reason: String },

    /// A local file name that would escape the working directory
    #[error("Invalid file name '{name}': {reason}")]
    InvalidFileName { name: String, reason: String },

    /// A remote reference with no final path segment and no explicit name
    #[error("Cannot derive a file name from '{0}'")]
    MissingBasename(String),

    /// A `[reference, name]` pair whose reference is not remote
    #[error("Only remote inputs can be renamed, got '{0}'")]
    LocalRename(String),
}

impl JobError {
    pub(crate) fn invalid_uri(uri: &str, reason: impl Into<String>) -> Self {
        Self::InvalidObjectUri {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidFileName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
