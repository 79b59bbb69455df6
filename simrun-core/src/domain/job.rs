//! Job description domain types
//!
//! A job description is the single argument of a runner invocation:
//!
//! ```json
//! {"inputs": ["s3://bucket/input.nc", ["https://example.org/f.nc", "forcing.nc"]],
//!  "command": "mpiexec -n 8 pismr -i input.nc -o output.nc",
//!  "output": "s3://bucket/prefix/",
//!  "outputs": ["output.nc"]}
//! ```

use std::str::FromStr;

use serde::Deserialize;

use crate::domain::uri::{InputSource, ObjectUri};
use crate::error::JobError;

/// One validated entry of `inputs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    source: InputSource,
    file_name: Option<String>,
}

impl InputSpec {
    pub fn source(&self) -> &InputSource {
        &self.source
    }

    /// Name the input is staged under inside the working directory
    ///
    /// Always set for remote inputs; `None` for local ones, which are not copied.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    fn from_raw(raw: RawInput) -> Result<Self, JobError> {
        let (reference, rename) = match raw {
            RawInput::Reference(reference) => (reference, None),
            RawInput::Renamed(reference, name) => (reference, Some(name)),
        };

        let source = InputSource::classify(&reference)?;

        let file_name = match (&source, rename) {
            (InputSource::Local(_), None) => None,
            (InputSource::Local(_), Some(_)) => return Err(JobError::LocalRename(reference)),
            (_, Some(name)) => Some(validate_file_name(name)?),
            (remote, None) => {
                let name = remote
                    .basename()
                    .ok_or_else(|| JobError::MissingBasename(reference.clone()))?;
                Some(validate_file_name(name.to_string())?)
            }
        };

        Ok(Self { source, file_name })
    }
}

/// Which files are published after a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPolicy {
    /// Exactly these working-directory files, in order, without duplicates
    Explicit(Vec<String>),
    /// Every regular file created by the command
    Discovered,
}

/// Validated, immutable job description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescription {
    inputs: Vec<InputSpec>,
    command: String,
    output: Option<ObjectUri>,
    output_policy: OutputPolicy,
}

impl JobDescription {
    /// Parses and validates a JSON job description
    ///
    /// Checks shape and syntax only. Whether the referenced objects exist is
    /// discovered when they are fetched.
    pub fn parse(text: &str) -> Result<Self, JobError> {
        let raw: RawJob =
            serde_json::from_str(text).map_err(|e| JobError::Syntax(e.to_string()))?;

        if raw.command.trim().is_empty() {
            return Err(JobError::EmptyCommand);
        }

        let inputs = raw
            .inputs
            .into_iter()
            .map(InputSpec::from_raw)
            .collect::<Result<Vec<_>, _>>()?;

        let output = raw
            .output
            .as_deref()
            .map(ObjectUri::parse_prefix)
            .transpose()?;

        let output_policy = match raw.outputs {
            Some(names) => {
                let mut unique: Vec<String> = Vec::with_capacity(names.len());
                for name in names {
                    let name = validate_file_name(name)?;
                    if !unique.contains(&name) {
                        unique.push(name);
                    }
                }
                OutputPolicy::Explicit(unique)
            }
            None => OutputPolicy::Discovered,
        };

        Ok(Self {
            inputs,
            command: raw.command,
            output,
            output_policy,
        })
    }

    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    /// Shell command line, run as given on behalf of a trusted submitter
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Destination prefix, `None` when nothing is uploaded
    pub fn output(&self) -> Option<&ObjectUri> {
        self.output.as_ref()
    }

    pub fn output_policy(&self) -> &OutputPolicy {
        &self.output_policy
    }
}

impl FromStr for JobDescription {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A name for a file directly inside the working directory
fn validate_file_name(name: String) -> Result<String, JobError> {
    if name.is_empty() {
        return Err(JobError::invalid_name(&name, "empty"));
    }
    if name == "." || name == ".." {
        return Err(JobError::invalid_name(&name, "relative directory"));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(JobError::invalid_name(&name, "must not contain path separators"));
    }
    Ok(name)
}

#[derive(Deserialize)]
struct RawJob {
    inputs: Vec<RawInput>,
    command: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    outputs: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInput {
    Reference(String),
    Renamed(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_job() {
        let job = JobDescription::parse(r#"{"inputs": [], "command": "echo hi"}"#).unwrap();
        assert!(job.inputs().is_empty());
        assert_eq!(job.command(), "echo hi");
        assert!(job.output().is_none());
        assert_eq!(job.output_policy(), &OutputPolicy::Discovered);
    }

    #[test]
    fn test_parse_full_job() {
        let job = JobDescription::parse(
            r#"{
                "inputs": ["s3://bucket/prefix/out.nc", ["https://example.org/x?y=1", "forcing.nc"], "local.nc"],
                "command": "use-file out.nc",
                "output": "s3://bucket/prefix2/",
                "outputs": ["a.nc", "b.nc", "a.nc"]
            }"#,
        )
        .unwrap();

        let names: Vec<_> = job.inputs().iter().map(|i| i.file_name()).collect();
        assert_eq!(names, vec![Some("out.nc"), Some("forcing.nc"), None]);
        assert!(!job.inputs()[2].source().is_remote());
        assert_eq!(job.output().unwrap().to_string(), "s3://bucket/prefix2");
        assert_eq!(
            job.output_policy(),
            &OutputPolicy::Explicit(vec!["a.nc".to_string(), "b.nc".to_string()])
        );
    }

    #[test]
    fn test_null_output_means_no_upload() {
        let job =
            JobDescription::parse(r#"{"inputs": [], "command": "true", "output": null}"#).unwrap();
        assert!(job.output().is_none());
    }

    #[test]
    fn test_rejects_empty_command() {
        let err = JobDescription::parse(r#"{"inputs": [], "command": "   "}"#).unwrap_err();
        assert_eq!(err, JobError::EmptyCommand);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        for text in [
            "not json",
            r#"["echo"]"#,
            r#"{"inputs": []}"#,
            r#"{"command": "true"}"#,
            r#"{"inputs": "a.nc", "command": "true"}"#,
            r#"{"inputs": [1], "command": "true"}"#,
            r#"{"inputs": [], "command": "true", "output": 3}"#,
        ] {
            assert!(
                matches!(JobDescription::parse(text), Err(JobError::Syntax(_))),
                "expected syntax error for {}",
                text
            );
        }
    }

    #[test]
    fn test_rejects_malformed_references() {
        assert!(matches!(
            JobDescription::parse(r#"{"inputs": ["s3://bucket/"], "command": "true"}"#),
            Err(JobError::InvalidObjectUri { .. })
        ));
        assert!(matches!(
            JobDescription::parse(r#"{"inputs": [], "command": "true", "output": "/tmp/out"}"#),
            Err(JobError::InvalidObjectUri { .. })
        ));
        assert!(matches!(
            JobDescription::parse(r#"{"inputs": ["https://example.org/"], "command": "true"}"#),
            Err(JobError::MissingBasename(_))
        ));
    }

    #[test]
    fn test_rejects_empty_key_segments_before_running() {
        assert!(matches!(
            JobDescription::parse(
                r#"{"inputs": [], "command": "echo done > out.nc", "output": "s3://bucket/a//b"}"#
            ),
            Err(JobError::InvalidObjectUri { .. })
        ));
        assert!(matches!(
            JobDescription::parse(r#"{"inputs": ["s3://bucket/a//b.nc"], "command": "true"}"#),
            Err(JobError::InvalidObjectUri { .. })
        ));
    }

    #[test]
    fn test_unknown_scheme_input_is_accepted_as_local() {
        let job =
            JobDescription::parse(r#"{"inputs": ["ftp://example.org/a.nc"], "command": "exit 0"}"#)
                .unwrap();
        assert!(!job.inputs()[0].source().is_remote());
        assert_eq!(job.inputs()[0].file_name(), None);
    }

    #[test]
    fn test_rejects_unsafe_file_names() {
        assert!(matches!(
            JobDescription::parse(
                r#"{"inputs": [["s3://b/k.nc", "../k.nc"]], "command": "true"}"#
            ),
            Err(JobError::InvalidFileName { .. })
        ));
        assert!(matches!(
            JobDescription::parse(r#"{"inputs": [], "command": "true", "outputs": ["a/b"]}"#),
            Err(JobError::InvalidFileName { .. })
        ));
    }

    #[test]
    fn test_rejects_local_rename() {
        assert!(matches!(
            JobDescription::parse(r#"{"inputs": [["a.nc", "b.nc"]], "command": "true"}"#),
            Err(JobError::LocalRename(_))
        ));
    }

    #[test]
    fn test_from_str() {
        let job: JobDescription = r#"{"inputs": [], "command": "true"}"#.parse().unwrap();
        assert_eq!(job.command(), "true");
    }
}
