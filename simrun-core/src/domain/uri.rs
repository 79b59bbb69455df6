//! Input and output references
//!
//! A job refers to remote data with `s3://bucket/key` URIs (inputs and output
//! prefixes) and, for inputs only, plain `http://` / `https://` URLs. Anything
//! else is a file expected to exist locally.

use std::fmt;
use std::path::PathBuf;

use crate::error::JobError;

/// Location of an object, or of a "directory" prefix, in the object store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUri {
    bucket: String,
    key: String,
}

impl ObjectUri {
    pub const SCHEME: &'static str = "s3://";

    /// Parses a URI addressing a single object
    ///
    /// The key must be non-empty and must not end with `/`.
    pub fn parse_object(uri: &str) -> Result<Self, JobError> {
        let parsed = Self::parse(uri)?;

        if parsed.key.is_empty() {
            return Err(JobError::invalid_uri(uri, "missing object key"));
        }
        if parsed.key.ends_with('/') {
            return Err(JobError::invalid_uri(uri, "object key must not end with '/'"));
        }

        Ok(parsed)
    }

    /// Parses a URI addressing a prefix
    ///
    /// Trailing slashes are dropped, so `s3://b/p/` and `s3://b/p` are the same
    /// prefix. An empty key designates the bucket root.
    pub fn parse_prefix(uri: &str) -> Result<Self, JobError> {
        let mut parsed = Self::parse(uri)?;
        let trimmed = parsed.key.trim_end_matches('/').len();
        parsed.key.truncate(trimmed);
        Ok(parsed)
    }

    fn parse(uri: &str) -> Result<Self, JobError> {
        let rest = uri
            .strip_prefix(Self::SCHEME)
            .ok_or_else(|| JobError::invalid_uri(uri, "expected the s3:// scheme"))?;

        let (bucket, key) = match rest.split_once('/') {
            Some((b, k)) => (b, k),
            None => (rest, ""),
        };

        if bucket.is_empty() {
            return Err(JobError::invalid_uri(uri, "missing bucket name"));
        }
        if bucket.chars().any(|c| c.is_whitespace()) {
            return Err(JobError::invalid_uri(uri, "bucket name contains whitespace"));
        }
        if key.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(JobError::invalid_uri(uri, "key contains a relative segment"));
        }
        // Only trailing slashes may leave empty segments; parse_prefix trims them
        let body = key.trim_end_matches('/');
        if !body.is_empty() && body.split('/').any(str::is_empty) {
            return Err(JobError::invalid_uri(uri, "key contains an empty segment"));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Final path segment of the key, if any
    pub fn basename(&self) -> Option<&str> {
        self.key.rsplit('/').next().filter(|name| !name.is_empty())
    }

    /// Address of `name` directly under this prefix
    pub fn join(&self, name: &str) -> Self {
        let key = if self.key.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.key, name)
        };

        Self {
            bucket: self.bucket.clone(),
            key,
        }
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", Self::SCHEME, self.bucket, self.key)
    }
}

/// Where an input reference points to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Object in the object store
    Object(ObjectUri),
    /// Plain HTTP(S) download
    Http(String),
    /// File assumed to be present already (relative to the working directory, or absolute)
    Local(PathBuf),
}

impl InputSource {
    /// Classifies a raw input reference by its scheme
    ///
    /// `s3://` references must be well-formed object URIs. `http(s)://` URLs
    /// need a host; the rest of the URL is checked when it is fetched.
    /// Everything else, including other `scheme://` references, is a local
    /// path the command is expected to find on its own.
    pub fn classify(reference: &str) -> Result<Self, JobError> {
        let Some((scheme, rest)) = reference.split_once("://") else {
            return Ok(Self::Local(PathBuf::from(reference)));
        };

        if !is_scheme(scheme) {
            return Ok(Self::Local(PathBuf::from(reference)));
        }

        match scheme.to_ascii_lowercase().as_str() {
            "s3" => ObjectUri::parse_object(reference).map(Self::Object),
            "http" | "https" => {
                let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
                if host.is_empty() {
                    return Err(JobError::invalid_uri(reference, "missing host"));
                }
                Ok(Self::Http(reference.to_string()))
            }
            _ => Ok(Self::Local(PathBuf::from(reference))),
        }
    }

    /// Scheme of a local reference that looks like a URL the runner cannot fetch
    pub fn unsupported_scheme(&self) -> Option<&str> {
        let Self::Local(path) = self else {
            return None;
        };
        let (scheme, _) = path.to_str()?.split_once("://")?;
        is_scheme(scheme).then_some(scheme)
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Local(_))
    }

    /// Final path segment of a remote reference
    pub fn basename(&self) -> Option<&str> {
        match self {
            Self::Object(uri) => uri.basename(),
            Self::Http(url) => {
                let without_scheme = url.split_once("://").map_or(url.as_str(), |(_, r)| r);
                let path = without_scheme.split(['?', '#']).next().unwrap_or_default();
                // The first segment is the host, never a file name
                path.split_once('/')
                    .and_then(|(_, p)| p.rsplit('/').next())
                    .filter(|name| !name.is_empty())
            }
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(uri) => uri.fmt(f),
            Self::Http(url) => f.write_str(url),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// RFC 3986 scheme: a letter followed by letters, digits, `+`, `-` or `.`
fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
