//! Runner configuration
//!
//! Defines the configurable parameters of a job run: where working directories
//! live, whether they survive the job, which shell interprets the command, and
//! how outputs are published.

use std::path::PathBuf;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory under which per-job working directories are created
    pub work_root: PathBuf,

    /// Leave the working directory in place after the job for inspection
    pub keep_workdir: bool,

    /// Shell used as `<shell> -c <command>`
    pub shell: String,

    /// Tee the command's stdout/stderr into stdout.log / stderr.log
    pub capture_logs: bool,

    /// Maximum number of concurrent output uploads
    pub upload_concurrency: usize,
}

impl Config {
    pub const DEFAULT_SHELL: &'static str = "/bin/sh";
    pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            work_root: std::env::temp_dir(),
            keep_workdir: false,
            shell: Self::DEFAULT_SHELL.to_string(),
            capture_logs: true,
            upload_concurrency: Self::DEFAULT_UPLOAD_CONCURRENCY,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - SIMRUN_WORK_ROOT (default: system temp dir)
    /// - SIMRUN_KEEP_WORKDIR (bool, default: false)
    /// - SIMRUN_SHELL (default: /bin/sh)
    /// - SIMRUN_CAPTURE_LOGS (bool, default: true)
    /// - SIMRUN_UPLOAD_CONCURRENCY (default: 4)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::new();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let work_root = var("SIMRUN_WORK_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_root);

        let keep_workdir = var("SIMRUN_KEEP_WORKDIR")
            .map(|v| parse_bool("SIMRUN_KEEP_WORKDIR", &v))
            .transpose()?
            .unwrap_or(defaults.keep_workdir);

        let shell = var("SIMRUN_SHELL").unwrap_or(defaults.shell);

        let capture_logs = var("SIMRUN_CAPTURE_LOGS")
            .map(|v| parse_bool("SIMRUN_CAPTURE_LOGS", &v))
            .transpose()?
            .unwrap_or(defaults.capture_logs);

        let upload_concurrency = var("SIMRUN_UPLOAD_CONCURRENCY")
            .map(|s| {
                s.trim().parse::<usize>().map_err(|_| {
                    anyhow::anyhow!("SIMRUN_UPLOAD_CONCURRENCY must be a number, got '{}'", s)
                })
            })
            .transpose()?
            .unwrap_or(defaults.upload_concurrency);

        Ok(Self {
            work_root,
            keep_workdir,
            shell,
            capture_logs,
            upload_concurrency,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shell.trim().is_empty() {
            anyhow::bail!("shell cannot be empty");
        }

        if self.upload_concurrency == 0 {
            anyhow::bail!("upload_concurrency must be greater than 0");
        }

        if !self.work_root.is_dir() {
            anyhow::bail!(
                "work_root {} is not an existing directory",
                self.work_root.display()
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got '{}'", key, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.shell, "/bin/sh");
        assert_eq!(config.upload_concurrency, 4);
        assert!(config.capture_logs);
        assert!(!config.keep_workdir);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let root = tempfile::tempdir().unwrap();
        let root_str = root.path().to_string_lossy().to_string();

        let config = Config::from_lookup(lookup(&[
            ("SIMRUN_WORK_ROOT", root_str.as_str()),
            ("SIMRUN_KEEP_WORKDIR", "yes"),
            ("SIMRUN_SHELL", "/bin/bash"),
            ("SIMRUN_CAPTURE_LOGS", "false"),
            ("SIMRUN_UPLOAD_CONCURRENCY", "8"),
        ]))
        .unwrap();

        assert_eq!(config.work_root, root.path());
        assert!(config.keep_workdir);
        assert_eq!(config.shell, "/bin/bash");
        assert!(!config.capture_logs);
        assert_eq!(config.upload_concurrency, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("SIMRUN_KEEP_WORKDIR", "maybe")])).is_err());
        assert!(Config::from_lookup(lookup(&[("SIMRUN_UPLOAD_CONCURRENCY", "many")])).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.upload_concurrency = 0;
        assert!(config.validate().is_err());
        config.upload_concurrency = 1;

        config.shell = " ".to_string();
        assert!(config.validate().is_err());
        config.shell = "/bin/sh".to_string();

        config.work_root = PathBuf::from("/definitely/not/here");
        assert!(config.validate().is_err());
    }
}
