//! Per-job working directory
//!
//! Every job gets a fresh directory. Staged inputs and everything the command
//! writes live there. It is removed when the job ends unless configured to be
//! kept for inspection.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Working directory owned by a single job
pub struct WorkingDirectory {
    dir: TempDir,
    keep: bool,
}

impl WorkingDirectory {
    /// Creates `<root>/simrun-<job_id>-XXXXXX`
    pub fn create(root: &Path, job_id: Uuid, keep: bool) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("simrun-{}-", job_id))
            .tempdir_in(root)?;

        debug!("Created working directory {}", dir.path().display());
        Ok(Self { dir, keep })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Names of the regular files currently at the top level
    pub fn snapshot(&self) -> io::Result<FileSnapshot> {
        FileSnapshot::capture(self.path())
    }

    /// Removes the directory, or leaves it in place when configured to keep it
    ///
    /// Returns the path when the directory was kept.
    pub fn close(self) -> io::Result<Option<PathBuf>> {
        if self.keep {
            let path = self.dir.keep();
            info!("Keeping working directory {}", path.display());
            return Ok(Some(path));
        }

        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed working directory {}", path.display());
        Ok(None)
    }
}

/// Set of top-level regular file names in a directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSnapshot {
    files: BTreeSet<String>,
}

impl FileSnapshot {
    pub fn capture(dir: &Path) -> io::Result<Self> {
        let mut files = BTreeSet::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            match entry.file_name().into_string() {
                Ok(name) => {
                    files.insert(name);
                }
                Err(name) => {
                    warn!("Ignoring file with non UTF-8 name {:?}", name);
                }
            }
        }

        Ok(Self { files })
    }

    /// Files present now that were absent from `earlier`, sorted by name
    pub fn created_since(&self, earlier: &FileSnapshot) -> Vec<String> {
        self.files.difference(&earlier.files).cloned().collect()
    }
}

/// Regular files anywhere below a directory, keyed by `/`-separated relative path
///
/// Size and modification time are recorded so that rewritten files can be
/// told apart from untouched ones. Symlinks are not followed.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    files: BTreeMap<String, (u64, Option<SystemTime>)>,
}

impl TreeSnapshot {
    pub fn capture(root: &Path) -> io::Result<Self> {
        let mut files = BTreeMap::new();
        let mut pending = vec![(root.to_path_buf(), String::new())];

        while let Some((dir, relative)) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;

                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(name) => {
                        warn!("Ignoring entry with non UTF-8 name {:?}", name);
                        continue;
                    }
                };
                let path = if relative.is_empty() {
                    name
                } else {
                    format!("{}/{}", relative, name)
                };

                if file_type.is_dir() {
                    pending.push((entry.path(), path));
                } else if file_type.is_file() {
                    let metadata = entry.metadata()?;
                    files.insert(path, (metadata.len(), metadata.modified().ok()));
                }
            }
        }

        Ok(Self { files })
    }

    /// Relative paths of every file, sorted
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Files that are new, or whose size or modification time differ from `earlier`
    pub fn changed_since(&self, earlier: &TreeSnapshot) -> Vec<String> {
        self.files
            .iter()
            .filter(|(path, stat)| earlier.files.get(*path) != Some(*stat))
            .map(|(path, _)| path.clone())
            .collect()
    }
}
