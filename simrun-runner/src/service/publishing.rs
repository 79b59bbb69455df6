//! Output publishing
//!
//! Uploads the files a successful command produced to `<output>/<file name>`.
//! Which files is decided by the job's output policy:
//! - Explicit: exactly the listed names
//! - Discovered: regular files that appeared in the working directory while
//!   the command ran (staged inputs are therefore never re-uploaded)
//!
//! Uploads run concurrently and independently. One failed upload neither
//! cancels nor prevents the others; all failures are reported together.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use simrun_core::{ObjectUri, OutputPolicy};
use simrun_store::ObjectStoreClient;
use tracing::{error, info};

use crate::error::RunnerError;
use crate::workspace::FileSnapshot;

/// Publishes job outputs through an object store client
pub struct OutputPublisher {
    store: Arc<dyn ObjectStoreClient>,
    concurrency: usize,
}

impl OutputPublisher {
    /// Creates a publisher running at most `concurrency` uploads at once
    pub fn new(store: Arc<dyn ObjectStoreClient>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Resolves the output policy to the list of files to upload
    ///
    /// # Arguments
    /// * `policy` - The job's output policy
    /// * `workdir` - Working directory after the command exited
    /// * `before` - Snapshot taken after staging, before the command started
    pub fn select(
        &self,
        policy: &OutputPolicy,
        workdir: &Path,
        before: &FileSnapshot,
    ) -> Result<Vec<String>, RunnerError> {
        match policy {
            OutputPolicy::Explicit(names) => Ok(names.clone()),
            OutputPolicy::Discovered => {
                let after = FileSnapshot::capture(workdir).map_err(RunnerError::Workspace)?;
                Ok(after.created_since(before))
            }
        }
    }

    /// Uploads `files` from `workdir` to `destination`
    ///
    /// Does nothing when `destination` is `None`.
    ///
    /// # Returns
    /// Names of the uploaded files, sorted
    pub async fn publish(
        &self,
        workdir: &Path,
        destination: Option<&ObjectUri>,
        files: Vec<String>,
    ) -> Result<Vec<String>, RunnerError> {
        let Some(destination) = destination else {
            info!("No output destination, skipping publish");
            return Ok(Vec::new());
        };

        if files.is_empty() {
            info!("Command produced no output files");
            return Ok(Vec::new());
        }

        info!("Publishing {} file(s) to {}", files.len(), destination);

        let results: Vec<(String, bool)> = stream::iter(files)
            .map(|name| {
                let store = Arc::clone(&self.store);
                let source = workdir.join(&name);
                let target = destination.join(&name);
                async move {
                    match store.upload(&source, &target).await {
                        Ok(()) => (name, true),
                        Err(e) => {
                            error!("Failed to upload {} to {}: {}", name, target, e);
                            (name, false)
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let (mut uploaded, mut failed): (Vec<_>, Vec<_>) =
            results.into_iter().partition(|(_, ok)| *ok);

        if !failed.is_empty() {
            failed.sort();
            return Err(RunnerError::OutputPublish {
                failed: failed.into_iter().map(|(name, _)| name).collect(),
            });
        }

        uploaded.sort();
        Ok(uploaded.into_iter().map(|(name, _)| name).collect())
    }
}
