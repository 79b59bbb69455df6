//! Input staging
//!
//! Makes every declared input available in the working directory before the
//! command runs:
//! - Remote inputs are downloaded to `<workdir>/<file name>`
//! - Local inputs, and references with a scheme the runner cannot fetch, are
//!   left where they are
//!
//! Inputs are staged one at a time in list order and the first failure stops
//! staging, so the failing input is always the last one logged.

use std::path::Path;
use std::sync::Arc;

use simrun_core::{InputSource, InputSpec};
use simrun_store::{ObjectStoreClient, StoreError};
use tracing::{info, warn};

use crate::error::RunnerError;

/// Stages job inputs through an object store client
pub struct InputStager {
    store: Arc<dyn ObjectStoreClient>,
}

impl InputStager {
    pub fn new(store: Arc<dyn ObjectStoreClient>) -> Self {
        Self { store }
    }

    /// Stages `inputs` into `workdir`
    ///
    /// # Returns
    /// Number of inputs downloaded
    pub async fn stage(
        &self,
        inputs: &[InputSpec],
        workdir: &Path,
    ) -> Result<usize, RunnerError> {
        let mut downloaded = 0;

        for (idx, input) in inputs.iter().enumerate() {
            let source = input.source();

            if let InputSource::Local(path) = source {
                if let Some(scheme) = source.unsupported_scheme() {
                    warn!(
                        "Input {} uses unsupported scheme '{}'; treating it as already present",
                        path.display(),
                        scheme
                    );
                    continue;
                }

                let resolved = workdir.join(path);
                if !resolved.exists() {
                    warn!(
                        "Input {} is not a remote reference and does not exist; leaving it to the command",
                        path.display()
                    );
                }
                continue;
            }

            let file_name = input.file_name().ok_or_else(|| RunnerError::InputFetch {
                reference: source.to_string(),
                source: StoreError::InvalidRequest("remote input without a file name".to_string()),
            })?;

            let destination = workdir.join(file_name);
            if destination.exists() {
                warn!("Input {} overwrites the already staged {}", source, file_name);
            }

            info!(
                "Staging input {}/{}: {} as {}",
                idx + 1,
                inputs.len(),
                source,
                file_name
            );

            self.store
                .download(source, &destination)
                .await
                .map_err(|e| RunnerError::InputFetch {
                    reference: source.to_string(),
                    source: e,
                })?;

            downloaded += 1;
        }

        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simrun_core::JobDescription;
    use simrun_store::StoreClient;
    use std::sync::Mutex;

    fn inputs(json_inputs: &str) -> Vec<InputSpec> {
        let job = JobDescription::parse(&format!(
            r#"{{"inputs": {}, "command": "true"}}"#,
            json_inputs
        ))
        .unwrap();
        job.inputs().to_vec()
    }

    async fn seed(store: &StoreClient, dir: &Path, name: &str, uri: &str, body: &[u8]) {
        let local = dir.join(name);
        std::fs::write(&local, body).unwrap();
        store
            .upload(&local, &simrun_core::ObjectUri::parse_object(uri).unwrap())
            .await
            .unwrap();
    }

    /// Records download attempts and fails for references containing "bad"
    #[derive(Default)]
    struct RecordingStore {
        attempts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ObjectStoreClient for RecordingStore {
        async fn download(&self, source: &InputSource, destination: &Path) -> simrun_store::Result<()> {
            self.attempts.lock().unwrap().push(source.to_string());
            if source.to_string().contains("bad") {
                return Err(StoreError::NotFound(source.to_string()));
            }
            std::fs::write(destination, b"data").map_err(|e| StoreError::io(destination, e))
        }

        async fn upload(&self, _source: &Path, _uri: &simrun_core::ObjectUri) -> simrun_store::Result<()> {
            unreachable!("staging never uploads")
        }

        async fn list(
            &self,
            _prefix: &simrun_core::ObjectUri,
        ) -> simrun_store::Result<Vec<simrun_core::ObjectUri>> {
            unreachable!("staging never lists")
        }
    }

    #[tokio::test]
    async fn test_stage_remote_inputs_by_basename_and_rename() {
        let scratch = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        let store = StoreClient::in_memory();
        seed(&store, scratch.path(), "a", "s3://bucket/prefix/out.nc", b"first").await;
        seed(&store, scratch.path(), "b", "s3://bucket/forcing/v2.nc", b"second").await;

        let stager = InputStager::new(Arc::new(store));
        let staged = stager
            .stage(
                &inputs(r#"["s3://bucket/prefix/out.nc", ["s3://bucket/forcing/v2.nc", "forcing.nc"]]"#),
                workdir.path(),
            )
            .await
            .unwrap();

        assert_eq!(staged, 2);
        assert_eq!(std::fs::read(workdir.path().join("out.nc")).unwrap(), b"first");
        assert_eq!(std::fs::read(workdir.path().join("forcing.nc")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_local_inputs_are_not_copied() {
        let workdir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let stager = InputStager::new(store.clone());

        let staged = stager
            .stage(&inputs(r#"["present.nc", "/abs/missing.nc"]"#), workdir.path())
            .await
            .unwrap();

        assert_eq!(staged, 0);
        assert!(store.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_left_to_the_command() {
        let workdir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let stager = InputStager::new(store.clone());

        let staged = stager
            .stage(&inputs(r#"["ftp://example.org/a.nc"]"#), workdir.path())
            .await
            .unwrap();

        assert_eq!(staged, 0);
        assert!(store.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_failure_stops_staging() {
        let workdir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::default());
        let stager = InputStager::new(store.clone());

        let err = stager
            .stage(
                &inputs(r#"["s3://bucket/a.nc", "s3://bucket/bad.nc", "s3://bucket/c.nc"]"#),
                workdir.path(),
            )
            .await
            .unwrap_err();

        match err {
            RunnerError::InputFetch { reference, .. } => {
                assert_eq!(reference, "s3://bucket/bad.nc");
            }
            other => panic!("unexpected error: {}", other),
        }

        assert_eq!(
            *store.attempts.lock().unwrap(),
            vec!["s3://bucket/a.nc".to_string(), "s3://bucket/bad.nc".to_string()]
        );
        assert!(!workdir.path().join("c.nc").exists());
    }
}
