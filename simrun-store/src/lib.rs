//! Simrun Object Store Client
//!
//! Moves job data between the working directory and remote storage.
//!
//! The runner only depends on the [`ObjectStoreClient`] trait: download a
//! remote input to a local path, upload a local file to an object URI, list
//! the objects below a prefix.
//! [`StoreClient`] implements it on top of the `object_store` crate for
//! `s3://` URIs and `reqwest` for `http(s)://` inputs. Retries, if any, are
//! the business of those libraries; this crate never retries by itself.
//!
//! # Example
//!
//! ```no_run
//! use simrun_core::{InputSource, ObjectUri};
//! use simrun_store::{ObjectStoreClient, StoreClient, StoreConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = StoreClient::s3(StoreConfig::from_env());
//!     let input = InputSource::classify("s3://bucket/input.nc")?;
//!     client.download(&input, Path::new("/tmp/input.nc")).await?;
//!
//!     let output = ObjectUri::parse_prefix("s3://bucket/results")?.join("out.nc");
//!     client.upload(Path::new("/tmp/out.nc"), &output).await?;
//!     Ok(())
//! }
//! ```

mod buckets;
pub mod config;
pub mod error;
mod http;

pub use buckets::BucketRegistry;
pub use config::StoreConfig;
pub use error::{Result, StoreError};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, WriteMultipart};
use simrun_core::{InputSource, ObjectUri};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Remote storage as seen by the runner
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Fetches a remote input into `destination`
    ///
    /// A partially written `destination` is removed on failure.
    async fn download(&self, source: &InputSource, destination: &Path) -> Result<()>;

    /// Stores the file at `source` under `uri`, replacing any existing object
    async fn upload(&self, source: &Path, uri: &ObjectUri) -> Result<()>;

    /// Every object below `prefix`, at any depth, sorted by key
    ///
    /// Keys that cannot be addressed as an object URI are skipped.
    async fn list(&self, prefix: &ObjectUri) -> Result<Vec<ObjectUri>>;
}

/// Files at least this large are uploaded in parts
const MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Read size while feeding a multipart upload
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Parts in flight per multipart upload
const MULTIPART_CONCURRENCY: usize = 4;

/// Object store client backed by `object_store` and `reqwest`
#[derive(Clone)]
pub struct StoreClient {
    buckets: Arc<BucketRegistry>,
    http: reqwest::Client,
    multipart_threshold: u64,
}

impl StoreClient {
    /// Client for S3 and S3-compatible services
    pub fn s3(config: StoreConfig) -> Self {
        info!("Using S3 object store: {:?}", config);
        Self::with_registry(BucketRegistry::s3(config))
    }

    /// Client whose buckets live in process memory
    pub fn in_memory() -> Self {
        Self::with_registry(BucketRegistry::in_memory())
    }

    pub fn with_registry(registry: BucketRegistry) -> Self {
        Self {
            buckets: Arc::new(registry),
            http: reqwest::Client::new(),
            multipart_threshold: MULTIPART_THRESHOLD,
        }
    }

    /// Overrides the size from which uploads switch to multipart
    pub fn with_multipart_threshold(mut self, bytes: u64) -> Self {
        self.multipart_threshold = bytes;
        self
    }

    /// Store behind a bucket, e.g. to inspect uploaded objects
    pub fn bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        self.buckets.store_for(bucket)
    }

    async fn download_object(&self, uri: &ObjectUri, destination: &Path) -> Result<u64> {
        let store = self.buckets.store_for(uri.bucket())?;
        let location = object_path(uri)?;

        let result = store
            .get(&location)
            .await
            .map_err(|e| StoreError::object_store(uri.to_string(), e))?;

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| StoreError::io(destination, e))?;

        let mut stream = result.into_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StoreError::object_store(uri.to_string(), e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StoreError::io(destination, e))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| StoreError::io(destination, e))?;

        Ok(written)
    }

    async fn upload_multipart(
        &self,
        store: &dyn ObjectStore,
        source: &Path,
        uri: &ObjectUri,
        location: &ObjectPath,
    ) -> Result<()> {
        let upload = store
            .put_multipart(location)
            .await
            .map_err(|e| StoreError::object_store(uri.to_string(), e))?;
        let mut writer = WriteMultipart::new(upload);

        let mut file = match tokio::fs::File::open(source).await {
            Ok(file) => file,
            Err(e) => {
                let _ = writer.abort().await;
                return Err(StoreError::io(source, e));
            }
        };

        let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
        loop {
            let read = match file.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(StoreError::io(source, e));
                }
            };

            if let Err(e) = writer.wait_for_capacity(MULTIPART_CONCURRENCY).await {
                let _ = writer.abort().await;
                return Err(StoreError::object_store(uri.to_string(), e));
            }
            writer.write(&buffer[..read]);
        }

        writer
            .finish()
            .await
            .map_err(|e| StoreError::object_store(uri.to_string(), e))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStoreClient for StoreClient {
    async fn download(&self, source: &InputSource, destination: &Path) -> Result<()> {
        info!("Downloading {} to {}", source, destination.display());

        let outcome = match source {
            InputSource::Object(uri) => self.download_object(uri, destination).await,
            InputSource::Http(url) => http::fetch(&self.http, url, destination).await,
            InputSource::Local(path) => {
                return Err(StoreError::InvalidRequest(format!(
                    "{} is not a remote reference",
                    path.display()
                )));
            }
        };

        match outcome {
            Ok(bytes) => {
                debug!("Downloaded {} ({} bytes)", source, bytes);
                Ok(())
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(destination).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            "Failed to remove partial download {}: {}",
                            destination.display(),
                            rm
                        );
                    }
                }
                Err(e)
            }
        }
    }

    async fn upload(&self, source: &Path, uri: &ObjectUri) -> Result<()> {
        info!("Uploading {} to {}", source.display(), uri);

        let store = self.buckets.store_for(uri.bucket())?;
        let location = object_path(uri)?;

        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| StoreError::io(source, e))?;
        if !metadata.is_file() {
            return Err(StoreError::InvalidRequest(format!(
                "{} is not a regular file",
                source.display()
            )));
        }

        if metadata.len() >= self.multipart_threshold {
            debug!("Using multipart upload for {} bytes", metadata.len());
            return self
                .upload_multipart(store.as_ref(), source, uri, &location)
                .await;
        }

        let data = tokio::fs::read(source)
            .await
            .map_err(|e| StoreError::io(source, e))?;

        store
            .put(&location, Bytes::from(data).into())
            .await
            .map_err(|e| StoreError::object_store(uri.to_string(), e))?;

        Ok(())
    }

    async fn list(&self, prefix: &ObjectUri) -> Result<Vec<ObjectUri>> {
        let store = self.buckets.store_for(prefix.bucket())?;
        let location = if prefix.key().is_empty() {
            None
        } else {
            Some(object_path(prefix)?)
        };

        let metas: Vec<_> = store
            .list(location.as_ref())
            .try_collect()
            .await
            .map_err(|e| StoreError::object_store(prefix.to_string(), e))?;

        let mut objects: Vec<ObjectUri> = metas
            .into_iter()
            .filter_map(|meta| {
                let uri = format!("{}{}/{}", ObjectUri::SCHEME, prefix.bucket(), meta.location);
                ObjectUri::parse_object(&uri)
                    .inspect_err(|e| warn!("Skipping unusable object key: {}", e))
                    .ok()
            })
            .collect();
        objects.sort_by(|a, b| a.key().cmp(b.key()));

        debug!("Listed {} object(s) under {}", objects.len(), prefix);
        Ok(objects)
    }
}

fn object_path(uri: &ObjectUri) -> Result<ObjectPath> {
    ObjectPath::parse(uri.key())
        .map_err(|e| StoreError::InvalidRequest(format!("Invalid object key in {}: {}", uri, e)))
}
