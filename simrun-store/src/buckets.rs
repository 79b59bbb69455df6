//! Bucket-addressed object stores
//!
//! Builds one `ObjectStore` per bucket on first use and reuses it for the rest
//! of the job. Two backends exist:
//! - S3, configured from a `StoreConfig`
//! - In memory, for tests and dry runs; objects live as long as the registry

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::memory::InMemory;
use object_store::{ClientOptions, ObjectStore};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};

enum Backend {
    S3(StoreConfig),
    InMemory,
}

/// Registry of per-bucket stores
pub struct BucketRegistry {
    backend: Backend,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl BucketRegistry {
    pub fn s3(config: StoreConfig) -> Self {
        Self::with_backend(Backend::S3(config))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Backend::InMemory)
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the store serving `bucket`, building it if needed
    pub fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|e| StoreError::Config(format!("Bucket registry poisoned: {}", e)))?;

        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let store: Arc<dyn ObjectStore> = match &self.backend {
            Backend::S3(config) => build_s3(bucket, config)?,
            Backend::InMemory => Arc::new(InMemory::new()),
        };

        debug!("Created object store for bucket {}", bucket);
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }
}

fn build_s3(bucket: &str, config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region(config.region());

    // Path-style requests for S3-compatible endpoints like MinIO
    if let Some(endpoint) = &config.endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(false);
    }

    if config.allow_http {
        builder = builder.with_allow_http(true);
    }

    if let Some(ak) = &config.access_key_id {
        builder = builder.with_access_key_id(ak);
    }
    if let Some(sk) = &config.secret_access_key {
        builder = builder.with_secret_access_key(sk);
    }
    if let Some(token) = &config.session_token {
        builder = builder.with_token(token);
    }
    if let Some(uri) = &config.container_credentials_relative_uri {
        builder = builder.with_config(AmazonS3ConfigKey::ContainerCredentialsRelativeUri, uri);
    }

    if let Some(timeout) = config.connect_timeout {
        builder = builder.with_client_options(ClientOptions::new().with_connect_timeout(timeout));
    }

    let store = builder
        .build()
        .map_err(|e| StoreError::Config(format!("S3 bucket {}: {}", bucket, e)))?;

    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store_is_reused_per_bucket() {
        let registry = BucketRegistry::in_memory();
        let a = registry.store_for("a").unwrap();
        let a_again = registry.store_for("a").unwrap();
        let b = registry.store_for("b").unwrap();

        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_s3_store_builds_with_explicit_config() {
        let registry = BucketRegistry::s3(StoreConfig {
            region: Some("eu-central-1".to_string()),
            endpoint: Some("http://localhost:9000".to_string()),
            allow_http: true,
            access_key_id: Some("minio".to_string()),
            secret_access_key: Some("minio123".to_string()),
            ..Default::default()
        });

        assert!(registry.store_for("bucket").is_ok());
    }
}
