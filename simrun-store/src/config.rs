//! Object store configuration
//!
//! Credentials and endpoint settings are read once at start-up and handed to
//! the client constructor. Nothing here changes afterwards.

use std::time::Duration;

/// Settings for the S3 backend
///
/// Unset credentials fall through to the default provider chain of the
/// `object_store` crate (instance metadata, web identity).
#[derive(Clone, Default)]
pub struct StoreConfig {
    /// AWS region (e.g., "us-east-1")
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible services (e.g., MinIO)
    pub endpoint: Option<String>,

    /// Allow plain HTTP endpoints
    pub allow_http: bool,

    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,

    /// ECS task role credentials endpoint
    pub container_credentials_relative_uri: Option<String>,

    /// Timeout for establishing connections
    pub connect_timeout: Option<Duration>,
}

impl StoreConfig {
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    /// Creates configuration from the standard AWS environment variables
    ///
    /// - AWS_REGION, falling back to AWS_DEFAULT_REGION
    /// - AWS_ENDPOINT_URL
    /// - AWS_ALLOW_HTTP ("true" / "1")
    /// - AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN
    /// - AWS_CONTAINER_CREDENTIALS_RELATIVE_URI
    /// - SIMRUN_CONNECT_TIMEOUT (seconds)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            region: var("AWS_REGION").or_else(|| var("AWS_DEFAULT_REGION")),
            endpoint: var("AWS_ENDPOINT_URL"),
            allow_http: var("AWS_ALLOW_HTTP")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false),
            access_key_id: var("AWS_ACCESS_KEY_ID"),
            secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            session_token: var("AWS_SESSION_TOKEN"),
            container_credentials_relative_uri: var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI"),
            connect_timeout: var("SIMRUN_CONNECT_TIMEOUT")
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs),
        }
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(Self::DEFAULT_REGION)
    }
}

// Keeps secrets out of logs
impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("region", &self.region())
            .field("endpoint", &self.endpoint)
            .field("allow_http", &self.allow_http)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "***"))
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field(
                "container_credentials_relative_uri",
                &self.container_credentials_relative_uri,
            )
            .field("connect_timeout", &self.connect_timeout)
            .finish()
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
    fn test_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[]));
        assert_eq!(config.region(), "us-east-1");
        assert!(config.endpoint.is_none());
        assert!(!config.allow_http);
    }

    #[test]
    fn test_region_fallback() {
        let config = StoreConfig::from_lookup(lookup(&[("AWS_DEFAULT_REGION", "eu-west-1")]));
        assert_eq!(config.region(), "eu-west-1");

        let config = StoreConfig::from_lookup(lookup(&[
            ("AWS_REGION", "us-west-2"),
            ("AWS_DEFAULT_REGION", "eu-west-1"),
        ]));
        assert_eq!(config.region(), "us-west-2");
    }

    #[test]
    fn test_endpoint_settings() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("AWS_ENDPOINT_URL", "http://localhost:9000"),
            ("AWS_ALLOW_HTTP", "TRUE"),
            ("SIMRUN_CONNECT_TIMEOUT", "5"),
        ]));
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.allow_http);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "very-secret"),
        ]));
        let printed = format!("{:?}", config);
        assert!(!printed.contains("AKIAEXAMPLE"));
        assert!(!printed.contains("very-secret"));
    }
}
