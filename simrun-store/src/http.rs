//! Plain HTTP(S) downloads

use std::path::Path;

use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Streams the body of `url` into `destination`
///
/// Redirects are followed by the client; any final status outside 2xx is an error.
pub(crate) async fn fetch(client: &Client, url: &str, destination: &Path) -> Result<u64> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|source| StoreError::Http {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(StoreError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| StoreError::io(destination, e))?;

    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(|source| StoreError::Http {
        url: url.to_string(),
        source,
    })? {
        file.write_all(&chunk)
            .await
            .map_err(|e| StoreError::io(destination, e))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| StoreError::io(destination, e))?;

    debug!("Fetched {} bytes from {}", written, url);
    Ok(written)
}
