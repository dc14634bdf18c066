//! HTTP file fetcher

use crate::capabilities::FileFetcher;
use crate::error::{ProvisionError, Result};
use std::time::Duration;
use tracing::debug;

/// Blocking HTTP(S) fetcher. Connection errors, timeouts and non-2xx
/// responses all surface as `ProvisionError::Network`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("provisioner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl FileFetcher for HttpFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| ProvisionError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::network(url, format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .map_err(|e| ProvisionError::network(url, format!("Failed to read body: {}", e)))?;
        Ok(body.to_vec())
    }
}
