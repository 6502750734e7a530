//! Remote content fetching
//!
//! Sources are plain HTTP(S) URLs. Fetching identifies itself with a
//! configurable user agent, since several subscription hosts only serve
//! share links to known client apps.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::debug;

/// Fetches the body of a source URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the trimmed body; an empty body is an error
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetcher backed by a shared `reqwest` client
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!("Fetching URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch URL: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP request failed with status {}: {}", status, url);
        }

        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from: {}", url))?;

        let text = text.trim();
        if text.is_empty() {
            bail!("Empty response body from: {}", url);
        }

        debug!("Fetched {} bytes from {}", text.len(), url);
        Ok(text.to_string())
    }
}
