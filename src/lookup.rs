//! Country code lookup
//!
//! Resolves the two-letter country code of a proxy server. Lookups go to an
//! HTTP JSON endpoint, are spaced by a minimum delay and successful answers
//! are cached for the lifetime of the lookup instance.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

// ============================================================================
// Country Lookup Trait
// ============================================================================

/// Resolves an IP address or host name to a country code
#[async_trait]
pub trait CountryLookup: Send + Sync {
    /// Returns the two-letter country code, `None` when it cannot be resolved
    async fn country_code(&self, ip: &str) -> Option<String>;
}

// ============================================================================
// ip-api.com Lookup
// ============================================================================

/// Response body of the lookup endpoint
#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
}

#[derive(Default)]
struct LookupState {
    last_request: Option<Instant>,
    cache: HashMap<String, String>,
}

/// Rate-limited lookup against an ip-api.com compatible endpoint
///
/// The state mutex is held across the delay and the request, so concurrent
/// callers are served one at a time.
pub struct HttpCountryLookup {
    client: reqwest::Client,
    /// URL with `{}` standing in for the address
    url_template: String,
    min_delay: Duration,
    state: Mutex<LookupState>,
}

impl HttpCountryLookup {
    pub fn new(url_template: &str, timeout: Duration, min_delay: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url_template: url_template.to_string(),
            min_delay,
            state: Mutex::new(LookupState::default()),
        })
    }

    /// Number of cached answers
    pub async fn cached(&self) -> usize {
        self.state.lock().await.cache.len()
    }

    async fn request(&self, ip: &str) -> Result<Option<String>> {
        let url = self.url_template.replacen("{}", ip, 1);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to query country for {}", ip))?;

        if !response.status().is_success() {
            bail!("Lookup request failed with status {}", response.status());
        }

        let body: LookupResponse = response
            .json()
            .await
            .with_context(|| format!("Invalid lookup response for {}", ip))?;

        Ok(match body.status.as_str() {
            "success" => body.country_code.filter(|code| !code.is_empty()),
            _ => None,
        })
    }
}

#[async_trait]
impl CountryLookup for HttpCountryLookup {
    async fn country_code(&self, ip: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        if let Some(code) = state.cache.get(ip) {
            trace!("Country cache hit for {}: {}", ip, code);
            return Some(code.clone());
        }

        if let Some(last) = state.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }

        let result = self.request(ip).await;
        state.last_request = Some(Instant::now());

        match result {
            Ok(Some(code)) => {
                debug!("Resolved {} to country {}", ip, code);
                state.cache.insert(ip.to_string(), code.clone());
                Some(code)
            }
            Ok(None) => {
                debug!("No country for {}", ip);
                None
            }
            Err(e) => {
                warn!("Country lookup for {} failed: {:#}", ip, e);
                None
            }
        }
    }
}
