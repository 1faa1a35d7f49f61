//! Issues requests against the cache endpoint under test.

use std::future::Future;
use std::time::{Duration, Instant, SystemTime};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TransportError};
use crate::metrics::{NO_STATUS, RequestOutcome};

/// Sends a GET request and resolves with its status once the full response body has arrived.
pub trait Transport: Send + Sync {
    /// Performs the request against an absolute URL.
    fn get(&self, url: &str) -> impl Future<Output = Result<u16, TransportError>> + Send;
}

/// A [`Transport`] backed by a pooled [`reqwest::Client`].
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport that gives up on requests taking longer than `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cacheload/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// The underlying HTTP client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<u16, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        response.bytes().await?;
        Ok(status)
    }
}

/// Turns keys into requests against `{base_url}/api/hot?id={key}` and measures them.
#[derive(Debug)]
pub struct RequestIssuer<T> {
    base_url: String,
    transport: T,
}

impl<T: Transport> RequestIssuer<T> {
    /// Creates an issuer for the target at `base_url`.
    pub fn new(base_url: &Url, transport: T) -> Self {
        Self {
            base_url: base_url.as_str().trim_end_matches('/').to_owned(),
            transport,
        }
    }

    /// The URL requested for `key`.
    pub fn url_for(&self, key: u64) -> String {
        format!("{}/api/hot?id={key}", self.base_url)
    }

    /// Sends one request for `key`.
    ///
    /// Never fails: transport errors are recorded as an unsuccessful outcome with the
    /// [`NO_STATUS`] sentinel and the time it took to detect the failure.
    pub async fn issue(&self, key: u64) -> RequestOutcome {
        let url = self.url_for(key);
        let timestamp = SystemTime::now();
        let start = Instant::now();

        let result = self.transport.get(&url).await;
        let latency = start.elapsed();

        match result {
            Ok(status) => RequestOutcome {
                timestamp,
                key,
                status,
                latency,
                succeeded: true,
                check_passed: status == 200,
            },
            Err(err) => {
                tracing::debug!(
                    key,
                    error = &err as &dyn std::error::Error,
                    "request failed"
                );
                RequestOutcome {
                    timestamp,
                    key,
                    status: NO_STATUS,
                    latency,
                    succeeded: false,
                    check_passed: false,
                }
            }
        }
    }
}

/// Cache statistics exposed by the target on `/api/cache/stats`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Lookups in the local cache.
    pub request_count: u64,
    /// Lookups served from the local cache.
    pub hit_count: u64,
    /// Lookups that had to load the value.
    pub miss_count: u64,
    /// `hit_count / request_count`.
    pub hit_rate: f64,
    /// `miss_count / request_count`.
    pub miss_rate: f64,
    /// Entries evicted from the local cache.
    #[serde(default)]
    pub eviction_count: u64,
    /// Loads triggered by misses.
    #[serde(default)]
    pub load_count: u64,
    /// Loads that produced a value.
    #[serde(default)]
    pub load_success_count: u64,
    /// Loads that failed.
    #[serde(default)]
    pub load_failure_count: u64,
    /// Average time spent loading a value, in nanoseconds.
    #[serde(default)]
    pub average_load_penalty: f64,
}

/// Reads the target's cache statistics.
pub async fn fetch_cache_stats(
    client: &reqwest::Client,
    base_url: &Url,
) -> anyhow::Result<CacheStats> {
    let url = format!("{}/api/cache/stats", base_url.as_str().trim_end_matches('/'));
    tracing::debug!("fetching cache statistics from {url}");

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("Bad Status: {}", response.status());
    }

    Ok(response.json().await?)
}
