use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// Latency reported when the site does not answer in time.
pub const UNREACHABLE_LATENCY_MS: f64 = 10_000.0;

/// HTTP reachability and latency check against the content API.
#[derive(Debug, Clone)]
pub struct ApiProbe {
    client: reqwest::Client,
    base_url: String,
    latency_timeout: Duration,
    connectivity_timeout: Duration,
}

impl ApiProbe {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("civitai-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build probe HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            latency_timeout: Duration::from_secs(10),
            connectivity_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_timeouts(mut self, latency: Duration, connectivity: Duration) -> Self {
        self.latency_timeout = latency;
        self.connectivity_timeout = connectivity;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Round trip to the site root in milliseconds. Any error counts as the
    /// full unreachable latency.
    pub async fn measure_latency(&self) -> f64 {
        let started = Instant::now();
        let response = self
            .client
            .get(&self.base_url)
            .timeout(self.latency_timeout)
            .send()
            .await;
        match response {
            Ok(_) => started.elapsed().as_secs_f64() * 1_000.0,
            Err(e) => {
                tracing::debug!(error = %e, "latency probe failed");
                UNREACHABLE_LATENCY_MS
            }
        }
    }

    /// True iff a one-item model listing answers 200.
    pub async fn check_connectivity(&self) -> bool {
        let url = format!("{}/api/v1/models", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[("limit", "1")])
            .timeout(self.connectivity_timeout)
            .send()
            .await;
        match response {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::debug!(error = %e, "connectivity probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unroutable_host_reads_as_unreachable() {
        let probe = ApiProbe::new("http://127.0.0.1:9/")
            .unwrap()
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200));
        assert_eq!(probe.base_url(), "http://127.0.0.1:9");
        assert_eq!(probe.measure_latency().await, UNREACHABLE_LATENCY_MS);
        assert!(!probe.check_connectivity().await);
    }
}
