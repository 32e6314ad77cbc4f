//! Retry policies for external calls.
//!
//! [`RetryingFetcher`] is the source-lookup policy: one attempt with the
//! default identity, one more with an alternate User-Agent. [`Backoff`] is the
//! bounded exponential policy used around structured-extraction calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use factfinder_shared::{ExtractionConfig, FactFinderError, Result};

use crate::client::SourceClient;

// ---------------------------------------------------------------------------
// RetryingFetcher
// ---------------------------------------------------------------------------

/// Identity-rotating retry around a single source lookup.
pub struct RetryingFetcher<'a> {
    client: &'a SourceClient,
}

impl<'a> RetryingFetcher<'a> {
    pub fn new(client: &'a SourceClient) -> Self {
        Self { client }
    }

    /// Run `op` with the default User-Agent; on failure run it once more with
    /// an alternate one. `NoCandidateFound` is returned as-is since the source
    /// did answer. Two failures become `SourceUnavailable`.
    pub async fn resolve<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let first = match op(self.client.default_user_agent().to_string()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_no_candidate() => return Err(e),
            Err(e) => e,
        };

        let alternate = self.client.alternate_user_agent().to_string();
        debug!(source = self.client.name(), label, error = %first, "retrying with alternate identity");

        match op(alternate).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_no_candidate() => Err(e),
            Err(second) => {
                warn!(
                    source = self.client.name(),
                    label,
                    first = %first,
                    second = %second,
                    "lookup failed twice"
                );
                Err(FactFinderError::source_unavailable(
                    self.client.name(),
                    format!("{label}: {second}"),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

impl Backoff {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier.max(1.0),
        }
    }

    /// Delay before retry number `attempt` (0 = after the first failure), before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Run `op` until it succeeds or attempts run out. Missing configuration
    /// is never retried. The last error is returned.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e @ FactFinderError::ConfigurationMissing { .. }) => return Err(e),
                Err(e) if attempt + 1 >= self.max_attempts => {
                    warn!(label, attempts = attempt + 1, error = %e, "giving up");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    let jitter_ceiling = (delay.as_millis() as u64 / 4).max(1);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..jitter_ceiling));
                    warn!(
                        label,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = (delay + jitter).as_millis() as u64,
                        error = %e,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay + jitter).await;
                    attempt += 1;
                }
            }
        }
    }
}
