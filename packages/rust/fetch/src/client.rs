//! Per-source HTTP client with a bounded-concurrency gate.

use std::time::Duration;

use rand::seq::IndexedRandom;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::debug;

use factfinder_shared::{FactFinderError, FetchConfig, Result};

/// Request timeout for a single HTTP exchange. The orchestrator's adapter
/// timeout bounds the whole lookup on top of this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// HTTP access to one external source.
///
/// Every request holds a permit from the source's semaphore, so no more than
/// `max_in_flight_per_source` requests hit the same source at once, however
/// many lookups run concurrently.
pub struct SourceClient {
    name: String,
    client: Client,
    gate: Semaphore,
    user_agents: Vec<String>,
}

impl SourceClient {
    pub fn new(name: impl Into<String>, config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FactFinderError::Network(format!("failed to build HTTP client: {e}")))?;

        let user_agents = if config.user_agents.is_empty() {
            vec![concat!("FactFinder/", env!("CARGO_PKG_VERSION")).to_string()]
        } else {
            config.user_agents.clone()
        };

        Ok(Self {
            name: name.into(),
            client,
            gate: Semaphore::new(config.max_in_flight_per_source.max(1)),
            user_agents,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identity used on first attempts.
    pub fn default_user_agent(&self) -> &str {
        &self.user_agents[0]
    }

    /// A random identity other than the default, when the pool has one.
    pub fn alternate_user_agent(&self) -> &str {
        self.user_agents
            .get(1..)
            .and_then(|rest| rest.choose(&mut rand::rng()))
            .unwrap_or(&self.user_agents[0])
    }

    /// GET `url` with `query` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        user_agent: &str,
    ) -> Result<T> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FactFinderError::Network(format!("{}: gate closed", self.name)))?;

        debug!(source = %self.name, %url, "GET");

        let response = self
            .client
            .get(url)
            .query(query)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| FactFinderError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FactFinderError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FactFinderError::parse(format!("{url}: invalid JSON body: {e}")))
    }

    /// GET `url` and return the raw body bytes.
    pub async fn get_bytes(&self, url: &str, user_agent: &str, timeout: Duration) -> Result<Vec<u8>> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FactFinderError::Network(format!("{}: gate closed", self.name)))?;

        debug!(source = %self.name, %url, "GET (bytes)");

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FactFinderError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FactFinderError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FactFinderError::Network(format!("{url}: body read failed: {e}")))?;
        Ok(body.to_vec())
    }

    /// HEAD `url` and return its content type when it answers with a success status.
    pub async fn head_content_type(&self, url: &str) -> Option<String> {
        let _permit = self.gate.acquire().await.ok()?;

        let response = self
            .client
            .head(url)
            .header(USER_AGENT, self.default_user_agent())
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|ct| ct.to_ascii_lowercase()),
            Ok(resp) => {
                debug!(%url, status = %resp.status(), "HEAD check failed");
                None
            }
            Err(e) => {
                debug!(%url, error = %e, "HEAD check failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_identity_differs_from_default() {
        let client = SourceClient::new("test", &FetchConfig::default()).unwrap();
        for _ in 0..20 {
            assert_ne!(client.alternate_user_agent(), client.default_user_agent());
        }
    }

    #[test]
    fn empty_pool_falls_back_to_tool_identity() {
        let config = FetchConfig {
            user_agents: vec![],
            ..Default::default()
        };
        let client = SourceClient::new("test", &config).unwrap();
        assert!(client.default_user_agent().starts_with("FactFinder/"));
        assert_eq!(client.alternate_user_agent(), client.default_user_agent());
    }

    #[tokio::test]
    async fn non_success_status_is_network_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/api"))
            .respond_with(wiremock::ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = SourceClient::new("test", &FetchConfig::default()).unwrap();
        let url = format!("{}/api", server.uri());
        let err = client
            .get_json::<serde_json::Value>(&url, &[], client.default_user_agent())
            .await
            .unwrap_err();
        assert!(matches!(err, FactFinderError::Network(_)));
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn gate_bounds_requests_in_flight() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/slow"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({}))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(6)
            .mount(&server)
            .await;

        let config = FetchConfig {
            max_in_flight_per_source: 2,
            ..Default::default()
        };
        let client = std::sync::Arc::new(SourceClient::new("test", &config).unwrap());
        let url = format!("{}/slow", server.uri());

        let start = std::time::Instant::now();
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let client = std::sync::Arc::clone(&client);
                let url = url.clone();
                tokio::spawn(async move {
                    client
                        .get_json::<serde_json::Value>(&url, &[], client.default_user_agent())
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Six 200ms requests, two at a time: at least three rounds.
        assert!(start.elapsed() >= Duration::from_millis(600), "elapsed {:?}", start.elapsed());
    }
}
