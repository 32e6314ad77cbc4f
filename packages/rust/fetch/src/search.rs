//! Web-search backends.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use factfinder_shared::{FetchConfig, Result, SearchConfig};

use crate::client::SourceClient;
use crate::retry::RetryingFetcher;

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Text query in, ranked hits out.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

// ---------------------------------------------------------------------------
// SearxSearch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Debug, Deserialize)]
struct SearxResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

/// SearXNG-compatible JSON search endpoint.
pub struct SearxSearch {
    endpoint: String,
    max_results: usize,
    client: SourceClient,
}

impl SearxSearch {
    pub fn new(endpoint: impl Into<String>, max_results: usize, fetch: &FetchConfig) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.into(),
            max_results,
            client: SourceClient::new("searx", fetch)?,
        })
    }

    /// Build from config; `None` when no endpoint is configured.
    pub fn from_config(search: &SearchConfig, fetch: &FetchConfig) -> Result<Option<Self>> {
        search
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, search.max_results, fetch))
            .transpose()
    }
}

#[async_trait]
impl SearchBackend for SearxSearch {
    fn name(&self) -> &str {
        "searx"
    }

    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let response: SearxResponse = RetryingFetcher::new(&self.client)
            .resolve("search", |ua| async move {
                self.client
                    .get_json(&self.endpoint, &[("q", query), ("format", "json")], &ua)
                    .await
            })
            .await?;

        let hits: Vec<SearchHit> = response
            .results
            .into_iter()
            .take(self.max_results)
            .map(|r| SearchHit {
                url: r.url,
                title: r.title,
                snippet: r.content,
            })
            .collect();

        debug!(hits = hits.len(), "search complete");
        Ok(hits)
    }
}
