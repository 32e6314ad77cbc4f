//! Web-search adapter: the entity's official website from ranked search hits.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use factfinder_shared::normalize::website_domain;
use factfinder_shared::{Entity, Fact, FactFinderError, FactValue, Result, SourceKind, Topic};

use super::SourceAdapter;
use crate::search::SearchBackend;

/// Hosts that describe companies rather than belong to them.
const AGGREGATOR_HOSTS: &[&str] = &[
    "wikipedia.org",
    "wikidata.org",
    "linkedin.com",
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "youtube.com",
    "bloomberg.com",
    "reuters.com",
    "crunchbase.com",
    "yahoo.com",
    "glassdoor.com",
    "zoominfo.com",
    "dnb.com",
];

pub struct WebSearchAdapter {
    search: Arc<dyn SearchBackend>,
    reference_year: i32,
}

impl WebSearchAdapter {
    pub fn new(search: Arc<dyn SearchBackend>, reference_year: i32) -> Self {
        Self { search, reference_year }
    }
}

fn is_aggregator(host: &str) -> bool {
    AGGREGATOR_HOSTS
        .iter()
        .any(|agg| host == *agg || host.ends_with(&format!(".{agg}")))
}

#[async_trait]
impl SourceAdapter for WebSearchAdapter {
    fn name(&self) -> &str {
        "web_search"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::WebSearch
    }

    #[instrument(skip_all, fields(entity = %entity.name))]
    async fn resolve(&self, entity: &Entity) -> Result<Vec<Fact>> {
        let query = format!("{} official website", entity.name);
        let hits = self.search.search(&query).await?;

        let hit = hits
            .into_iter()
            .find(|hit| {
                Url::parse(&hit.url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_lowercase))
                    .is_some_and(|host| !is_aggregator(&host))
            })
            .ok_or_else(|| FactFinderError::no_candidate(self.name(), &query))?;

        let Some(domain) = website_domain(&hit.url) else {
            return Err(FactFinderError::no_candidate(self.name(), &query));
        };

        debug!(%domain, backend = self.search.name(), "website found");
        Ok(vec![
            Fact::new(entity, Topic::Website, FactValue::Code(domain), self.kind())
                .with_year(Some(self.reference_year))
                .with_source_url(Some(hit.url)),
        ])
    }
}
