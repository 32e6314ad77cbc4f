//! Annual report discovery: web search, PDF content-type check, structured pick, cache.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use factfinder_fetch::{SearchBackend, SearchHit, SourceClient};
use factfinder_shared::normalize::website_domain;
use factfinder_shared::{AppConfig, Entity, ReportLocation, Result};
use factfinder_storage::{CacheEntry, KeyCache, Secondary};

use crate::extraction::{StructuredExtractor, extract_as};

const INSTRUCTIONS: &str = "You are given PDF search hits for a company. \
Pick the one official annual report (ignore quarterly reports, press releases, \
slide decks and previews; prefer the integrated annual report from the \
company's own website). The year is the calendar year in which the reported \
fiscal year ends. Prefer the most recent report. If no hit is confidently an \
official annual report, return null for both url and year.";

#[derive(Debug, Deserialize, JsonSchema)]
struct ReportChoice {
    /// URL of the chosen PDF, copied exactly from the hits.
    url: Option<String>,
    /// Fiscal year of the report.
    year: Option<i32>,
}

/// Finds the most recent annual report PDF of an entity.
pub struct ReportLocator {
    backends: Vec<Arc<dyn SearchBackend>>,
    extractor: Arc<dyn StructuredExtractor>,
    cache: Arc<KeyCache>,
    head_client: SourceClient,
    latest_valid_year: i32,
}

impl ReportLocator {
    pub fn new(
        backends: Vec<Arc<dyn SearchBackend>>,
        extractor: Arc<dyn StructuredExtractor>,
        cache: Arc<KeyCache>,
        head_client: SourceClient,
        latest_valid_year: i32,
    ) -> Self {
        Self {
            backends,
            extractor,
            cache,
            head_client,
            latest_valid_year,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        backends: Vec<Arc<dyn SearchBackend>>,
        extractor: Arc<dyn StructuredExtractor>,
        cache: Arc<KeyCache>,
    ) -> Result<Self> {
        let head_client = SourceClient::new("report-head", &config.fetch)?;
        Ok(Self::new(
            backends,
            extractor,
            cache,
            head_client,
            config.reconciliation.latest_valid_year,
        ))
    }

    /// The search query for `entity`, restricted to its site when known.
    pub fn query_for(&self, entity: &Entity, website: Option<&str>) -> String {
        let year = self.latest_valid_year;
        let mut query = format!("{} annual report ({year} OR {}) filetype:pdf", entity.name, year - 1);
        if let Some(domain) = website.and_then(website_domain) {
            query.push_str(&format!(" site:{domain}"));
        }
        query
    }

    /// Resolve the report for `entity`. `Ok(None)` when nothing convincing
    /// was found.
    #[instrument(skip_all, fields(entity = %entity.name))]
    pub async fn locate(&self, entity: &Entity, website: Option<&str>) -> Result<Option<ReportLocation>> {
        if let Some(hit) = self.cached(entity).await {
            debug!(url = %hit.url, year = hit.year, "report found in cache");
            return Ok(Some(hit));
        }

        let query = self.query_for(entity, website);
        let hits = self.search_all(&query).await;
        if hits.is_empty() {
            info!(%query, "no report candidates");
            return Ok(None);
        }

        let candidates = self.reachable_pdfs(hits).await;
        if candidates.is_empty() {
            info!("no candidate serves a PDF");
            return Ok(None);
        }

        let context = format!("Company: {}\n\n{}", entity.name, format_candidates(&candidates));
        let choice: ReportChoice = extract_as(self.extractor.as_ref(), "annual_report_pick", INSTRUCTIONS, &context).await?;

        let (Some(url), Some(year)) = (choice.url, choice.year) else {
            info!("no official annual report among candidates");
            return Ok(None);
        };
        if !candidates.iter().any(|hit| hit.url == url) {
            warn!(%url, "picked URL is not among the candidates");
            return Ok(None);
        }

        let location = ReportLocation { url, year };
        if year >= self.latest_valid_year {
            let entry = CacheEntry::new(location.url.clone()).with_secondary(Secondary::Int(i64::from(year)));
            if let Err(e) = self.cache.put(entity.name.clone(), entry).await {
                warn!(error = %e, "failed to persist report location");
            }
        }

        info!(url = %location.url, year, "annual report located");
        Ok(Some(location))
    }

    async fn cached(&self, entity: &Entity) -> Option<ReportLocation> {
        let entry = self.cache.get(&entity.name).await?;
        let year = i32::try_from(entry.secondary_int()?).ok()?;
        Some(ReportLocation { url: entry.value, year })
    }

    /// Union of every backend's hits, first occurrence of each URL kept.
    async fn search_all(&self, query: &str) -> Vec<SearchHit> {
        let results = join_all(self.backends.iter().map(|backend| backend.search(query))).await;

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for (backend, result) in self.backends.iter().zip(results) {
            match result {
                Ok(found) => {
                    for hit in found {
                        if seen.insert(hit.url.clone()) {
                            hits.push(hit);
                        }
                    }
                }
                Err(e) => warn!(backend = backend.name(), error = %e, "search backend failed"),
            }
        }
        hits
    }

    async fn reachable_pdfs(&self, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        let types = join_all(hits.iter().map(|hit| self.head_client.head_content_type(&hit.url))).await;
        hits.into_iter()
            .zip(types)
            .filter(|(_, content_type)| {
                content_type
                    .as_deref()
                    .is_some_and(|ct| ct.starts_with("application/pdf"))
            })
            .map(|(hit, _)| hit)
            .collect()
    }
}

fn format_candidates(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. [{}]({})\n{}", i + 1, hit.title.trim(), hit.url, hit.snippet.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
