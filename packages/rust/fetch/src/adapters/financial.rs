//! Financial-data adapter (Yahoo Finance): profile and headline figures by ticker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use factfinder_shared::normalize::{country_code, website_domain};
use factfinder_shared::{
    Currency, Entity, Fact, FactFinderError, FactValue, FetchConfig, Result, SourceKind, Topic,
};
use factfinder_storage::{CacheEntry, KeyCache};

use super::SourceAdapter;
use crate::client::SourceClient;
use crate::retry::RetryingFetcher;

const API_URL: &str = "https://query2.finance.yahoo.com";
const QUOTE_PAGE_URL: &str = "https://finance.yahoo.com/quote/";
const SUMMARY_MODULES: &str = "assetProfile,financialData,defaultKeyStatistics";

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TickerSearch {
    #[serde(default)]
    quotes: Vec<TickerQuote>,
}

#[derive(Debug, Deserialize)]
struct TickerQuote {
    symbol: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    quote_summary: SummaryEnvelope,
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    #[serde(default)]
    result: Vec<Summary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    #[serde(default)]
    asset_profile: AssetProfile,
    #[serde(default)]
    financial_data: FinancialData,
    #[serde(default)]
    default_key_statistics: KeyStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetProfile {
    country: Option<String>,
    website: Option<String>,
    full_time_employees: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinancialData {
    total_revenue: Option<RawValue>,
    financial_currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyStatistics {
    last_fiscal_year_end: Option<RawValue>,
}

/// Yahoo wraps numbers as `{"raw": 123, "fmt": "123"}`.
#[derive(Debug, Deserialize)]
struct RawValue {
    raw: Option<f64>,
}

impl RawValue {
    fn as_i64(&self) -> Option<i64> {
        self.raw.filter(|v| v.is_finite()).map(|v| v.round() as i64)
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Resolves the entity's ticker (cached across runs) and reads its quote summary.
pub struct FinancialAdapter {
    client: SourceClient,
    api_url: String,
    tickers: Arc<KeyCache>,
}

impl FinancialAdapter {
    pub fn new(config: &FetchConfig, tickers: Arc<KeyCache>) -> Result<Self> {
        Ok(Self {
            client: SourceClient::new("financial", config)?,
            api_url: API_URL.to_string(),
            tickers,
        })
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Ticker symbol for `name`: cached value first, else a search.
    pub async fn ticker_for(&self, name: &str) -> Result<String> {
        if let Some(entry) = self.tickers.get(name).await {
            debug!(name, ticker = %entry.value, "ticker cache hit");
            return Ok(entry.value);
        }

        let url = format!("{}/v1/finance/search", self.api_url);
        let search: TickerSearch = RetryingFetcher::new(&self.client)
            .resolve("ticker search", |ua| {
                let url = &url;
                async move {
                    self.client
                        .get_json(url, &[("q", name), ("quotesCount", "1"), ("newsCount", "0")], &ua)
                        .await
                }
            })
            .await?;

        let ticker = search
            .quotes
            .into_iter()
            .next()
            .map(|q| q.symbol)
            .ok_or_else(|| FactFinderError::no_candidate(self.name(), name))?;

        if let Err(e) = self.tickers.put(name, CacheEntry::new(&ticker)).await {
            warn!(name, error = %e, "failed to persist ticker cache");
        }
        Ok(ticker)
    }

    async fn summary(&self, ticker: &str) -> Result<Summary> {
        let url = format!("{}/v10/finance/quoteSummary/{ticker}", self.api_url);
        let response: SummaryResponse = RetryingFetcher::new(&self.client)
            .resolve("quote summary", |ua| {
                let url = &url;
                async move { self.client.get_json(url, &[("modules", SUMMARY_MODULES)], &ua).await }
            })
            .await?;

        response
            .quote_summary
            .result
            .into_iter()
            .next()
            .ok_or_else(|| FactFinderError::no_candidate(self.name(), ticker))
    }
}

#[async_trait]
impl SourceAdapter for FinancialAdapter {
    fn name(&self) -> &str {
        "financial"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Financial
    }

    #[instrument(skip_all, fields(entity = %entity.name))]
    async fn resolve(&self, entity: &Entity) -> Result<Vec<Fact>> {
        let ticker = self.ticker_for(&entity.name).await?;
        let summary = self.summary(&ticker).await?;

        let year = summary
            .default_key_statistics
            .last_fiscal_year_end
            .as_ref()
            .and_then(RawValue::as_i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|end| end.year());
        let page_url = Some(format!("{QUOTE_PAGE_URL}{ticker}"));
        let fact = |topic, value| {
            Fact::new(entity, topic, value, SourceKind::Financial)
                .with_year(year)
                .with_source_url(page_url.clone())
        };

        let profile = &summary.asset_profile;
        let mut facts = Vec::new();

        if let Some(code) = profile.country.as_deref().and_then(country_code) {
            facts.push(fact(Topic::Country, FactValue::Code(code.into())));
        }
        if let Some(employees) = profile.full_time_employees {
            facts.push(fact(Topic::Employees, FactValue::Integer(employees)));
        }
        if let Some(domain) = profile.website.as_deref().and_then(website_domain) {
            facts.push(fact(Topic::Website, FactValue::Code(domain)));
        }
        if let Some(revenue) = summary.financial_data.total_revenue.as_ref().and_then(RawValue::as_i64) {
            let currency = summary.financial_data.financial_currency.as_deref().and_then(Currency::iso);
            facts.push(fact(Topic::Turnover, FactValue::Integer(revenue)).with_currency(currency));
        }

        debug!(%ticker, ?year, facts = facts.len(), "quote summary read");
        Ok(facts)
    }
}
