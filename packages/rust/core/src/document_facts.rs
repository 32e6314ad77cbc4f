//! Facts read from an annual report PDF for topics the sources left open.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use factfinder_document::{Document, PageSelector, format_for_prompt};
use factfinder_fetch::SourceClient;
use factfinder_shared::normalize::{country_code, detect_currency, website_domain};
use factfinder_shared::{
    AppConfig, Currency, Entity, Fact, FactFinderError, FactValue, ReportLocation, Result, SourceKind, Topic,
};

use crate::extraction::{StructuredExtractor, extract_as};

/// Topics an annual report can supply. Activity codes never come from reports.
pub const REPORT_TOPICS: [Topic; 5] = [
    Topic::Country,
    Topic::Employees,
    Topic::Turnover,
    Topic::Assets,
    Topic::Website,
];

/// Reads facts for `missing` topics out of an entity's annual report.
#[async_trait]
pub trait ReportReader: Send + Sync {
    async fn read_missing(
        &self,
        entity: &Entity,
        report: &ReportLocation,
        missing: &BTreeSet<Topic>,
    ) -> Result<Vec<Fact>>;
}

/// Headline figures as the extraction step returns them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, JsonSchema)]
pub struct ReportFigures {
    /// Country of the group's headquarters.
    pub country: Option<String>,
    /// Total number of employees at year end.
    pub employees: Option<i64>,
    /// Consolidated revenue, in units of `currency` (not thousands or millions).
    pub turnover: Option<i64>,
    /// Consolidated total assets, in units of `currency`.
    pub assets: Option<i64>,
    /// Group website.
    pub website: Option<String>,
    /// ISO 4217 code of the reporting currency.
    pub currency: Option<String>,
}

const INSTRUCTIONS: &str = "You read excerpts of a company's annual report. \
Extract the consolidated group figures for the reported fiscal year: \
headquarters country, total employees, revenue (turnover), total assets, \
website and reporting currency. Convert amounts stated in thousands or \
millions into full units. Use null for anything the excerpts do not state.";

/// Downloads the report, selects the relevant pages and extracts figures.
pub struct DocumentFactExtractor {
    downloader: SourceClient,
    selector: PageSelector,
    extractor: Arc<dyn StructuredExtractor>,
    download_timeout: Duration,
}

impl DocumentFactExtractor {
    pub fn new(config: &AppConfig, extractor: Arc<dyn StructuredExtractor>) -> Result<Self> {
        Ok(Self {
            downloader: SourceClient::new("document", &config.fetch)?,
            selector: PageSelector::from_config(&config.document),
            extractor,
            download_timeout: Duration::from_secs(config.document.download_timeout_secs),
        })
    }

    pub async fn download(&self, url: &str) -> Result<Document> {
        let bytes = self
            .downloader
            .get_bytes(url, self.downloader.default_user_agent(), self.download_timeout)
            .await?;
        debug!(%url, bytes = bytes.len(), "report downloaded");

        tokio::task::spawn_blocking(move || Document::from_pdf_bytes(&bytes))
            .await
            .map_err(|e| FactFinderError::Document(format!("PDF parsing task failed: {e}")))?
    }

    /// Select pages for `missing` and extract facts from them. An empty
    /// selection yields no facts without calling the extractor.
    pub async fn extract_from_document(
        &self,
        entity: &Entity,
        report: &ReportLocation,
        document: &Document,
        missing: &BTreeSet<Topic>,
    ) -> Result<Vec<Fact>> {
        let selection = self.selector.select(document, missing);
        if selection.is_empty() {
            debug!("no report page mentions a missing topic");
            return Ok(Vec::new());
        }

        let context = format_for_prompt(&selection);
        let figures: ReportFigures =
            extract_as(self.extractor.as_ref(), "report_figures", INSTRUCTIONS, &context).await?;

        let facts = figures_to_facts(entity, report, &figures, missing);
        info!(
            pages = ?selection.page_numbers(),
            facts = facts.len(),
            "report figures extracted"
        );
        Ok(facts)
    }
}

#[async_trait]
impl ReportReader for DocumentFactExtractor {
    #[instrument(skip_all, fields(entity = %entity.name, url = %report.url, year = report.year))]
    async fn read_missing(
        &self,
        entity: &Entity,
        report: &ReportLocation,
        missing: &BTreeSet<Topic>,
    ) -> Result<Vec<Fact>> {
        let document = self.download(&report.url).await?;
        self.extract_from_document(entity, report, &document, missing).await
    }
}

/// Turn extracted figures into facts for the `missing` topics only. Every
/// fact carries the report year; only monetary topics carry the currency.
pub fn figures_to_facts(
    entity: &Entity,
    report: &ReportLocation,
    figures: &ReportFigures,
    missing: &BTreeSet<Topic>,
) -> Vec<Fact> {
    let currency = figures
        .currency
        .as_deref()
        .and_then(|c| Currency::iso(c).or_else(|| detect_currency(c).and_then(Currency::iso)));

    missing
        .iter()
        .filter_map(|&topic| {
            let value = match topic {
                Topic::Country => figures.country.as_deref().and_then(country_code).map(|c| FactValue::Code(c.into())),
                Topic::Employees => figures.employees.filter(|n| *n > 0).map(FactValue::Integer),
                Topic::Turnover => figures.turnover.map(FactValue::Integer),
                Topic::Assets => figures.assets.map(FactValue::Integer),
                Topic::Website => figures.website.as_deref().and_then(website_domain).map(FactValue::Code),
                Topic::Activity => None,
            }?;

            let mut fact = Fact::new(entity, topic, value, SourceKind::Document)
                .with_year(Some(report.year))
                .with_source_url(Some(report.url.clone()));
            if topic.is_monetary() {
                fact = fact.with_currency(currency.clone());
            }
            Some(fact)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractionRequest;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    /// Records the context it was given and replies with canned figures.
    struct Recording {
        reply: Value,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StructuredExtractor for Recording {
        async fn extract(&self, request: ExtractionRequest) -> Result<Value> {
            self.seen.lock().unwrap().push(request.context);
            Ok(self.reply.clone())
        }
    }

    fn report() -> ReportLocation {
        ReportLocation {
            url: "https://acme.com/ar-2024.pdf".into(),
            year: 2024,
        }
    }

    fn missing(topics: &[Topic]) -> BTreeSet<Topic> {
        topics.iter().copied().collect()
    }

    #[test]
    fn only_missing_topics_become_facts() {
        let figures = ReportFigures {
            country: Some("France".into()),
            employees: Some(1_200),
            turnover: Some(5_000_000),
            assets: Some(9_000_000),
            website: Some("www.acme.fr".into()),
            currency: Some("eur".into()),
        };
        let entity = Entity::new("E1", "Acme");
        let facts = figures_to_facts(&entity, &report(), &figures, &missing(&[Topic::Turnover, Topic::Country]));

        assert_eq!(facts.len(), 2);
        let country = facts.iter().find(|f| f.topic == Topic::Country).unwrap();
        assert_eq!(country.value, FactValue::Code("FR".into()));
        assert_eq!(country.currency, Some(Currency::NotApplicable));
        let turnover = facts.iter().find(|f| f.topic == Topic::Turnover).unwrap();
        assert_eq!(turnover.currency, Some(Currency::Iso("EUR".into())));
        assert!(facts.iter().all(|f| f.year == Some(2024) && f.source == SourceKind::Document));
    }

    #[test]
    fn currency_symbols_are_normalized() {
        let figures = ReportFigures {
            assets: Some(10),
            currency: Some("€".into()),
            ..Default::default()
        };
        let facts = figures_to_facts(&Entity::new("E1", "Acme"), &report(), &figures, &missing(&[Topic::Assets]));
        assert_eq!(facts[0].currency, Some(Currency::Iso("EUR".into())));
    }

    #[tokio::test]
    async fn sends_selected_pages_only() {
        let recording = Arc::new(Recording {
            reply: json!({
                "country": null, "employees": 4200, "turnover": 77000000,
                "assets": null, "website": null, "currency": "USD"
            }),
            seen: Mutex::new(Vec::new()),
        });
        let extractor = DocumentFactExtractor::new(&AppConfig::default(), recording.clone()).unwrap();
        let document = Document::from_pages([
            "Letter to shareholders",
            "Revenue for the year",
            "Our people",
            "We had 4,200 employees",
        ]);

        let facts = extractor
            .extract_from_document(
                &Entity::new("E1", "Acme"),
                &report(),
                &document,
                &missing(&[Topic::Employees, Topic::Turnover]),
            )
            .await
            .unwrap();

        assert_eq!(facts.len(), 2);
        let seen = recording.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("--- Page 2 ---"));
        assert!(seen[0].contains("--- Page 4 ---"));
        assert!(!seen[0].contains("Letter to shareholders"));
    }

    #[tokio::test]
    async fn empty_selection_skips_extraction() {
        let recording = Arc::new(Recording {
            reply: json!({}),
            seen: Mutex::new(Vec::new()),
        });
        let extractor = DocumentFactExtractor::new(&AppConfig::default(), recording.clone()).unwrap();
        let document = Document::from_pages(["Nothing relevant"]);

        let facts = extractor
            .extract_from_document(&Entity::new("E1", "Acme"), &report(), &document, &missing(&[Topic::Website]))
            .await
            .unwrap();
        assert!(facts.is_empty());
        assert!(recording.seen.lock().unwrap().is_empty());
    }
}
