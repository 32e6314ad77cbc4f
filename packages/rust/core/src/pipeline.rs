//! Per-entity workflow: sources → merge → activity code → report fallback.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use factfinder_fetch::{FetchOrchestrator, SourceAdapter};
use factfinder_shared::{AppConfig, Entity, FactFinderError, FactSet, FactValue, ReportLocation, Result, Topic};

use crate::activity::{ActivityClassifier, normalize_nace_code};
use crate::document_facts::{REPORT_TOPICS, ReportReader};
use crate::reconcile::ReconciliationEngine;
use crate::report::ReportLocator;

/// The final fact set of one entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityProfile {
    pub entity: Entity,
    pub facts: FactSet,
}

/// Result of [`PipelineDriver::process_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub profiles: Vec<EntityProfile>,
    /// Entities whose run returned an error, with the error text.
    pub failed: Vec<(Entity, String)>,
}

/// Progress callback for batch runs.
pub trait BatchProgress: Send + Sync {
    /// Called before an entity is processed. `current` is 1-based.
    fn entity_started(&self, entity: &Entity, current: usize, total: usize);
    /// Called after an entity is processed; `facts` is `None` on failure.
    fn entity_finished(&self, entity: &Entity, facts: Option<&FactSet>);
    /// Called once the batch completes.
    fn done(&self, report: &BatchReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl BatchProgress for SilentProgress {
    fn entity_started(&self, _entity: &Entity, _current: usize, _total: usize) {}
    fn entity_finished(&self, _entity: &Entity, _facts: Option<&FactSet>) {}
    fn done(&self, _report: &BatchReport) {}
}

/// Drives sources, reconciliation and the document fallback for entities.
pub struct PipelineDriver {
    orchestrator: FetchOrchestrator,
    engine: ReconciliationEngine,
    reader: Option<Arc<dyn ReportReader>>,
    locator: Option<ReportLocator>,
    classifier: Option<ActivityClassifier>,
    required_topics: Vec<Topic>,
    min_acceptable_year: i32,
    latest_valid_year: i32,
}

impl PipelineDriver {
    pub fn new(orchestrator: FetchOrchestrator, engine: ReconciliationEngine) -> Self {
        Self {
            orchestrator,
            engine,
            reader: None,
            locator: None,
            classifier: None,
            required_topics: Topic::ALL.to_vec(),
            min_acceptable_year: 2023,
            latest_valid_year: 2024,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            FetchOrchestrator::from_config(&config.fetch),
            ReconciliationEngine::from_config(&config.reconciliation),
        )
        .with_required_topics(config.defaults.required_topics.clone())
        .with_years(
            config.reconciliation.min_acceptable_year,
            config.reconciliation.latest_valid_year,
        )
    }

    pub fn with_report_reader(mut self, reader: Arc<dyn ReportReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn with_report_locator(mut self, locator: ReportLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_activity_classifier(mut self, classifier: ActivityClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_required_topics(mut self, topics: Vec<Topic>) -> Self {
        self.required_topics = topics;
        self
    }

    pub fn with_years(mut self, min_acceptable_year: i32, latest_valid_year: i32) -> Self {
        self.min_acceptable_year = min_acceptable_year;
        self.latest_valid_year = latest_valid_year;
        self
    }

    /// Required topics with no fact dated `min_acceptable_year` or later.
    pub fn missing_topics(&self, facts: &FactSet) -> BTreeSet<Topic> {
        self.required_topics
            .iter()
            .copied()
            .filter(|&topic| {
                !facts
                    .get(topic)
                    .and_then(|fact| fact.year)
                    .is_some_and(|year| year >= self.min_acceptable_year)
            })
            .collect()
    }

    /// Assemble the fact set of one entity.
    ///
    /// Fails only when every source failed, nothing was merged and there is
    /// no report to fall back on.
    #[instrument(skip_all, fields(entity = %entity.name, id = %entity.id))]
    pub async fn process_entity(
        &self,
        entity: &Entity,
        adapters: &[Arc<dyn SourceAdapter>],
        report: Option<ReportLocation>,
    ) -> Result<FactSet> {
        let start = Instant::now();

        // --- Phase 1: Sources ---
        let outcomes = self.orchestrator.fetch_all(entity, adapters).await;
        let all_failed = outcomes.iter().all(|outcome| outcome.result.is_err());
        let sets: Vec<FactSet> = outcomes
            .into_iter()
            .filter_map(|outcome| outcome.result.ok())
            .collect();

        // --- Phase 2: Reconcile ---
        let mut merged = self.engine.merge(&sets);
        self.normalize_activity(&mut merged).await;

        // --- Phase 3: Report fallback ---
        let missing = self.report_topics(&merged);
        if !missing.is_empty() {
            debug!(missing = ?missing, "topics missing after merge");
        }

        let report = match report {
            _ if missing.is_empty() => None,
            Some(report) => Some(report),
            None => self.locate_report(entity, &merged).await,
        };

        let fallback = match (&self.reader, report) {
            (Some(reader), Some(report)) if report.year >= self.latest_valid_year => Some((reader, report)),
            (Some(_), Some(report)) => {
                info!(year = report.year, "report too old for extraction");
                None
            }
            _ => None,
        };

        if all_failed && merged.is_empty() && fallback.is_none() {
            return Err(FactFinderError::validation(format!(
                "no source produced facts for {} and no readable report is available",
                entity.name
            )));
        }

        let Some((reader, report)) = fallback else {
            info!(
                facts = merged.len(),
                missing = missing.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "entity complete"
            );
            return Ok(merged);
        };

        let facts = match reader.read_missing(entity, &report, &missing).await {
            Ok(document_facts) => {
                let combined = merged.into_facts().into_iter().chain(document_facts);
                self.engine.keep_latest_per_topic(combined.collect())
            }
            Err(e) => {
                warn!(url = %report.url, error = %e, "report extraction failed");
                merged
            }
        };

        info!(
            facts = facts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "entity complete"
        );
        Ok(facts)
    }

    /// Missing topics a report can supply; the document fallback runs only
    /// when this is non-empty.
    pub fn report_topics(&self, facts: &FactSet) -> BTreeSet<Topic> {
        let mut missing = self.missing_topics(facts);
        missing.retain(|topic| REPORT_TOPICS.contains(topic));
        missing
    }

    /// Process `entities` one after another, skipping those that fail.
    #[instrument(skip_all, fields(entities = entities.len()))]
    pub async fn process_batch(
        &self,
        entities: &[Entity],
        adapters: &[Arc<dyn SourceAdapter>],
        progress: &dyn BatchProgress,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let total = entities.len();

        for (i, entity) in entities.iter().enumerate() {
            progress.entity_started(entity, i + 1, total);
            match self.process_entity(entity, adapters, None).await {
                Ok(facts) => {
                    progress.entity_finished(entity, Some(&facts));
                    report.profiles.push(EntityProfile {
                        entity: entity.clone(),
                        facts,
                    });
                }
                Err(e) => {
                    warn!(entity = %entity.name, error = %e, "entity skipped");
                    progress.entity_finished(entity, None);
                    report.failed.push((entity.clone(), e.to_string()));
                }
            }
        }

        info!(
            succeeded = report.profiles.len(),
            failed = report.failed.len(),
            "batch complete"
        );
        progress.done(&report);
        report
    }

    /// Register codes are normalized; free text goes through the classifier.
    /// Facts that cannot be turned into a valid code are dropped, except text
    /// whose classification errored, which is kept as is.
    async fn normalize_activity(&self, facts: &mut FactSet) {
        let Some(fact) = facts.get_mut(Topic::Activity) else {
            return;
        };

        let code = match &fact.value {
            FactValue::Code(raw) => normalize_nace_code(raw),
            FactValue::Text(text) => {
                let Some(classifier) = &self.classifier else {
                    return;
                };
                match classifier.classify(text).await {
                    Ok(code) => code,
                    Err(e) => {
                        warn!(error = %e, "activity classification failed");
                        return;
                    }
                }
            }
            FactValue::Integer(_) => None,
        };

        match code {
            Some(code) => fact.value = FactValue::Code(code),
            None => {
                debug!(value = ?fact.value, "dropping activity without a valid code");
                facts.remove(Topic::Activity);
            }
        }
    }

    async fn locate_report(&self, entity: &Entity, facts: &FactSet) -> Option<ReportLocation> {
        let locator = self.locator.as_ref()?;
        let website = facts
            .get(Topic::Website)
            .and_then(|fact| match &fact.value {
                FactValue::Code(domain) | FactValue::Text(domain) => Some(domain.as_str()),
                FactValue::Integer(_) => None,
            });

        match locator.locate(entity, website).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "report lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractionRequest, StructuredExtractor};
    use async_trait::async_trait;
    use factfinder_shared::{Currency, Fact, SourceKind};
    use serde_json::{Value, json};
    use factfinder_fetch::{SearchBackend, SearchHit, SourceClient};
    use factfinder_shared::FetchConfig;
    use factfinder_storage::KeyCache;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeAdapter {
        name: &'static str,
        kind: SourceKind,
        facts: Option<Vec<Fact>>,
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn resolve(&self, _entity: &Entity) -> Result<Vec<Fact>> {
            self.facts
                .clone()
                .ok_or_else(|| FactFinderError::source_unavailable(self.name, "down"))
        }
    }

    /// Returns canned facts and records the topics it was asked for.
    struct FakeReader {
        facts: Vec<Fact>,
        asked: Mutex<Vec<BTreeSet<Topic>>>,
    }

    #[async_trait]
    impl ReportReader for FakeReader {
        async fn read_missing(
            &self,
            _entity: &Entity,
            _report: &ReportLocation,
            missing: &BTreeSet<Topic>,
        ) -> Result<Vec<Fact>> {
            self.asked.lock().unwrap().push(missing.clone());
            Ok(self.facts.clone())
        }
    }

    struct Canned(Value);

    #[async_trait]
    impl StructuredExtractor for Canned {
        async fn extract(&self, _request: ExtractionRequest) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    fn entity() -> Entity {
        Entity::new("E1", "Acme")
    }

    fn fact(topic: Topic, value: FactValue, year: i32, source: SourceKind) -> Fact {
        Fact::new(&entity(), topic, value, source).with_year(Some(year))
    }

    fn adapter(name: &'static str, kind: SourceKind, facts: Option<Vec<Fact>>) -> Arc<dyn SourceAdapter> {
        Arc::new(FakeAdapter { name, kind, facts })
    }

    fn driver() -> PipelineDriver {
        PipelineDriver::new(
            FetchOrchestrator::new(Duration::from_secs(5)),
            ReconciliationEngine::default(),
        )
    }

    fn report(year: i32) -> ReportLocation {
        ReportLocation {
            url: "https://acme.com/ar.pdf".into(),
            year,
        }
    }

    #[tokio::test]
    async fn merges_sources_latest_wins() {
        let adapters = vec![
            adapter(
                "encyclopedia",
                SourceKind::Encyclopedia,
                Some(vec![fact(Topic::Turnover, FactValue::Integer(100), 2023, SourceKind::Encyclopedia)]),
            ),
            adapter(
                "financial",
                SourceKind::Financial,
                Some(vec![fact(Topic::Turnover, FactValue::Integer(120), 2024, SourceKind::Financial)]),
            ),
        ];

        let facts = driver().process_entity(&entity(), &adapters, None).await.unwrap();
        let turnover = facts.get(Topic::Turnover).unwrap();
        assert_eq!(turnover.value, FactValue::Integer(120));
        assert_eq!(turnover.source, SourceKind::Financial);
    }

    #[tokio::test]
    async fn all_sources_failed_without_report_is_an_error() {
        let adapters = vec![adapter("a", SourceKind::Financial, None), adapter("b", SourceKind::Register, None)];

        let err = driver().process_entity(&entity(), &adapters, None).await.unwrap_err();
        assert!(matches!(err, FactFinderError::Validation { .. }));
    }

    #[tokio::test]
    async fn report_rescues_failed_sources() {
        let reader = Arc::new(FakeReader {
            facts: vec![
                fact(Topic::Employees, FactValue::Integer(900), 2024, SourceKind::Document)
                    .with_source_url(Some("https://acme.com/ar.pdf".into())),
            ],
            asked: Mutex::new(Vec::new()),
        });
        let driver = driver().with_report_reader(reader.clone());
        let adapters = vec![adapter("a", SourceKind::Financial, None)];

        let facts = driver
            .process_entity(&entity(), &adapters, Some(report(2024)))
            .await
            .unwrap();
        assert_eq!(facts.get(Topic::Employees).unwrap().value, FactValue::Integer(900));
        let asked = reader.asked.lock().unwrap().clone();
        assert_eq!(asked, vec![BTreeSet::from(REPORT_TOPICS)]);
        assert!(!asked[0].contains(&Topic::Activity));
    }

    #[tokio::test]
    async fn reader_is_asked_for_missing_topics_only() {
        let reader = Arc::new(FakeReader {
            facts: vec![fact(Topic::Employees, FactValue::Integer(1_000), 2024, SourceKind::Document)],
            asked: Mutex::new(Vec::new()),
        });
        let driver = driver()
            .with_report_reader(reader.clone())
            .with_required_topics(vec![Topic::Country, Topic::Employees]);
        let adapters = vec![adapter(
            "encyclopedia",
            SourceKind::Encyclopedia,
            Some(vec![
                fact(Topic::Country, FactValue::Code("FR".into()), 2024, SourceKind::Encyclopedia),
                fact(Topic::Employees, FactValue::Integer(800), 2021, SourceKind::Encyclopedia),
            ]),
        )];

        let facts = driver
            .process_entity(&entity(), &adapters, Some(report(2024)))
            .await
            .unwrap();

        let asked = reader.asked.lock().unwrap().clone();
        assert_eq!(asked, vec![BTreeSet::from([Topic::Employees])]);
        let employees = facts.get(Topic::Employees).unwrap();
        assert_eq!(employees.value, FactValue::Integer(1_000));
        assert_eq!(employees.source, SourceKind::Document);
        assert_eq!(facts.get(Topic::Country).unwrap().source, SourceKind::Encyclopedia);
    }

    /// Counts searches; never finds anything.
    struct CountingSearch(AtomicUsize);

    #[async_trait]
    impl SearchBackend for CountingSearch {
        fn name(&self) -> &str {
            "counting"
        }

        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn missing_activity_alone_skips_report_lookup() {
        let search = Arc::new(CountingSearch(AtomicUsize::new(0)));
        let dir = std::env::temp_dir().join(format!("ff-pipeline-{}", uuid::Uuid::now_v7()));
        let cache = Arc::new(KeyCache::open(dir.join("reports.json")));
        let backends: Vec<Arc<dyn SearchBackend>> = vec![search.clone()];
        let locator = ReportLocator::new(
            backends,
            Arc::new(Canned(json!({}))),
            cache,
            SourceClient::new("report-check", &FetchConfig::default()).unwrap(),
            2024,
        );
        let reader = Arc::new(FakeReader {
            facts: Vec::new(),
            asked: Mutex::new(Vec::new()),
        });
        let driver = driver()
            .with_report_reader(reader.clone())
            .with_report_locator(locator);

        let facts: Vec<Fact> = REPORT_TOPICS
            .iter()
            .map(|&topic| fact(topic, FactValue::Code("x".into()), 2024, SourceKind::Financial))
            .collect();
        let adapters = vec![adapter("financial", SourceKind::Financial, Some(facts))];

        let merged = driver.process_entity(&entity(), &adapters, None).await.unwrap();
        assert_eq!(merged.len(), REPORT_TOPICS.len());
        assert!(driver.missing_topics(&merged).contains(&Topic::Activity));
        assert!(driver.report_topics(&merged).is_empty());
        assert_eq!(search.0.load(Ordering::SeqCst), 0);
        assert!(reader.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn old_report_is_no_fallback_for_failed_sources() {
        let reader = Arc::new(FakeReader {
            facts: Vec::new(),
            asked: Mutex::new(Vec::new()),
        });
        let driver = driver().with_report_reader(reader.clone());
        let adapters = vec![adapter("a", SourceKind::Financial, None)];

        let err = driver
            .process_entity(&entity(), &adapters, Some(report(2023)))
            .await
            .unwrap_err();
        assert!(matches!(err, FactFinderError::Validation { .. }));
        assert!(reader.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn old_reports_are_not_read() {
        let reader = Arc::new(FakeReader {
            facts: Vec::new(),
            asked: Mutex::new(Vec::new()),
        });
        let driver = driver().with_report_reader(reader.clone());
        let adapters = vec![adapter(
            "financial",
            SourceKind::Financial,
            Some(vec![fact(Topic::Turnover, FactValue::Integer(5), 2024, SourceKind::Financial)
                .with_currency(Some(Currency::Iso("USD".into())))]),
        )];

        let facts = driver
            .process_entity(&entity(), &adapters, Some(report(2023)))
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert!(reader.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_codes_are_normalized_or_dropped() {
        let with_code = |code: &str| {
            vec![adapter(
                "register",
                SourceKind::Register,
                Some(vec![fact(Topic::Activity, FactValue::Code(code.into()), 2024, SourceKind::Register)]),
            )]
        };

        let facts = driver().process_entity(&entity(), &with_code("70.10Z"), None).await.unwrap();
        assert_eq!(facts.get(Topic::Activity).unwrap().value, FactValue::Code("M70.10".into()));

        let facts = driver().process_entity(&entity(), &with_code("99.99.99"), None).await.unwrap();
        assert!(!facts.contains(Topic::Activity));
    }

    #[tokio::test]
    async fn activity_text_is_classified() {
        let classifier = ActivityClassifier::new(Arc::new(Canned(json!({ "code": "29.10" }))));
        let driver = driver().with_activity_classifier(classifier);
        let adapters = vec![adapter(
            "encyclopedia",
            SourceKind::Encyclopedia,
            Some(vec![fact(
                Topic::Activity,
                FactValue::Text("Automotive manufacturing".into()),
                2024,
                SourceKind::Encyclopedia,
            )]),
        )];

        let facts = driver.process_entity(&entity(), &adapters, None).await.unwrap();
        let activity = facts.get(Topic::Activity).unwrap();
        assert_eq!(activity.value, FactValue::Code("C29.10".into()));
        assert_eq!(activity.source, SourceKind::Encyclopedia);
    }

    #[test]
    fn missing_topics_respects_min_year() {
        let driver = driver();
        let mut facts = FactSet::new();
        facts.insert(fact(Topic::Country, FactValue::Code("FR".into()), 2023, SourceKind::Register));
        facts.insert(fact(Topic::Assets, FactValue::Integer(1), 2022, SourceKind::Financial));
        facts.insert(Fact::new(&entity(), Topic::Website, FactValue::Code("acme.com".into()), SourceKind::WebSearch));

        let missing = driver.missing_topics(&facts);
        assert!(!missing.contains(&Topic::Country));
        assert!(missing.contains(&Topic::Assets));
        assert!(missing.contains(&Topic::Website));
        assert!(missing.contains(&Topic::Employees));
    }

    struct Counting {
        finished: Mutex<Vec<(String, bool)>>,
    }

    impl BatchProgress for Counting {
        fn entity_started(&self, _entity: &Entity, _current: usize, _total: usize) {}

        fn entity_finished(&self, entity: &Entity, facts: Option<&FactSet>) {
            self.finished.lock().unwrap().push((entity.id.clone(), facts.is_some()));
        }

        fn done(&self, _report: &BatchReport) {}
    }

    /// Fails for every entity except "Good".
    struct NameGated;

    #[async_trait]
    impl SourceAdapter for NameGated {
        fn name(&self) -> &str {
            "gated"
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Financial
        }

        async fn resolve(&self, entity: &Entity) -> Result<Vec<Fact>> {
            if entity.name == "Good" {
                Ok(vec![fact(Topic::Employees, FactValue::Integer(10), 2024, SourceKind::Financial)])
            } else {
                Err(FactFinderError::no_candidate("gated", entity.name.clone()))
            }
        }
    }

    #[tokio::test]
    async fn batch_skips_failed_entities() {
        let entities = vec![Entity::new("1", "Bad"), Entity::new("2", "Good")];
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(NameGated)];
        let progress = Counting {
            finished: Mutex::new(Vec::new()),
        };

        let report = driver().process_batch(&entities, &adapters, &progress).await;

        assert_eq!(report.profiles.len(), 1);
        assert_eq!(report.profiles[0].entity.id, "2");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.id, "1");
        assert_eq!(
            *progress.finished.lock().unwrap(),
            vec![("1".to_string(), false), ("2".to_string(), true)]
        );
    }
}
