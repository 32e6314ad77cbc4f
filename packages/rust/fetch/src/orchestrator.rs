//! Concurrent fan-out of source adapters for one entity.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use factfinder_shared::{Entity, FactFinderError, FactSet, FetchConfig, Result, SourceKind};

use crate::adapters::SourceAdapter;

/// What one adapter produced for one entity.
#[derive(Debug)]
pub struct SourceOutcome {
    pub source: String,
    pub kind: SourceKind,
    /// The adapter's facts collapsed to the latest per topic, or why it gave none.
    pub result: Result<FactSet>,
}

impl SourceOutcome {
    pub fn facts(&self) -> Option<&FactSet> {
        self.result.as_ref().ok()
    }
}

/// Runs every adapter in its own task under a uniform timeout.
///
/// A failing, panicking or slow adapter only loses its own outcome; the others
/// are unaffected. No retries happen here.
#[derive(Debug, Clone)]
pub struct FetchOrchestrator {
    timeout: Duration,
}

impl FetchOrchestrator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.adapter_timeout())
    }

    /// One outcome per adapter, in adapter order.
    #[instrument(skip_all, fields(entity = %entity.name, adapters = adapters.len()))]
    pub async fn fetch_all(&self, entity: &Entity, adapters: &[Arc<dyn SourceAdapter>]) -> Vec<SourceOutcome> {
        let start = std::time::Instant::now();

        let handles: Vec<_> = adapters
            .iter()
            .map(|adapter| {
                let adapter = Arc::clone(adapter);
                let entity = entity.clone();
                let timeout = self.timeout;
                tokio::spawn(async move { tokio::time::timeout(timeout, adapter.resolve(&entity)).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(adapters.len());
        for (adapter, handle) in adapters.iter().zip(handles) {
            let name = adapter.name();
            let result = match handle.await {
                Ok(Ok(Ok(facts))) => Ok(FactSet::latest_of(facts)),
                Ok(Ok(Err(e))) => Err(e),
                Ok(Err(_)) => Err(FactFinderError::source_unavailable(
                    name,
                    format!("timed out after {}s", self.timeout.as_secs_f32()),
                )),
                Err(e) if e.is_panic() => Err(FactFinderError::source_unavailable(name, "adapter panicked")),
                Err(e) => Err(FactFinderError::source_unavailable(name, format!("task failed: {e}"))),
            };

            match &result {
                Ok(set) => debug!(source = name, facts = set.len(), "source resolved"),
                Err(e) if e.is_no_candidate() => debug!(source = name, "source had no candidate"),
                Err(e) => warn!(source = name, error = %e, "source failed"),
            }

            outcomes.push(SourceOutcome {
                source: name.to_string(),
                kind: adapter.kind(),
                result,
            });
        }

        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        info!(
            succeeded,
            failed = outcomes.len() - succeeded,
            duration_ms = start.elapsed().as_millis() as u64,
            "fetch complete"
        );

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use factfinder_shared::{Fact, FactValue, Topic};

    enum Behavior {
        Facts(Vec<(Topic, i64, Option<i32>)>),
        Fail,
        Hang,
        Panic,
    }

    struct FakeAdapter {
        name: &'static str,
        behavior: Behavior,
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Financial
        }

        async fn resolve(&self, entity: &Entity) -> Result<Vec<Fact>> {
            match &self.behavior {
                Behavior::Facts(facts) => Ok(facts
                    .iter()
                    .map(|(topic, value, year)| {
                        Fact::new(entity, *topic, FactValue::Integer(*value), self.kind()).with_year(*year)
                    })
                    .collect()),
                Behavior::Fail => Err(FactFinderError::Network("connection reset".into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(vec![])
                }
                Behavior::Panic => panic!("adapter bug"),
            }
        }
    }

    fn adapter(name: &'static str, behavior: Behavior) -> Arc<dyn SourceAdapter> {
        Arc::new(FakeAdapter { name, behavior })
    }

    #[tokio::test]
    async fn failures_are_isolated_per_adapter() {
        let adapters = vec![
            adapter("good", Behavior::Facts(vec![(Topic::Employees, 10, Some(2024))])),
            adapter("failing", Behavior::Fail),
            adapter("slow", Behavior::Hang),
            adapter("broken", Behavior::Panic),
        ];

        let outcomes = FetchOrchestrator::new(Duration::from_millis(100))
            .fetch_all(&Entity::new("E1", "Acme"), &adapters)
            .await;

        let names: Vec<&str> = outcomes.iter().map(|o| o.source.as_str()).collect();
        assert_eq!(names, vec!["good", "failing", "slow", "broken"]);
        assert_eq!(outcomes[0].facts().unwrap().len(), 1);
        assert!(matches!(outcomes[1].result, Err(FactFinderError::Network(_))));
        assert!(matches!(outcomes[2].result, Err(FactFinderError::SourceUnavailable { .. })));
        assert!(matches!(outcomes[3].result, Err(FactFinderError::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn adapter_facts_collapse_to_latest_per_topic() {
        let adapters = vec![adapter(
            "multi",
            Behavior::Facts(vec![
                (Topic::Turnover, 100, Some(2022)),
                (Topic::Turnover, 120, Some(2024)),
                (Topic::Turnover, 130, Some(2024)),
                (Topic::Assets, 5, None),
            ]),
        )];

        let outcomes = FetchOrchestrator::new(Duration::from_secs(1))
            .fetch_all(&Entity::new("E1", "Acme"), &adapters)
            .await;
        let set = outcomes[0].facts().unwrap();
        assert_eq!(set.get(Topic::Turnover).unwrap().value, FactValue::Integer(120));
        assert!(set.contains(Topic::Assets));
    }
}
