//! Per-topic merging of candidate facts from several sources.
//!
//! Rules, per topic:
//! 1. a topic absent from every input stays absent;
//! 2. a topic present in one input is taken as-is;
//! 3. otherwise the strictly greatest year wins, a dated fact beats an undated
//!    one, and ties go to the earliest input;
//! 4. for EMPLOYEES, an encyclopedia fact dated at or after the latest valid
//!    year beats every other candidate (rule 3 applies among several such).

use tracing::debug;

use factfinder_shared::{Fact, FactSet, ReconciliationConfig, SourceKind, Topic, is_newer};

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    latest_valid_year: i32,
    encyclopedia_headcount_precedence: bool,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::from_config(&ReconciliationConfig::default())
    }
}

impl ReconciliationEngine {
    pub fn new(latest_valid_year: i32, encyclopedia_headcount_precedence: bool) -> Self {
        Self {
            latest_valid_year,
            encyclopedia_headcount_precedence,
        }
    }

    pub fn from_config(config: &ReconciliationConfig) -> Self {
        Self::new(config.latest_valid_year, config.encyclopedia_headcount_precedence)
    }

    /// Merge fact sets into one current-best fact per topic. Input order is
    /// the tie-break order.
    pub fn merge(&self, fact_sets: &[FactSet]) -> FactSet {
        let mut merged = FactSet::new();
        for topic in Topic::ALL {
            let candidates: Vec<&Fact> = fact_sets.iter().filter_map(|set| set.get(topic)).collect();
            if let Some(best) = self.pick(topic, &candidates) {
                if candidates.len() > 1 {
                    debug!(
                        topic = %topic,
                        candidates = candidates.len(),
                        source = %best.source,
                        year = ?best.year,
                        "topic reconciled"
                    );
                }
                merged.insert(best.clone());
            }
        }
        merged
    }

    /// Collapse facts to the latest per topic, first-seen on ties.
    pub fn keep_latest_per_topic(&self, facts: Vec<Fact>) -> FactSet {
        FactSet::latest_of(facts)
    }

    fn pick<'a>(&self, topic: Topic, candidates: &[&'a Fact]) -> Option<&'a Fact> {
        if topic == Topic::Employees && self.encyclopedia_headcount_precedence {
            let privileged: Vec<&Fact> = candidates
                .iter()
                .copied()
                .filter(|f| f.source == SourceKind::Encyclopedia && f.year.is_some_and(|y| y >= self.latest_valid_year))
                .collect();
            if let Some(fact) = latest(&privileged) {
                return Some(fact);
            }
        }
        latest(candidates)
    }
}

fn latest<'a>(candidates: &[&'a Fact]) -> Option<&'a Fact> {
    candidates.iter().copied().fold(None, |best, fact| match best {
        Some(current) if !is_newer(fact, current) => Some(current),
        _ => Some(fact),
    })
}
