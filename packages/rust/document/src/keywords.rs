//! Topic keyword patterns used to score document pages.

use regex::{Regex, RegexBuilder};

use factfinder_shared::{FactFinderError, Result, Topic};

/// Topic → page pattern. Topics without an entry never match a page.
#[derive(Debug, Clone)]
pub struct KeywordTable {
    entries: Vec<(Topic, Regex)>,
}

impl KeywordTable {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Add or replace the pattern for `topic`. Matching is case-insensitive.
    pub fn with_pattern(mut self, topic: Topic, pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| FactFinderError::config(format!("invalid keyword pattern for {topic}: {e}")))?;
        self.entries.retain(|(t, _)| *t != topic);
        self.entries.push((topic, regex));
        Ok(self)
    }

    pub fn pattern(&self, topic: Topic) -> Option<&Regex> {
        self.entries.iter().find(|(t, _)| *t == topic).map(|(_, r)| r)
    }

    /// Whether `text` mentions `topic`.
    pub fn matches(&self, topic: Topic, text: &str) -> bool {
        self.pattern(topic).is_some_and(|r| r.is_match(text))
    }
}

impl Default for KeywordTable {
    /// Annual-report vocabulary for the financial topics.
    fn default() -> Self {
        let entries = [
            (Topic::Turnover, r"\b(revenue|total\s+sales|turnover)\b"),
            (Topic::Assets, r"\b(total\s+assets|assets)\b"),
            (Topic::Employees, r"\bemployees\b"),
        ];
        Self {
            entries: entries
                .into_iter()
                .map(|(topic, pattern)| {
                    let regex = RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .expect("valid regex");
                    (topic, regex)
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vocabulary() {
        let table = KeywordTable::default();
        assert!(table.matches(Topic::Turnover, "Group REVENUE rose"));
        assert!(table.matches(Topic::Turnover, "Total   sales"));
        assert!(table.matches(Topic::Assets, "Total assets"));
        assert!(!table.matches(Topic::Assets, "assetsmanagement"));
        assert!(table.matches(Topic::Employees, "Number of employees"));
        assert!(!table.matches(Topic::Country, "France"));
    }

    #[test]
    fn custom_pattern_replaces_default() {
        let table = KeywordTable::default().with_pattern(Topic::Employees, r"\bheadcount\b").unwrap();
        assert!(table.matches(Topic::Employees, "Headcount at year end"));
        assert!(!table.matches(Topic::Employees, "employees"));
        assert!(KeywordTable::empty().with_pattern(Topic::Website, "(").is_err());
    }
}
