//! Keyword-ranked page selection under per-topic coverage limits.
//!
//! The selection is built in two passes:
//! 1. **Greedy fill** over pages ranked by (distinct topics matched desc, page asc),
//!    taking a page while some topic it matches is below `max_pages_per_topic`,
//!    until `max_total_pages` pages are taken.
//! 2. **Backfill** of every requested topic still below `min_pages_per_topic`
//!    from the remaining ranked pages that match it. This pass ignores the
//!    global cap.
//!
//! The result is returned in reading order.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use factfinder_shared::{DocumentConfig, Topic};

use crate::document::Document;
use crate::keywords::KeywordTable;

/// Page budget for one extraction call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionLimits {
    pub max_total_pages: usize,
    pub max_pages_per_topic: usize,
    pub min_pages_per_topic: usize,
}

impl Default for SelectionLimits {
    fn default() -> Self {
        Self::from(&DocumentConfig::default())
    }
}

impl From<&DocumentConfig> for SelectionLimits {
    fn from(config: &DocumentConfig) -> Self {
        Self {
            max_total_pages: config.max_total_pages,
            max_pages_per_topic: config.max_pages_per_topic,
            min_pages_per_topic: config.min_pages_per_topic,
        }
    }
}

/// A page that mentions at least one requested topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCandidate {
    /// 1-based.
    pub page_number: usize,
    pub text: String,
    pub matched_topics: BTreeSet<Topic>,
    pub match_count: usize,
}

/// Selected pages in ascending page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentSelection {
    pages: Vec<PageCandidate>,
}

impl DocumentSelection {
    pub fn pages(&self) -> &[PageCandidate] {
        &self.pages
    }

    pub fn page_numbers(&self) -> Vec<usize> {
        self.pages.iter().map(|p| p.page_number).collect()
    }

    /// How many selected pages match `topic`.
    pub fn coverage(&self, topic: Topic) -> usize {
        self.pages.iter().filter(|p| p.matched_topics.contains(&topic)).count()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageSelector {
    keywords: KeywordTable,
    limits: SelectionLimits,
}

impl PageSelector {
    pub fn new(keywords: KeywordTable, limits: SelectionLimits) -> Self {
        Self { keywords, limits }
    }

    pub fn from_config(config: &DocumentConfig) -> Self {
        Self::new(KeywordTable::default(), SelectionLimits::from(config))
    }

    pub fn limits(&self) -> SelectionLimits {
        self.limits
    }

    /// Every page matching at least one requested topic, in page order.
    pub fn score(&self, document: &Document, topics: &BTreeSet<Topic>) -> Vec<PageCandidate> {
        document
            .pages()
            .filter_map(|(page_number, text)| {
                let matched_topics: BTreeSet<Topic> = topics
                    .iter()
                    .copied()
                    .filter(|topic| self.keywords.matches(*topic, text))
                    .collect();
                (!matched_topics.is_empty()).then(|| PageCandidate {
                    page_number,
                    text: text.to_string(),
                    match_count: matched_topics.len(),
                    matched_topics,
                })
            })
            .collect()
    }

    pub fn select(&self, document: &Document, topics: &BTreeSet<Topic>) -> DocumentSelection {
        let mut ranked = self.score(document, topics);
        ranked.sort_by(|a, b| {
            b.match_count
                .cmp(&a.match_count)
                .then(a.page_number.cmp(&b.page_number))
        });

        let mut chosen = vec![false; ranked.len()];
        let mut coverage: BTreeMap<Topic, usize> = BTreeMap::new();
        let mut taken = 0;

        for (i, page) in ranked.iter().enumerate() {
            if taken >= self.limits.max_total_pages {
                break;
            }
            let useful = page
                .matched_topics
                .iter()
                .any(|t| coverage.get(t).copied().unwrap_or(0) < self.limits.max_pages_per_topic);
            if useful {
                chosen[i] = true;
                taken += 1;
                for topic in &page.matched_topics {
                    *coverage.entry(*topic).or_default() += 1;
                }
            }
        }

        for topic in topics {
            let mut covered = coverage.get(topic).copied().unwrap_or(0);
            for (i, page) in ranked.iter().enumerate() {
                if covered >= self.limits.min_pages_per_topic {
                    break;
                }
                if chosen[i] || !page.matched_topics.contains(topic) {
                    continue;
                }
                chosen[i] = true;
                covered += 1;
            }
            if covered < self.limits.min_pages_per_topic {
                debug!(topic = %topic, covered, "topic under-covered");
            }
            coverage.insert(*topic, covered);
        }

        let mut pages: Vec<PageCandidate> = ranked
            .into_iter()
            .zip(chosen)
            .filter_map(|(page, keep)| keep.then_some(page))
            .collect();
        pages.sort_by_key(|p| p.page_number);

        debug!(
            selected = pages.len(),
            pages = ?pages.iter().map(|p| p.page_number).collect::<Vec<_>>(),
            "pages selected"
        );
        DocumentSelection { pages }
    }
}

/// Render selected pages as extraction context: a `--- Page N ---` header
/// and the page text, blocks separated by blank lines.
pub fn format_for_prompt(selection: &DocumentSelection) -> String {
    selection
        .pages()
        .iter()
        .flat_map(|page| [format!("--- Page {} ---", page.page_number), page.text.trim().to_string()])
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(list: &[Topic]) -> BTreeSet<Topic> {
        list.iter().copied().collect()
    }

    /// A document of `len` pages where `marks` assigns text to chosen pages.
    fn document(len: usize, marks: &[(usize, &str)]) -> Document {
        let pages = (1..=len).map(|n| {
            marks
                .iter()
                .find(|(page, _)| *page == n)
                .map(|(_, text)| text.to_string())
                .unwrap_or_else(|| format!("Chairman's letter, page {n}"))
        });
        Document::from_pages(pages)
    }

    #[test]
    fn under_covered_topic_without_more_pages() {
        let doc = document(
            20,
            &[
                (3, "Group revenue grew"),
                (5, "Revenue per employees: 12 employees"),
                (7, "Turnover by region"),
            ],
        );
        let selection = PageSelector::default().select(&doc, &topics(&[Topic::Turnover, Topic::Employees]));
        assert_eq!(selection.page_numbers(), vec![3, 5, 7]);
        assert_eq!(selection.coverage(Topic::Employees), 1);
    }

    #[test]
    fn best_pages_rank_first_and_output_is_sorted() {
        let doc = document(
            6,
            &[(2, "revenue"), (4, "revenue and total assets and employees"), (6, "assets")],
        );
        let selector = PageSelector::new(
            KeywordTable::default(),
            SelectionLimits {
                max_total_pages: 2,
                max_pages_per_topic: 5,
                min_pages_per_topic: 0,
            },
        );
        let requested = topics(&[Topic::Turnover, Topic::Assets, Topic::Employees]);
        let candidates = selector.score(&doc, &requested);
        assert_eq!(candidates.iter().find(|c| c.page_number == 4).unwrap().match_count, 3);

        // Page 4 ranks first, then page 2 by page order.
        assert_eq!(selector.select(&doc, &requested).page_numbers(), vec![2, 4]);
    }

    #[test]
    fn per_topic_maximum_limits_fill() {
        let marks: Vec<(usize, &str)> = (1..=30).map(|n| (n, "revenue")).collect();
        let doc = document(30, &marks);
        let selection = PageSelector::default().select(&doc, &topics(&[Topic::Turnover]));
        assert_eq!(selection.page_numbers(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn global_cap_stops_the_fill() {
        let marks: Vec<(usize, &str)> = (1..=12)
            .map(|n| match n {
                1..=4 => (n, "revenue"),
                5..=8 => (n, "total assets"),
                _ => (n, "employees"),
            })
            .collect();
        let doc = document(12, &marks);
        let selection = PageSelector::default()
            .select(&doc, &topics(&[Topic::Turnover, Topic::Assets, Topic::Employees]));
        assert_eq!(selection.page_numbers(), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn backfill_may_exceed_global_cap() {
        let mut marks: Vec<(usize, &str)> = (1..=12).map(|n| (n, "revenue and assets")).collect();
        marks.push((15, "employees"));
        marks.push((16, "employees"));
        let doc = document(20, &marks);
        let selector = PageSelector::new(
            KeywordTable::default(),
            SelectionLimits {
                max_total_pages: 3,
                max_pages_per_topic: 5,
                min_pages_per_topic: 2,
            },
        );
        let selection = selector.select(&doc, &topics(&[Topic::Turnover, Topic::Assets, Topic::Employees]));
        assert_eq!(selection.page_numbers(), vec![1, 2, 3, 15, 16]);
        assert!(selection.len() > 3);
        assert_eq!(selection.coverage(Topic::Employees), 2);
    }

    #[test]
    fn saturated_topics_stop_the_fill() {
        // Six pages match only turnover; once five are taken the sixth adds nothing.
        let marks: Vec<(usize, &str)> = (1..=6).map(|n| (n, "turnover")).collect();
        let doc = document(8, &marks);
        let selection = PageSelector::default().select(&doc, &topics(&[Topic::Turnover]));
        assert_eq!(selection.len(), 5);
    }

    #[test]
    fn no_matches_is_an_empty_selection() {
        let doc = document(5, &[]);
        let selection = PageSelector::default().select(&doc, &topics(&[Topic::Turnover, Topic::Country]));
        assert!(selection.is_empty());
        assert_eq!(format_for_prompt(&selection), "");
    }

    #[test]
    fn prompt_format() {
        let doc = document(4, &[(2, "Revenue 10"), (4, "Employees 3")]);
        let selection = PageSelector::default().select(&doc, &topics(&[Topic::Turnover, Topic::Employees]));
        assert_eq!(
            format_for_prompt(&selection),
            "--- Page 2 ---\n\nRevenue 10\n\n--- Page 4 ---\n\nEmployees 3"
        );
    }
}
