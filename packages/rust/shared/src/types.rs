//! Core domain types: entities, topics, facts and fact sets.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// The business being profiled. Immutable input to every operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// Opaque identifier supplied by the caller.
    pub id: String,
    /// Display name used for every lookup.
    pub name: String,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

/// One category of fact about an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    Country,
    Employees,
    Turnover,
    Assets,
    Website,
    Activity,
}

impl Topic {
    /// Every topic, in reporting order.
    pub const ALL: [Topic; 6] = [
        Topic::Country,
        Topic::Employees,
        Topic::Turnover,
        Topic::Assets,
        Topic::Website,
        Topic::Activity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "COUNTRY",
            Self::Employees => "EMPLOYEES",
            Self::Turnover => "TURNOVER",
            Self::Assets => "ASSETS",
            Self::Website => "WEBSITE",
            Self::Activity => "ACTIVITY",
        }
    }

    /// Monetary topics carry a currency; the others use the `N/A` sentinel.
    pub fn is_monetary(&self) -> bool {
        matches!(self, Self::Turnover | Self::Assets)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown topic: {s}"))
    }
}

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// Which kind of source produced a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    WebSearch,
    Encyclopedia,
    KnowledgeGraph,
    Financial,
    Register,
    Document,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::Encyclopedia => "encyclopedia",
            Self::KnowledgeGraph => "knowledge_graph",
            Self::Financial => "financial",
            Self::Register => "register",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fact values
// ---------------------------------------------------------------------------

/// Topic-typed value of a fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FactValue {
    /// Free text (e.g. an activity description).
    Text(String),
    /// Counts and monetary amounts.
    Integer(i64),
    /// Normalized codes: ISO country, NACE activity, website domain.
    Code(String),
}

impl FactValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Code(s) => Some(s),
            Self::Integer(_) => None,
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) | Self::Code(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{n}"),
        }
    }
}

/// ISO 4217 currency code, or the "not applicable" sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Currency {
    Iso(String),
    NotApplicable,
}

/// Serialized form of [`Currency::NotApplicable`].
pub const NOT_APPLICABLE: &str = "N/A";

impl Currency {
    /// Accepts a three-letter code (any case). Anything else is rejected.
    pub fn iso(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Self::Iso(code.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Iso(code) => code,
            Self::NotApplicable => NOT_APPLICABLE,
        }
    }
}

impl Serialize for Currency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == NOT_APPLICABLE {
            return Ok(Self::NotApplicable);
        }
        Self::iso(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid currency: {raw}")))
    }
}

// ---------------------------------------------------------------------------
// Fact
// ---------------------------------------------------------------------------

/// A single valued, dated, sourced observation about an entity/topic pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub entity_id: String,
    pub topic: Topic,
    pub value: FactValue,
    /// Reporting year, when the source states one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub source: SourceKind,
}

impl Fact {
    /// Build a fact with the currency defaulted from the topic:
    /// `None` for monetary topics (caller sets it), `N/A` for the rest.
    pub fn new(entity: &Entity, topic: Topic, value: FactValue, source: SourceKind) -> Self {
        Self {
            entity_id: entity.id.clone(),
            topic,
            value,
            year: None,
            currency: (!topic.is_monetary()).then_some(Currency::NotApplicable),
            source_url: None,
            source,
        }
    }

    pub fn with_year(mut self, year: Option<i32>) -> Self {
        self.year = year;
        self
    }

    pub fn with_currency(mut self, currency: Option<Currency>) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_source_url(mut self, url: Option<String>) -> Self {
        self.source_url = url;
        self
    }
}

// ---------------------------------------------------------------------------
// FactSet
// ---------------------------------------------------------------------------

/// At most one current fact per topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactSet {
    facts: BTreeMap<Topic, Fact>,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fact, replacing whatever was stored for its topic.
    pub fn insert(&mut self, fact: Fact) -> Option<Fact> {
        self.facts.insert(fact.topic, fact)
    }

    pub fn get(&self, topic: Topic) -> Option<&Fact> {
        self.facts.get(&topic)
    }

    pub fn get_mut(&mut self, topic: Topic) -> Option<&mut Fact> {
        self.facts.get_mut(&topic)
    }

    pub fn remove(&mut self, topic: Topic) -> Option<Fact> {
        self.facts.remove(&topic)
    }

    pub fn contains(&self, topic: Topic) -> bool {
        self.facts.contains_key(&topic)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn topics(&self) -> impl Iterator<Item = Topic> + '_ {
        self.facts.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }

    pub fn into_facts(self) -> Vec<Fact> {
        self.facts.into_values().collect()
    }

    /// Keep `fact` only if it is more recent than the stored one for its
    /// topic. Dated facts beat undated ones; ties keep what is stored.
    /// Returns whether the set changed.
    pub fn offer_latest(&mut self, fact: Fact) -> bool {
        match self.facts.get(&fact.topic) {
            Some(current) if !is_newer(&fact, current) => false,
            _ => {
                self.facts.insert(fact.topic, fact);
                true
            }
        }
    }

    /// Collapse a list of facts to the latest one per topic, first-seen on ties.
    pub fn latest_of(facts: impl IntoIterator<Item = Fact>) -> Self {
        let mut set = Self::new();
        for fact in facts {
            set.offer_latest(fact);
        }
        set
    }
}

/// Strict recency: a year beats no year, a greater year beats a smaller one.
pub fn is_newer(candidate: &Fact, current: &Fact) -> bool {
    match (candidate.year, current.year) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

impl FromIterator<Fact> for FactSet {
    fn from_iter<I: IntoIterator<Item = Fact>>(iter: I) -> Self {
        Self::latest_of(iter)
    }
}

impl IntoIterator for FactSet {
    type Item = Fact;
    type IntoIter = std::collections::btree_map::IntoValues<Topic, Fact>;

    fn into_iter(self) -> Self::IntoIter {
        self.facts.into_values()
    }
}

// ---------------------------------------------------------------------------
// ReportLocation
// ---------------------------------------------------------------------------

/// Where an entity's annual report lives and which fiscal year it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLocation {
    pub url: String,
    pub year: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> Entity {
        Entity::new("E1", "ACME")
    }

    #[test]
    fn topic_parses_case_insensitively() {
        assert_eq!("turnover".parse::<Topic>().unwrap(), Topic::Turnover);
        assert_eq!(" EMPLOYEES ".parse::<Topic>().unwrap(), Topic::Employees);
        assert!("profit".parse::<Topic>().is_err());
    }

    #[test]
    fn fact_defaults_currency_by_topic() {
        let country = Fact::new(&acme(), Topic::Country, FactValue::Code("FR".into()), SourceKind::Register);
        assert_eq!(country.currency, Some(Currency::NotApplicable));

        let turnover = Fact::new(&acme(), Topic::Turnover, FactValue::Integer(10), SourceKind::Financial);
        assert_eq!(turnover.currency, None);
    }

    #[test]
    fn currency_serializes_sentinel() {
        let json = serde_json::to_string(&Currency::NotApplicable).unwrap();
        assert_eq!(json, r#""N/A""#);
        let eur: Currency = serde_json::from_str(r#""eur""#).unwrap();
        assert_eq!(eur, Currency::Iso("EUR".into()));
        assert!(serde_json::from_str::<Currency>(r#""euro""#).is_err());
    }

    #[test]
    fn fact_set_keeps_one_fact_per_topic() {
        let mut set = FactSet::new();
        set.insert(Fact::new(&acme(), Topic::Employees, FactValue::Integer(1), SourceKind::Financial));
        let replaced = set.insert(Fact::new(&acme(), Topic::Employees, FactValue::Integer(2), SourceKind::Encyclopedia));
        assert!(replaced.is_some());
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(Topic::Employees).unwrap().value, FactValue::Integer(2));
    }

    #[test]
    fn latest_of_prefers_dated_and_first_seen() {
        let e = acme();
        let undated = Fact::new(&e, Topic::Employees, FactValue::Integer(1), SourceKind::Financial);
        let first = Fact::new(&e, Topic::Employees, FactValue::Integer(2), SourceKind::Financial).with_year(Some(2022));
        let tie = Fact::new(&e, Topic::Employees, FactValue::Integer(3), SourceKind::Financial).with_year(Some(2022));
        let set = FactSet::latest_of([undated, first, tie]);
        assert_eq!(set.get(Topic::Employees).unwrap().value, FactValue::Integer(2));
    }

    #[test]
    fn fact_set_serializes_as_topic_map() {
        let mut set = FactSet::new();
        set.insert(
            Fact::new(&acme(), Topic::Turnover, FactValue::Integer(120), SourceKind::Financial)
                .with_year(Some(2024))
                .with_currency(Currency::iso("USD")),
        );
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["TURNOVER"]["year"], 2024);
        assert_eq!(json["TURNOVER"]["currency"], "USD");
        assert_eq!(json["TURNOVER"]["value"]["value"], 120);
    }
}
