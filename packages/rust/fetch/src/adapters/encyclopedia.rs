//! Encyclopedia adapter (Wikipedia): company infobox facts.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::{debug, instrument};

use factfinder_shared::normalize::{country_code, detect_currency, website_domain};
use factfinder_shared::{
    Currency, Entity, Fact, FactFinderError, FactValue, FetchConfig, Result, SourceKind, Topic,
};

use super::SourceAdapter;
use super::text::{extract_year, parse_amount};
use crate::client::SourceClient;
use crate::retry::RetryingFetcher;

const API_URL: &str = "https://en.wikipedia.org/w/api.php";
const PAGE_URL: &str = "https://en.wikipedia.org/wiki/";

const COUNTRY_KEYS: &[&str] = &["hq_location_country", "location_country", "location", "hq_location", "hq_city"];
const EMPLOYEE_KEYS: &[&str] = &["num_employees"];
const REVENUE_KEYS: &[&str] = &["revenue"];
const ASSET_KEYS: &[&str] = &["assets"];
const WEBSITE_KEYS: &[&str] = &["website", "homepage", "url"];
const INDUSTRY_KEYS: &[&str] = &["industry"];

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    parse: Option<ParsedPage>,
}

#[derive(Debug, Deserialize)]
struct ParsedPage {
    title: String,
    #[serde(default)]
    wikitext: String,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Reads the company infobox of the entity's encyclopedia article.
pub struct EncyclopediaAdapter {
    client: Arc<SourceClient>,
    api_url: String,
    reference_year: i32,
}

impl EncyclopediaAdapter {
    /// `reference_year` dates the descriptive facts (country, website,
    /// activity) the infobox states without a year.
    pub fn new(config: &FetchConfig, reference_year: i32) -> Result<Self> {
        let client = SourceClient::new("encyclopedia", config)?;
        Ok(Self::with_client(Arc::new(client), reference_year))
    }

    /// Share `client` (and its gate) with other adapters on the same host.
    pub fn with_client(client: Arc<SourceClient>, reference_year: i32) -> Self {
        Self {
            client,
            api_url: API_URL.to_string(),
            reference_year,
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    async fn find_title(&self, name: &str) -> Result<String> {
        let response: SearchResponse = RetryingFetcher::new(&self.client)
            .resolve("title search", |ua| async move {
                self.client
                    .get_json(
                        &self.api_url,
                        &[
                            ("action", "query"),
                            ("list", "search"),
                            ("srsearch", name),
                            ("srlimit", "1"),
                            ("format", "json"),
                        ],
                        &ua,
                    )
                    .await
            })
            .await?;

        response
            .query
            .and_then(|q| q.search.into_iter().next())
            .map(|entry| entry.title)
            .ok_or_else(|| FactFinderError::no_candidate(self.name(), name))
    }

    async fn fetch_wikitext(&self, title: &str) -> Result<ParsedPage> {
        let response: ParseResponse = RetryingFetcher::new(&self.client)
            .resolve("wikitext", |ua| async move {
                self.client
                    .get_json(
                        &self.api_url,
                        &[
                            ("action", "parse"),
                            ("page", title),
                            ("prop", "wikitext"),
                            ("redirects", "1"),
                            ("format", "json"),
                            ("formatversion", "2"),
                        ],
                        &ua,
                    )
                    .await
            })
            .await?;

        response
            .parse
            .ok_or_else(|| FactFinderError::no_candidate(self.name(), title))
    }

    fn facts_from_infobox(&self, entity: &Entity, infobox: &Infobox, page_url: &str) -> Vec<Fact> {
        let mut facts = Vec::new();
        let stamp = |fact: Fact| fact.with_source_url(Some(page_url.to_string()));

        if let Some(code) = infobox
            .field(COUNTRY_KEYS)
            .and_then(|loc| loc.rsplit(',').next())
            .and_then(country_code)
        {
            facts.push(stamp(
                Fact::new(entity, Topic::Country, FactValue::Code(code.into()), self.kind())
                    .with_year(Some(self.reference_year)),
            ));
        }

        if let Some(domain) = infobox.field(WEBSITE_KEYS).and_then(website_domain) {
            facts.push(stamp(
                Fact::new(entity, Topic::Website, FactValue::Code(domain), self.kind())
                    .with_year(Some(self.reference_year)),
            ));
        }

        if let Some(industry) = infobox.field(INDUSTRY_KEYS).filter(|s| !s.is_empty()) {
            facts.push(stamp(
                Fact::new(entity, Topic::Activity, FactValue::Text(industry.to_string()), self.kind())
                    .with_year(Some(self.reference_year)),
            ));
        }

        for (topic, keys, year_key) in [
            (Topic::Employees, EMPLOYEE_KEYS, "num_employees_year"),
            (Topic::Turnover, REVENUE_KEYS, "revenue_year"),
            (Topic::Assets, ASSET_KEYS, "assets_year"),
        ] {
            let Some(raw) = infobox.field(keys) else { continue };
            let Some(amount) = parse_amount(raw) else {
                debug!(topic = %topic, raw, "unparsable infobox amount");
                continue;
            };
            let year = infobox
                .field(&[year_key])
                .and_then(extract_year)
                .or_else(|| extract_year(raw));

            let mut fact = Fact::new(entity, topic, FactValue::Integer(amount), self.kind()).with_year(year);
            if topic.is_monetary() {
                fact = fact.with_currency(detect_currency(raw).and_then(Currency::iso));
            }
            facts.push(stamp(fact));
        }

        facts
    }
}

#[async_trait]
impl SourceAdapter for EncyclopediaAdapter {
    fn name(&self) -> &str {
        "encyclopedia"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Encyclopedia
    }

    #[instrument(skip_all, fields(entity = %entity.name))]
    async fn resolve(&self, entity: &Entity) -> Result<Vec<Fact>> {
        let title = self.find_title(&entity.name).await?;
        let page = self.fetch_wikitext(&title).await?;

        let Some(infobox) = Infobox::parse(&page.wikitext) else {
            debug!(%title, "article has no infobox");
            return Err(FactFinderError::no_candidate(self.name(), &entity.name));
        };

        let page_url = format!("{PAGE_URL}{}", page.title.replace(' ', "_"));
        let facts = self.facts_from_infobox(entity, &infobox, &page_url);
        debug!(%title, facts = facts.len(), "infobox parsed");
        Ok(facts)
    }
}

// ---------------------------------------------------------------------------
// Infobox parsing
// ---------------------------------------------------------------------------

/// Cleaned `key = value` fields of the first `{{Infobox ...}}` template.
#[derive(Debug, Clone, Default)]
pub struct Infobox {
    fields: BTreeMap<String, String>,
}

impl Infobox {
    pub fn parse(wikitext: &str) -> Option<Self> {
        let body = infobox_body(wikitext)?;
        let fields = split_top_level(body)
            .into_iter()
            .skip(1)
            .filter_map(|param| {
                let (key, value) = param.split_once('=')?;
                let value = clean_markup(value);
                (!value.is_empty()).then(|| (key.trim().to_lowercase(), value))
            })
            .collect();
        Some(Self { fields })
    }

    /// First non-empty value among `keys`, in order.
    pub fn field(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.fields.get(*k)).map(String::as_str)
    }
}

/// Text between the braces of the first infobox template.
fn infobox_body(wikitext: &str) -> Option<&str> {
    let start = wikitext.to_ascii_lowercase().find("{{infobox")?;
    let bytes = wikitext.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match &bytes[i..i + 2] {
            b"{{" => {
                depth += 1;
                i += 2;
            }
            b"}}" => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Some(&wikitext[start + 2..i - 2]);
                }
            }
            _ => i += 1,
        }
    }
    None
}

/// Split on `|` outside nested templates and links.
fn split_top_level(body: &str) -> Vec<&str> {
    let bytes = body.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut last = 0;
    let mut i = 0;
    while i < bytes.len() {
        let pair = bytes.get(i..i + 2);
        if matches!(pair, Some(b"{{") | Some(b"[[")) {
            depth += 1;
            i += 2;
        } else if matches!(pair, Some(b"}}") | Some(b"]]")) {
            depth -= 1;
            i += 2;
        } else {
            if bytes[i] == b'|' && depth == 0 {
                parts.push(&body[last..i]);
                last = i + 1;
            }
            i += 1;
        }
    }
    parts.push(&body[last..]);
    parts
}

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<ref[^>]*/>|<ref[^>]*>.*?</ref>").expect("valid regex"));
static BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("valid regex"));
static WIKILINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[(?:[^|\]]*\|)?([^\]]*)\]\]").expect("valid regex"));
static EXTLINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(https?://[^\s\]]+)[^\]]*\]").expect("valid regex"));
static NAMED_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[\w-]+\s*=").expect("valid regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Templates that only decorate a value.
const DROPPED_TEMPLATES: &[&str] = &[
    "cite web", "cite news", "cite book", "cite report", "increase", "decrease", "gain", "loss",
    "steady", "up", "down", "efn", "sfn", "refn", "flagicon",
];

/// Templates whose positional arguments are the value itself.
const TRANSPARENT_TEMPLATES: &[&str] = &[
    "nowrap", "nobr", "url", "plainlist", "plain list", "unbulleted list", "ubl", "flatlist",
    "hlist", "small", "abbr", "lang",
];

/// Strip wikitext markup down to readable text.
fn clean_markup(raw: &str) -> String {
    let mut text = COMMENT.replace_all(raw, "").into_owned();
    text = REF.replace_all(&text, "").into_owned();
    text = BREAK.replace_all(&text, ", ").into_owned();
    text = TAG.replace_all(&text, "").into_owned();

    // Innermost templates first until none remain.
    for _ in 0..16 {
        let next = TEMPLATE.replace_all(&text, |caps: &Captures| render_template(&caps[1])).into_owned();
        if next == text {
            break;
        }
        text = next;
    }

    text = WIKILINK.replace_all(&text, "$1").into_owned();
    text = EXTLINK.replace_all(&text, "$1").into_owned();
    let text = text.replace("'''", "").replace("''", "").replace("&nbsp;", " ");
    SPACES.replace_all(text.trim(), " ").into_owned()
}

fn render_template(inner: &str) -> String {
    let mut parts = inner.split('|');
    let name = parts.next().unwrap_or_default().trim();
    let lower = name.to_lowercase();
    if DROPPED_TEMPLATES.contains(&lower.as_str()) {
        return String::new();
    }

    let positional: Vec<&str> = parts
        .filter(|p| !NAMED_PARAM.is_match(p))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if lower == "nbsp" {
        " ".to_string()
    } else if TRANSPARENT_TEMPLATES.contains(&lower.as_str()) {
        if lower == "lang" {
            positional.get(1).copied().unwrap_or_default().to_string()
        } else {
            positional.join(", ")
        }
    } else {
        // Unit templates such as {{US$|394 billion}} keep their name.
        format!("{name} {}", positional.join(" "))
    }
}
