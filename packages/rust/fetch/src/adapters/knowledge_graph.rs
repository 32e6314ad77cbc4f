//! Knowledge-graph adapter (Wikidata): dated statements on the entity's item.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use factfinder_shared::normalize::{country_code, website_domain};
use factfinder_shared::{
    Currency, Entity, Fact, FactFinderError, FactValue, FetchConfig, Result, SourceKind, Topic,
};

use super::SourceAdapter;
use crate::client::SourceClient;

const API_URL: &str = "https://en.wikipedia.org/w/api.php";
const ENTITY_URL: &str = "https://www.wikidata.org/wiki/Special:EntityData";
const ITEM_PAGE_URL: &str = "https://www.wikidata.org/wiki/";

const COUNTRY: &str = "P17";
const WEBSITE: &str = "P856";
const EMPLOYEES: &str = "P1128";
const REVENUE: &str = "P2139";
const ASSETS: &str = "P2403";
const POINT_IN_TIME: &str = "P585";
const ISO_ALPHA2: &str = "P297";
const ISO_4217: &str = "P498";

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PagePropsResponse {
    query: Option<PagePropsQuery>,
}

#[derive(Debug, Deserialize)]
struct PagePropsQuery {
    #[serde(default)]
    pages: Vec<PageProps>,
}

#[derive(Debug, Deserialize)]
struct PageProps {
    #[serde(default)]
    pageprops: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct EntityData {
    #[serde(default)]
    entities: BTreeMap<String, ItemDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemDoc {
    #[serde(default)]
    claims: BTreeMap<String, Vec<Claim>>,
}

#[derive(Debug, Deserialize)]
struct Claim {
    mainsnak: Snak,
    #[serde(default)]
    qualifiers: BTreeMap<String, Vec<Snak>>,
}

#[derive(Debug, Deserialize)]
struct Snak {
    datavalue: Option<DataValue>,
}

#[derive(Debug, Deserialize)]
struct DataValue {
    value: Value,
}

impl Claim {
    fn value(&self) -> Option<&Value> {
        self.mainsnak.datavalue.as_ref().map(|dv| &dv.value)
    }

    /// Year of the `point in time` qualifier, e.g. `+2023-00-00T00:00:00Z`.
    fn year(&self) -> Option<i32> {
        let time = self
            .qualifiers
            .get(POINT_IN_TIME)?
            .first()?
            .datavalue
            .as_ref()?
            .value
            .get("time")?
            .as_str()?;
        time.trim_start_matches(['+', '-']).get(..4)?.parse().ok()
    }
}

impl ItemDoc {
    fn first_value(&self, property: &str) -> Option<&Value> {
        self.claims.get(property)?.iter().find_map(Claim::value)
    }

    fn first_string(&self, property: &str) -> Option<&str> {
        self.first_value(property)?.as_str()
    }

    fn first_item_id(&self, property: &str) -> Option<&str> {
        self.first_value(property)?.get("id")?.as_str()
    }

    /// Latest dated quantity statement, or the first one when none is dated.
    fn latest_quantity(&self, property: &str) -> Option<Quantity> {
        let claims = self.claims.get(property)?;
        let chosen = claims
            .iter()
            .filter(|c| c.year().is_some())
            .max_by_key(|c| c.year())
            .or_else(|| claims.first())?;

        let value = chosen.value()?;
        let amount: f64 = value.get("amount")?.as_str()?.trim_start_matches('+').parse().ok()?;
        let unit = value
            .get("unit")
            .and_then(Value::as_str)
            .and_then(|u| u.rsplit('/').next())
            .filter(|u| u.starts_with('Q'))
            .map(String::from);

        Some(Quantity {
            amount: amount.round() as i64,
            year: chosen.year(),
            unit,
        })
    }
}

#[derive(Debug)]
struct Quantity {
    amount: i64,
    year: Option<i32>,
    unit: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Reads statements from the entity's knowledge-graph item. Single attempt
/// per request; a failure drops the source for this entity.
pub struct KnowledgeGraphAdapter {
    client: Arc<SourceClient>,
    api_url: String,
    entity_url: String,
    reference_year: i32,
}

impl KnowledgeGraphAdapter {
    pub fn new(config: &FetchConfig, reference_year: i32) -> Result<Self> {
        let client = SourceClient::new("knowledge_graph", config)?;
        Ok(Self::with_client(Arc::new(client), reference_year))
    }

    /// Share `client` (and its gate) with other adapters on the same host.
    pub fn with_client(client: Arc<SourceClient>, reference_year: i32) -> Self {
        Self {
            client,
            api_url: API_URL.to_string(),
            entity_url: ENTITY_URL.to_string(),
            reference_year,
        }
    }

    pub fn with_endpoints(mut self, api_url: impl Into<String>, entity_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self.entity_url = entity_url.into();
        self
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        self.client
            .get_json(url, query, self.client.default_user_agent())
            .await
    }

    async fn find_item_id(&self, name: &str) -> Result<String> {
        let response: PagePropsResponse = self
            .get(
                &self.api_url,
                &[
                    ("action", "query"),
                    ("generator", "search"),
                    ("gsrsearch", name),
                    ("gsrlimit", "1"),
                    ("prop", "pageprops"),
                    ("ppprop", "wikibase_item"),
                    ("format", "json"),
                    ("formatversion", "2"),
                ],
            )
            .await?;

        response
            .query
            .into_iter()
            .flat_map(|q| q.pages)
            .find_map(|mut page| page.pageprops.remove("wikibase_item"))
            .ok_or_else(|| FactFinderError::no_candidate(self.name(), name))
    }

    async fn fetch_item(&self, id: &str) -> Result<ItemDoc> {
        let url = format!("{}/{id}.json", self.entity_url);
        let data: EntityData = self.get(&url, &[]).await?;
        // A redirected item comes back under its new id.
        Ok(data.entities.into_values().next().unwrap_or_default())
    }

    /// A string statement on another item, such as a country's ISO code.
    async fn linked_string(&self, id: &str, property: &str) -> Option<String> {
        match self.fetch_item(id).await {
            Ok(item) => item.first_string(property).map(String::from),
            Err(e) => {
                debug!(id, property, error = %e, "linked item lookup failed");
                None
            }
        }
    }

    async fn currency_of(&self, quantity: &Quantity) -> Option<Currency> {
        let unit = quantity.unit.as_deref()?;
        self.linked_string(unit, ISO_4217).await.as_deref().and_then(Currency::iso)
    }
}

#[async_trait]
impl SourceAdapter for KnowledgeGraphAdapter {
    fn name(&self) -> &str {
        "knowledge_graph"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::KnowledgeGraph
    }

    #[instrument(skip_all, fields(entity = %entity.name))]
    async fn resolve(&self, entity: &Entity) -> Result<Vec<Fact>> {
        let item_id = self.find_item_id(&entity.name).await?;
        let item = self.fetch_item(&item_id).await?;
        let page_url = Some(format!("{ITEM_PAGE_URL}{item_id}"));
        let mut facts = Vec::new();

        if let Some(country_id) = item.first_item_id(COUNTRY) {
            let code = self.linked_string(country_id, ISO_ALPHA2).await;
            if let Some(code) = code.as_deref().and_then(country_code) {
                facts.push(
                    Fact::new(entity, Topic::Country, FactValue::Code(code.into()), self.kind())
                        .with_year(Some(self.reference_year)),
                );
            }
        }

        if let Some(domain) = item.first_string(WEBSITE).and_then(website_domain) {
            facts.push(
                Fact::new(entity, Topic::Website, FactValue::Code(domain), self.kind())
                    .with_year(Some(self.reference_year)),
            );
        }

        for (topic, property) in [(Topic::Employees, EMPLOYEES), (Topic::Turnover, REVENUE), (Topic::Assets, ASSETS)] {
            let Some(quantity) = item.latest_quantity(property) else { continue };
            let mut fact = Fact::new(entity, topic, FactValue::Integer(quantity.amount), self.kind())
                .with_year(quantity.year);
            if topic.is_monetary() {
                fact = fact.with_currency(self.currency_of(&quantity).await);
            }
            facts.push(fact);
        }

        debug!(%item_id, facts = facts.len(), "item statements read");
        Ok(facts
            .into_iter()
            .map(|f| f.with_source_url(page_url.clone()))
            .collect())
    }
}
