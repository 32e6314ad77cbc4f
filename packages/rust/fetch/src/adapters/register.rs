//! Government business-register adapter (French company directory).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use factfinder_shared::{Entity, Fact, FactFinderError, FactValue, FetchConfig, Result, SourceKind, Topic};

use super::SourceAdapter;
use crate::client::SourceClient;
use crate::retry::RetryingFetcher;

const API_URL: &str = "https://recherche-entreprises.api.gouv.fr/search";
const COMPANY_PAGE_URL: &str = "https://annuaire-entreprises.data.gouv.fr/entreprise/";

/// Only large enterprises are considered.
const CATEGORY_LARGE: &str = "GE";

#[derive(Debug, Deserialize)]
struct RegisterSearch {
    #[serde(default)]
    results: Vec<RegisteredCompany>,
}

#[derive(Debug, Deserialize)]
struct RegisteredCompany {
    siren: String,
    siege: Option<HeadOffice>,
}

#[derive(Debug, Deserialize)]
struct HeadOffice {
    activite_principale: Option<String>,
}

/// Looks the entity up among registered large enterprises. A match yields
/// the head office's activity code and the register's country.
pub struct RegisterAdapter {
    client: SourceClient,
    api_url: String,
    reference_year: i32,
}

impl RegisterAdapter {
    pub fn new(config: &FetchConfig, reference_year: i32) -> Result<Self> {
        Ok(Self {
            client: SourceClient::new("register", config)?,
            api_url: API_URL.to_string(),
            reference_year,
        })
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

/// Legal-form noise that hurts register matching.
fn search_name(name: &str) -> String {
    name.replace("S A", "").split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl SourceAdapter for RegisterAdapter {
    fn name(&self) -> &str {
        "register"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Register
    }

    #[instrument(skip_all, fields(entity = %entity.name))]
    async fn resolve(&self, entity: &Entity) -> Result<Vec<Fact>> {
        let query = search_name(&entity.name);
        let search: RegisterSearch = RetryingFetcher::new(&self.client)
            .resolve("company search", |ua| {
                let query = &query;
                async move {
                    self.client
                        .get_json(
                            &self.api_url,
                            &[("q", query.as_str()), ("categorie_entreprise", CATEGORY_LARGE)],
                            &ua,
                        )
                        .await
                }
            })
            .await?;

        let company = search
            .results
            .into_iter()
            .next()
            .ok_or_else(|| FactFinderError::no_candidate(self.name(), &query))?;

        let page_url = Some(format!("{COMPANY_PAGE_URL}{}", company.siren));
        let mut facts = vec![
            Fact::new(entity, Topic::Country, FactValue::Code("FR".into()), self.kind())
                .with_year(Some(self.reference_year))
                .with_source_url(page_url.clone()),
        ];

        if let Some(code) = company
            .siege
            .and_then(|s| s.activite_principale)
            .filter(|c| !c.trim().is_empty())
        {
            facts.push(
                Fact::new(entity, Topic::Activity, FactValue::Code(code.trim().to_string()), self.kind())
                    .with_year(Some(self.reference_year))
                    .with_source_url(page_url),
            );
        }

        debug!(siren = %company.siren, facts = facts.len(), "register match");
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn strips_legal_form_noise() {
        assert_eq!(search_name("Renault S A"), "Renault");
        assert_eq!(search_name("  Air  Liquide "), "Air Liquide");
    }

    #[tokio::test]
    async fn first_match_gives_activity_and_country() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "Renault"))
            .and(query_param("categorie_entreprise", "GE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"siren": "441639465", "siege": {"activite_principale": "70.10Z"}},
                    {"siren": "000000000", "siege": {"activite_principale": "01.11Z"}}
                ]
            })))
            .mount(&server)
            .await;

        let adapter = RegisterAdapter::new(&FetchConfig::default(), 2024)
            .unwrap()
            .with_api_url(server.uri());
        let facts = adapter.resolve(&Entity::new("E1", "Renault S A")).await.unwrap();

        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].value, FactValue::Code("FR".into()));
        assert_eq!(facts[1].topic, Topic::Activity);
        assert_eq!(facts[1].value, FactValue::Code("70.10Z".into()));
        assert_eq!(
            facts[1].source_url.as_deref(),
            Some("https://annuaire-entreprises.data.gouv.fr/entreprise/441639465")
        );
    }

    #[tokio::test]
    async fn no_results_is_no_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&server)
            .await;

        let adapter = RegisterAdapter::new(&FetchConfig::default(), 2024)
            .unwrap()
            .with_api_url(server.uri());
        assert!(adapter.resolve(&Entity::new("E1", "Acme")).await.unwrap_err().is_no_candidate());
    }
}
