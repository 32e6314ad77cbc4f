//! Source adapter trait and the built-in adapters.
//!
//! Each adapter turns one external source into candidate facts for an entity.
//! Adapters never see each other; the orchestrator runs them side by side and
//! the reconciliation step decides between their answers.

mod encyclopedia;
mod financial;
mod knowledge_graph;
mod register;
mod text;
mod web_search;

use std::sync::Arc;

use async_trait::async_trait;

use factfinder_shared::{AppConfig, Entity, Fact, Result, SourceKind};
use factfinder_storage::KeyCache;

use crate::client::SourceClient;
use crate::search::SearchBackend;

pub use encyclopedia::{EncyclopediaAdapter, Infobox};
pub use financial::FinancialAdapter;
pub use knowledge_graph::KnowledgeGraphAdapter;
pub use register::RegisterAdapter;
pub use text::{extract_year, parse_amount};
pub use web_search::WebSearchAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One external source of facts.
///
/// `resolve` returns every fact the source could establish; an empty list and
/// `NoCandidateFound` both mean "nothing here". Any other error means the
/// source could not be asked.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;

    /// Provenance tag stamped on every fact this adapter returns.
    fn kind(&self) -> SourceKind;

    async fn resolve(&self, entity: &Entity) -> Result<Vec<Fact>>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Build the standard adapter line-up from configuration.
///
/// Order matters: on equal years the reconciliation keeps the fact from the
/// earlier adapter, so the financial source wins ties, and the knowledge graph
/// wins over the encyclopedia. The web-search adapter is included only when a
/// search backend is available.
///
/// The knowledge-graph and encyclopedia adapters both call the Wikipedia API
/// and share one client, so one gate bounds that host.
pub fn default_adapters(
    config: &AppConfig,
    ticker_cache: Arc<KeyCache>,
    search: Option<Arc<dyn SearchBackend>>,
) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let reference_year = config.reconciliation.latest_valid_year;
    let wikimedia = Arc::new(SourceClient::new("wikimedia", &config.fetch)?);

    let mut adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(FinancialAdapter::new(&config.fetch, ticker_cache)?),
        Arc::new(KnowledgeGraphAdapter::with_client(Arc::clone(&wikimedia), reference_year)),
        Arc::new(EncyclopediaAdapter::with_client(wikimedia, reference_year)),
        Arc::new(RegisterAdapter::new(&config.fetch, reference_year)?),
    ];

    if let Some(search) = search {
        adapters.push(Arc::new(WebSearchAdapter::new(search, reference_year)));
    }

    Ok(adapters)
}
