//! Source access for FactFinder: gated HTTP, retry policies, adapters, fan-out.
//!
//! This crate provides:
//! - [`SourceClient`]: per-source HTTP client with a concurrency gate
//! - [`RetryingFetcher`] / [`Backoff`]: retry policies for lookups and extraction calls
//! - [`adapters`]: the [`SourceAdapter`] trait and the built-in sources
//! - [`SearchBackend`]: ranked web-search hits for a text query
//! - [`FetchOrchestrator`]: runs adapters concurrently with per-adapter isolation

pub mod adapters;
pub mod client;
pub mod orchestrator;
pub mod retry;
pub mod search;

pub use adapters::{
    EncyclopediaAdapter, FinancialAdapter, KnowledgeGraphAdapter, RegisterAdapter, SourceAdapter,
    WebSearchAdapter, default_adapters,
};
pub use client::SourceClient;
pub use orchestrator::{FetchOrchestrator, SourceOutcome};
pub use retry::{Backoff, RetryingFetcher};
pub use search::{SearchBackend, SearchHit, SearxSearch};
