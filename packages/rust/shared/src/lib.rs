//! Shared types, error model, and configuration for FactFinder.
//!
//! This crate is the foundation depended on by all other FactFinder crates.
//! It provides:
//! - [`FactFinderError`]: the unified error type
//! - Domain types ([`Entity`], [`Topic`], [`Fact`], [`FactSet`], [`SourceKind`])
//! - Configuration ([`AppConfig`] and its sections, config loading)
//! - [`normalize`]: country, currency and website normalization

pub mod config;
pub mod error;
pub mod normalize;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, DocumentConfig, ExtractionConfig, FetchConfig,
    ReconciliationConfig, SearchConfig, config_dir, config_file_path, expand_home,
    extraction_api_key, init_config, load_config, load_config_from,
};
pub use error::{FactFinderError, Result};
pub use types::{
    Currency, Entity, Fact, FactSet, FactValue, NOT_APPLICABLE, ReportLocation, SourceKind, Topic,
    is_newer,
};
