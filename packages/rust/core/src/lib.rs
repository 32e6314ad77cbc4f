//! Core fact-assembly logic for FactFinder.
//!
//! This crate ties source fetching, reconciliation and document extraction
//! into the per-entity workflow ([`pipeline::PipelineDriver`]).

pub mod activity;
pub mod document_facts;
pub mod extraction;
pub mod pipeline;
pub mod reconcile;
pub mod report;

pub use activity::{ActivityClassifier, normalize_nace_code};
pub use document_facts::{DocumentFactExtractor, REPORT_TOPICS, ReportFigures, ReportReader};
pub use extraction::{ChatCompletionsExtractor, ExtractionRequest, StructuredExtractor, extract_as, strict_schema};
pub use pipeline::{BatchProgress, BatchReport, EntityProfile, PipelineDriver, SilentProgress};
pub use reconcile::ReconciliationEngine;
pub use report::ReportLocator;
