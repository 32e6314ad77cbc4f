//! Long-document handling for FactFinder.
//!
//! This crate provides:
//! - [`Document`]: per-page text of a PDF, normalized for keyword matching
//! - [`KeywordTable`]: which page patterns signal which topic
//! - [`PageSelector`]: bounded, coverage-aware choice of pages to send to extraction
//! - [`format_for_prompt`]: renders a selection as extraction context

pub mod document;
pub mod keywords;
pub mod selector;

pub use document::{Document, normalize_page_text};
pub use keywords::KeywordTable;
pub use selector::{DocumentSelection, PageCandidate, PageSelector, SelectionLimits, format_for_prompt};
