//! PDF text extraction into a page list.

use tracing::debug;

use factfinder_shared::{FactFinderError, Result};

/// Text of a document, one entry per page (index 0 is page 1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pages: Vec<String>,
}

impl Document {
    /// Build from already-extracted page texts. Each page is normalized.
    pub fn from_pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            pages: pages.into_iter().map(|p| normalize_page_text(p.as_ref())).collect(),
        }
    }

    /// Parse a PDF held in memory. Pages whose text cannot be decoded are kept empty.
    pub fn from_pdf_bytes(bytes: &[u8]) -> Result<Self> {
        let pdf = lopdf::Document::load_mem(bytes)
            .map_err(|e| FactFinderError::Document(format!("unreadable PDF: {e}")))?;

        let page_numbers: Vec<u32> = pdf.get_pages().keys().copied().collect();
        if page_numbers.is_empty() {
            return Err(FactFinderError::Document("PDF has no pages".into()));
        }

        let pages: Vec<String> = page_numbers
            .iter()
            .map(|&n| match pdf.extract_text(&[n]) {
                Ok(text) => normalize_page_text(&text),
                Err(e) => {
                    debug!(page = n, error = %e, "page text not extractable");
                    String::new()
                }
            })
            .collect();

        debug!(pages = pages.len(), "PDF text extracted");
        Ok(Self { pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Text of 1-based page `number`.
    pub fn page(&self, number: usize) -> Option<&str> {
        number.checked_sub(1).and_then(|i| self.pages.get(i)).map(String::as_str)
    }

    /// `(page number, text)` pairs, page numbers starting at 1.
    pub fn pages(&self) -> impl Iterator<Item = (usize, &str)> {
        self.pages.iter().enumerate().map(|(i, text)| (i + 1, text.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.is_empty())
    }
}

/// Collapse whitespace within each line and drop blank lines.
pub fn normalize_page_text(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
