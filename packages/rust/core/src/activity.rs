//! Activity classification into NACE Rev. 2 codes.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, instrument};

use factfinder_shared::Result;

use crate::extraction::{StructuredExtractor, extract_as};

static NACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)([A-U])?\s*(\d{2})(?:\.(\d{1,2}))?[A-Z]?$").expect("valid regex")
});

/// Section letter of a NACE Rev. 2 division.
fn section_of(division: u8) -> Option<char> {
    let section = match division {
        1..=3 => 'A',
        5..=9 => 'B',
        10..=33 => 'C',
        35 => 'D',
        36..=39 => 'E',
        41..=43 => 'F',
        45..=47 => 'G',
        49..=53 => 'H',
        55..=56 => 'I',
        58..=63 => 'J',
        64..=66 => 'K',
        68 => 'L',
        69..=75 => 'M',
        77..=82 => 'N',
        84 => 'O',
        85 => 'P',
        86..=88 => 'Q',
        90..=93 => 'R',
        94..=96 => 'S',
        97..=98 => 'T',
        99 => 'U',
        _ => return None,
    };
    Some(section)
}

/// Normalize a NACE code to `<section><division>[.<group/class>]`, e.g.
/// `70.10Z` → `M70.10`. National suffix letters are dropped. Codes whose
/// division does not exist, or whose stated section disagrees with the
/// division, are rejected.
pub fn normalize_nace_code(raw: &str) -> Option<String> {
    let caps = NACE.captures(raw.trim())?;
    let division: u8 = caps.get(2)?.as_str().parse().ok()?;
    let section = section_of(division)?;

    if let Some(stated) = caps.get(1) {
        if !stated.as_str().eq_ignore_ascii_case(&section.to_string()) {
            return None;
        }
    }

    Some(match caps.get(3) {
        Some(class) => format!("{section}{division:02}.{}", class.as_str()),
        None => format!("{section}{division:02}"),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NaceChoice {
    /// NACE Rev. 2 class code such as "C29.10", or null when unsure.
    code: Option<String>,
}

const INSTRUCTIONS: &str = "You classify a company's main economic activity. \
Given a description of what the company does, answer with the single most \
specific NACE Rev. 2 code that describes its principal activity, written as \
section letter, division and class (for example \"C29.10\"). Answer null if \
the description is too vague to classify.";

/// Maps a free-text activity description to a NACE code.
pub struct ActivityClassifier {
    extractor: Arc<dyn StructuredExtractor>,
}

impl ActivityClassifier {
    pub fn new(extractor: Arc<dyn StructuredExtractor>) -> Self {
        Self { extractor }
    }

    /// `Ok(None)` when the model gives no code or an invalid one.
    #[instrument(skip_all)]
    pub async fn classify(&self, description: &str) -> Result<Option<String>> {
        let choice: NaceChoice =
            extract_as(self.extractor.as_ref(), "activity_classifier", INSTRUCTIONS, description).await?;

        let code = choice.code.as_deref().and_then(normalize_nace_code);
        if code.is_none() {
            debug!(raw = ?choice.code, "no valid activity code");
        }
        Ok(code)
    }
}
