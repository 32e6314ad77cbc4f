//! Normalization of the free-form values sources hand back: country names,
//! currency markers and website URLs.

use url::Url;

/// Country names and aliases → ISO 3166-1 alpha-2. Lookups are on lowercased input.
const COUNTRIES: &[(&str, &str)] = &[
    ("argentina", "AR"),
    ("australia", "AU"),
    ("austria", "AT"),
    ("belgium", "BE"),
    ("brazil", "BR"),
    ("bulgaria", "BG"),
    ("canada", "CA"),
    ("chile", "CL"),
    ("china", "CN"),
    ("people's republic of china", "CN"),
    ("colombia", "CO"),
    ("croatia", "HR"),
    ("cyprus", "CY"),
    ("czech republic", "CZ"),
    ("czechia", "CZ"),
    ("denmark", "DK"),
    ("estonia", "EE"),
    ("finland", "FI"),
    ("france", "FR"),
    ("germany", "DE"),
    ("greece", "GR"),
    ("hong kong", "HK"),
    ("hungary", "HU"),
    ("iceland", "IS"),
    ("india", "IN"),
    ("indonesia", "ID"),
    ("ireland", "IE"),
    ("republic of ireland", "IE"),
    ("israel", "IL"),
    ("italy", "IT"),
    ("japan", "JP"),
    ("latvia", "LV"),
    ("lithuania", "LT"),
    ("luxembourg", "LU"),
    ("malaysia", "MY"),
    ("malta", "MT"),
    ("mexico", "MX"),
    ("netherlands", "NL"),
    ("the netherlands", "NL"),
    ("new zealand", "NZ"),
    ("norway", "NO"),
    ("poland", "PL"),
    ("portugal", "PT"),
    ("romania", "RO"),
    ("russia", "RU"),
    ("saudi arabia", "SA"),
    ("singapore", "SG"),
    ("slovakia", "SK"),
    ("slovenia", "SI"),
    ("south africa", "ZA"),
    ("south korea", "KR"),
    ("korea", "KR"),
    ("spain", "ES"),
    ("sweden", "SE"),
    ("switzerland", "CH"),
    ("taiwan", "TW"),
    ("thailand", "TH"),
    ("turkey", "TR"),
    ("türkiye", "TR"),
    ("united arab emirates", "AE"),
    ("united kingdom", "GB"),
    ("uk", "GB"),
    ("u.k.", "GB"),
    ("england", "GB"),
    ("scotland", "GB"),
    ("great britain", "GB"),
    ("united states", "US"),
    ("united states of america", "US"),
    ("usa", "US"),
    ("us", "US"),
    ("u.s.", "US"),
    ("u.s.a.", "US"),
];

/// Map a country name, alias or alpha-2 code to its alpha-2 code.
pub fn country_code(raw: &str) -> Option<&'static str> {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        return None;
    }

    // "U.S" and "U.S." should both hit the dotted alias.
    let dotted = format!("{}.", trimmed.trim_end_matches('.'));
    if let Some((_, code)) = COUNTRIES
        .iter()
        .find(|(name, _)| *name == trimmed || *name == dotted)
    {
        return Some(code);
    }

    // Already an alpha-2 code we know about.
    if trimmed.len() == 2 {
        let upper = trimmed.to_uppercase();
        return COUNTRIES
            .iter()
            .map(|(_, code)| *code)
            .find(|code| *code == upper);
    }

    None
}

/// Currency markers in match order. Longer, more specific markers come first.
const CURRENCY_MARKERS: &[(&str, &str)] = &[
    ("us$", "USD"),
    ("usd", "USD"),
    ("a$", "AUD"),
    ("aud", "AUD"),
    ("c$", "CAD"),
    ("ca$", "CAD"),
    ("cad", "CAD"),
    ("r$", "BRL"),
    ("brl", "BRL"),
    ("cn¥", "CNY"),
    ("rmb", "CNY"),
    ("cny", "CNY"),
    ("yuan", "CNY"),
    ("renminbi", "CNY"),
    ("jpyconvert", "JPY"),
    ("jpy", "JPY"),
    ("yen", "JPY"),
    ("¥", "JPY"),
    ("eur", "EUR"),
    ("€", "EUR"),
    ("gbp", "GBP"),
    ("£", "GBP"),
    ("pound", "GBP"),
    ("chf", "CHF"),
    ("swiss franc", "CHF"),
    ("msek", "SEK"),
    ("sekm", "SEK"),
    ("sek", "SEK"),
    ("dkk", "DKK"),
    ("nok", "NOK"),
    ("krw", "KRW"),
    ("₩", "KRW"),
    ("won", "KRW"),
    ("inr", "INR"),
    ("₹", "INR"),
    ("rupee", "INR"),
    ("pln", "PLN"),
    ("zł", "PLN"),
    ("$", "USD"),
    ("dollar", "USD"),
];

/// Find the first currency marker in free text (e.g. `US$ 394.3 billion`).
pub fn detect_currency(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    CURRENCY_MARKERS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, code)| *code)
}

/// Reduce a URL or bare host to its host without a leading `www.`.
///
/// `https://www.acme.com/en/about` → `acme.com`.
pub fn website_domain(raw: &str) -> Option<String> {
    let raw = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let first = raw.split_whitespace().next()?;
    let candidate = if first.contains("://") {
        first.to_string()
    } else {
        format!("https://{first}")
    };

    let url = Url::parse(&candidate).ok()?;
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    host.contains('.').then_some(host)
}
