//! Application configuration for FactFinder.
//!
//! User config lives at `~/.factfinder/factfinder.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FactFinderError, Result};
use crate::types::Topic;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "factfinder.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".factfinder";

// ---------------------------------------------------------------------------
// Config structs (matching factfinder.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub document: DocumentConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding the persistent key caches (`~` is expanded).
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Topics every profile should end up with.
    #[serde(default = "default_required_topics")]
    pub required_topics: Vec<Topic>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            required_topics: default_required_topics(),
        }
    }
}

fn default_cache_dir() -> String {
    "~/.factfinder/cache".into()
}
fn default_required_topics() -> Vec<Topic> {
    Topic::ALL.to_vec()
}

/// `[reconciliation]` section. The year constants are tuning knobs, not truths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Facts at or after this year count as current. Encyclopedia headcounts
    /// from this year on take precedence, and reports older than this are not mined.
    #[serde(default = "default_latest_valid_year")]
    pub latest_valid_year: i32,

    /// A required topic counts as missing unless a fact at or after this year exists.
    #[serde(default = "default_min_acceptable_year")]
    pub min_acceptable_year: i32,

    /// Whether fresh encyclopedia headcounts override other sources.
    #[serde(default = "default_true")]
    pub encyclopedia_headcount_precedence: bool,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            latest_valid_year: default_latest_valid_year(),
            min_acceptable_year: default_min_acceptable_year(),
            encyclopedia_headcount_precedence: true,
        }
    }
}

fn default_latest_valid_year() -> i32 {
    2024
}
fn default_min_acceptable_year() -> i32 {
    2023
}
fn default_true() -> bool {
    true
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Uniform per-adapter timeout.
    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout_secs: u64,

    /// Maximum simultaneous requests against any one source.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_per_source: usize,

    /// Client identities rotated through on a blocked first attempt.
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: default_adapter_timeout(),
            max_in_flight_per_source: default_max_in_flight(),
            user_agents: default_user_agents(),
        }
    }
}

impl FetchConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}

fn default_adapter_timeout() -> u64 {
    30
}
fn default_max_in_flight() -> usize {
    2
}
fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64)",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)",
        "Mozilla/5.0 (X11; Linux x86_64)",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:112.0) Gecko/20100101 Firefox/112.0",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[document]` section: page selection limits and download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    #[serde(default = "default_max_total_pages")]
    pub max_total_pages: usize,

    #[serde(default = "default_max_pages_per_topic")]
    pub max_pages_per_topic: usize,

    #[serde(default = "default_min_pages_per_topic")]
    pub min_pages_per_topic: usize,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            max_total_pages: default_max_total_pages(),
            max_pages_per_topic: default_max_pages_per_topic(),
            min_pages_per_topic: default_min_pages_per_topic(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

fn default_max_total_pages() -> usize {
    10
}
fn default_max_pages_per_topic() -> usize {
    5
}
fn default_min_pages_per_topic() -> usize {
    2
}
fn default_download_timeout() -> u64 {
    60
}

/// `[extraction]` section: the structured-extraction (LLM) backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_attempts() -> u32 {
    4
}
fn default_initial_delay() -> u64 {
    1_000
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}

/// `[search]` section. Web search is disabled when no endpoint is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> usize {
    6
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.factfinder/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FactFinderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.factfinder/factfinder.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FactFinderError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| FactFinderError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FactFinderError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FactFinderError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FactFinderError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Read the extraction API key from the configured env var.
pub fn extraction_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.extraction.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(FactFinderError::ConfigurationMissing {
            message: format!("API key not found. Set the {var_name} environment variable."),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("cache_dir"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("latest_valid_year = 2024"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.document.max_total_pages, 10);
        assert_eq!(parsed.fetch.user_agents.len(), 5);
        assert_eq!(parsed.defaults.required_topics.len(), 6);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[reconciliation]
latest_valid_year = 2025

[search]
endpoint = "http://localhost:8888/search"

[defaults]
required_topics = ["EMPLOYEES", "TURNOVER"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.reconciliation.latest_valid_year, 2025);
        assert_eq!(config.reconciliation.min_acceptable_year, 2023);
        assert!(config.reconciliation.encyclopedia_headcount_precedence);
        assert_eq!(config.search.endpoint.as_deref(), Some("http://localhost:8888/search"));
        assert_eq!(config.search.max_results, 6);
        assert_eq!(
            config.defaults.required_topics,
            vec![Topic::Employees, Topic::Turnover]
        );
    }

    #[test]
    fn missing_api_key_is_configuration_missing() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.extraction.api_key_env = "FF_TEST_NONEXISTENT_KEY_12345".into();
        let err = extraction_api_key(&config).unwrap_err();
        assert!(matches!(err, FactFinderError::ConfigurationMissing { .. }));
        assert!(err.to_string().contains("FF_TEST_NONEXISTENT_KEY_12345"));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/cache/ff"), PathBuf::from("/var/cache/ff"));
    }
}
