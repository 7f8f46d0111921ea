//! Application configuration for TenderScope.
//!
//! User config lives at `~/.tenderscope/tenderscope.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TenderScopeError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tenderscope.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tenderscope";

// ---------------------------------------------------------------------------
// Config structs (matching tenderscope.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Rendered listing source.
    #[serde(default)]
    pub listing: ListingConfig,

    /// Render capability backend.
    #[serde(default)]
    pub render: RenderConfig,

    /// Companion search/record API.
    #[serde(default)]
    pub open_data: OpenDataConfig,

    /// HTTP retry policy.
    #[serde(default)]
    pub transport: TransportConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Relevance scoring.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Ordered category table. Declaration order is the classification tie-break.
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            listing: ListingConfig::default(),
            render: RenderConfig::default(),
            open_data: OpenDataConfig::default(),
            transport: TransportConfig::default(),
            openrouter: OpenRouterConfig::default(),
            scoring: ScoringConfig::default(),
            categories: default_categories(),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Historical store database path.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Report output path, without extension (`.json` and `.md` are written).
    #[serde(default = "default_report_path")]
    pub report_path: String,

    /// Maximum listing pages to process. `0` means every discovered page.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            report_path: default_report_path(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_store_path() -> String {
    "~/.tenderscope/store.db".into()
}
fn default_report_path() -> String {
    "tenderscope-report".into()
}
fn default_max_pages() -> u32 {
    50
}

/// `[listing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    /// Listing page URL.
    #[serde(default = "default_listing_url")]
    pub url: String,

    /// Base path that `../` detail references resolve against.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Site origin that `/` detail references resolve against.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// CSS selector of the listing table.
    #[serde(default = "default_table_selector")]
    pub table_selector: String,

    /// CSS selector of the pagination control.
    #[serde(default = "default_pagination_selector")]
    pub pagination_selector: String,

    /// Seconds to wait for the listing table after open/navigation.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Pause between listing pages in ms.
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,

    /// CSS selector awaited on detail pages.
    #[serde(default = "default_detail_selector")]
    pub detail_ready_selector: String,

    /// Seconds to wait for detail content.
    #[serde(default = "default_detail_timeout")]
    pub detail_timeout_secs: u64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            url: default_listing_url(),
            base_path: default_base_path(),
            origin: default_origin(),
            table_selector: default_table_selector(),
            pagination_selector: default_pagination_selector(),
            ready_timeout_secs: default_ready_timeout(),
            page_delay_ms: default_page_delay(),
            detail_ready_selector: default_detail_selector(),
            detail_timeout_secs: default_detail_timeout(),
        }
    }
}

fn default_listing_url() -> String {
    "https://www.compraspublicas.gob.ec/ProcesoContratacion/compras/NCO/FrmNCOListado.cpe".into()
}
fn default_base_path() -> String {
    "https://www.compraspublicas.gob.ec/ProcesoContratacion/compras/".into()
}
fn default_origin() -> String {
    "https://www.compraspublicas.gob.ec".into()
}
fn default_table_selector() -> String {
    "#table_id".into()
}
fn default_pagination_selector() -> String {
    "#table_id_paginate".into()
}
fn default_ready_timeout() -> u64 {
    30
}
fn default_page_delay() -> u64 {
    2_000
}
fn default_detail_selector() -> String {
    "table".into()
}
fn default_detail_timeout() -> u64 {
    10
}

/// Which render capability adapter drives the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderBackend {
    /// Plain HTTP fetches; pages selected through a query parameter.
    Static,
    /// Browserless headless-browser HTTP API.
    Browserless,
}

/// `[render]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_backend")]
    pub backend: RenderBackend,

    /// Browserless base URL.
    #[serde(default = "default_browserless_url")]
    pub browserless_url: String,

    /// Name of the env var holding the Browserless token (optional).
    #[serde(default = "default_browserless_token_env")]
    pub browserless_token_env: String,

    /// Query parameter carrying the page index for the static backend.
    #[serde(default = "default_page_param")]
    pub page_param: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            browserless_url: default_browserless_url(),
            browserless_token_env: default_browserless_token_env(),
            page_param: default_page_param(),
        }
    }
}

fn default_backend() -> RenderBackend {
    RenderBackend::Browserless
}
fn default_browserless_url() -> String {
    "http://localhost:3000".into()
}
fn default_browserless_token_env() -> String {
    "BROWSERLESS_TOKEN".into()
}
fn default_page_param() -> String {
    "page".into()
}

/// `[open_data]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDataConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_search_url")]
    pub search_url: String,

    #[serde(default = "default_record_url")]
    pub record_url: String,

    /// Year to search. `0` means the current year.
    #[serde(default)]
    pub year: i32,

    /// Pause between record lookups in ms.
    #[serde(default = "default_record_delay")]
    pub record_delay_ms: u64,
}

impl Default for OpenDataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: default_search_url(),
            record_url: default_record_url(),
            year: 0,
            record_delay_ms: default_record_delay(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_search_url() -> String {
    "https://datosabiertos.compraspublicas.gob.ec/PLATAFORMA/api/search_ocds".into()
}
fn default_record_url() -> String {
    "https://datosabiertos.compraspublicas.gob.ec/PLATAFORMA/api/record".into()
}
fn default_record_delay() -> u64 {
    500
}

/// `[transport]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base in ms; attempt `n` waits `base * 2^(n-1)`.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// HTTP statuses that trigger a retry.
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    1_000
}
fn default_retry_statuses() -> Vec<u16> {
    vec![500, 502, 504, 429]
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for relevance scoring.
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.5-flash".into()
}

/// `[scoring]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fixed pause between consecutive scoring calls in ms.
    #[serde(default = "default_pacing")]
    pub pacing_ms: u64,

    /// Upper bound on external calls per run; 0 means unlimited.
    #[serde(default = "default_max_calls")]
    pub max_calls_per_run: usize,

    /// Also score unassessed entries already in the historical store.
    #[serde(default)]
    pub backfill: bool,

    /// Timeout for one scoring call in seconds.
    #[serde(default = "default_scoring_timeout")]
    pub timeout_secs: u64,

    /// Who the relevance is judged for; embedded in the prompt.
    #[serde(default = "default_client_profile")]
    pub client_profile: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pacing_ms: default_pacing(),
            max_calls_per_run: default_max_calls(),
            backfill: false,
            timeout_secs: default_scoring_timeout(),
            client_profile: default_client_profile(),
        }
    }
}

fn default_pacing() -> u64 {
    4_100
}
fn default_max_calls() -> usize {
    100
}
fn default_scoring_timeout() -> u64 {
    100
}
fn default_client_profile() -> String {
    "an IT services firm specialised in software development, cybersecurity, \
     and data analysis with statistics"
        .into()
}

/// `[[categories]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    /// Keywords in match order.
    pub keywords: Vec<String>,
}

/// The built-in category table, in tie-break order.
pub fn default_categories() -> Vec<CategoryConfig> {
    fn category(name: &str, keywords: &[&str]) -> CategoryConfig {
        CategoryConfig {
            name: name.into(),
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
        }
    }

    vec![
        category(
            "Software Development",
            &[
                "software",
                "sistema informático",
                "plataforma digital",
                "sistema de gestión",
                "aplicativo",
                "implementación de software",
                "mantenimiento de software",
                "firma electrónica",
            ],
        ),
        category(
            "Cybersecurity",
            &[
                "ciberseguridad",
                "seguridad informática",
                "análisis de vulnerabilidades",
                "pentesting",
                "seguridad de la información",
                "consultoría en seguridad",
                "ISO 27001",
            ],
        ),
        category(
            "Data & AI",
            &[
                "datos",
                "análisis de datos",
                "analítica",
                "procesamiento de datos",
                "ETL",
                "inteligencia de negocios",
                "business intelligence",
                "visualización de datos",
                "modelado de datos",
                "análisis estadístico",
                "estadística",
                "modelado predictivo",
                "inteligencia artificial",
            ],
        ),
        category(
            "IT Consulting & Support",
            &[
                "consultoría tecnológica",
                "soporte técnico",
                "mesa de ayuda",
                "interoperabilidad",
                "servicios TI",
            ],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tenderscope/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TenderScopeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tenderscope/tenderscope.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| TenderScopeError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        TenderScopeError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_categories(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TenderScopeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TenderScopeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TenderScopeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject category tables the classifier cannot use.
pub fn validate_categories(config: &AppConfig) -> Result<()> {
    if config.categories.is_empty() {
        return Err(TenderScopeError::config("at least one [[categories]] entry is required"));
    }
    for category in &config.categories {
        if category.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(TenderScopeError::config(format!(
                "category '{}' has no keywords",
                category.name
            )));
        }
    }
    Ok(())
}

/// Read the OpenRouter API key from the env var named in config.
pub fn api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(TenderScopeError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable \
             or disable scoring with --no-scoring."
        ))),
    }
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    api_key(config).map(|_| ())
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| TenderScopeError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("store_path"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("[[categories]]"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.max_pages, 50);
        assert_eq!(parsed.transport.retry_statuses, vec![500, 502, 504, 429]);
        assert_eq!(parsed.categories, default_categories());
    }

    #[test]
    fn categories_keep_declaration_order() {
        let toml_str = r#"
[[categories]]
name = "Zeta"
keywords = ["z"]

[[categories]]
name = "Alpha"
keywords = ["a", "b"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let names: Vec<_> = config.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Zeta", "Alpha"]);
        assert_eq!(config.scoring.pacing_ms, 4_100);
    }

    #[test]
    fn default_category_table_order() {
        let names: Vec<_> = default_categories().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            [
                "Software Development",
                "Cybersecurity",
                "Data & AI",
                "IT Consulting & Support"
            ]
        );
    }

    #[test]
    fn empty_category_rejected() {
        let mut config = AppConfig::default();
        config.categories = vec![CategoryConfig {
            name: "Empty".into(),
            keywords: vec!["  ".into()],
        }];
        let err = validate_categories(&config).unwrap_err();
        assert!(err.to_string().contains("Empty"));
    }

    #[test]
    fn render_backend_parses() {
        let config: AppConfig = toml::from_str("[render]\nbackend = \"static\"\n").expect("parse");
        assert_eq!(config.render.backend, RenderBackend::Static);
        assert_eq!(config.render.page_param, "page");
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "TS_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/x.db").unwrap(), PathBuf::from("/tmp/x.db"));
        assert!(expand_home("~/x.db").unwrap().ends_with("x.db"));
    }
}
