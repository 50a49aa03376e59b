use serde::{Deserialize, Serialize};
use std::fmt;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Known placeholder values shipped in sample configs and `.env` templates.
const PLACEHOLDER_API_KEYS: &[&str] = &[
    "your_api_key",
    "your-api-key",
    "your_api_key_here",
    "api_key",
    "changeme",
    "placeholder",
    "demo",
    "xxx",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainSyncConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Upstream options data provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Gates every network fetch independently of the API key.
    #[serde(default = "default_enabled")]
    pub live_fetch_enabled: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Upper bound on one paginated listing, across all pages.
    #[serde(default = "default_fetch_deadline")]
    pub fetch_deadline_seconds: u64,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    #[serde(default = "default_horizon_months")]
    pub horizon_months: u32,
}

/// Why live fetching is (or is not) attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationStatus {
    Live,
    MissingApiKey,
    PlaceholderApiKey,
    LiveFetchDisabled,
}

impl ConfigurationStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, ConfigurationStatus::Live)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigurationStatus::Live => "live",
            ConfigurationStatus::MissingApiKey => "missing_api_key",
            ConfigurationStatus::PlaceholderApiKey => "placeholder_api_key",
            ConfigurationStatus::LiveFetchDisabled => "live_fetch_disabled",
        }
    }
}

impl fmt::Display for ConfigurationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ProviderConfig {
    /// Classify the key and feature flag. No network is touched.
    pub fn configuration_status(&self) -> ConfigurationStatus {
        if !self.live_fetch_enabled {
            return ConfigurationStatus::LiveFetchDisabled;
        }

        let key = match self.api_key.as_deref().map(str::trim) {
            None | Some("") => return ConfigurationStatus::MissingApiKey,
            Some(key) => key,
        };

        if is_placeholder_key(key) {
            ConfigurationStatus::PlaceholderApiKey
        } else {
            ConfigurationStatus::Live
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configuration_status().is_live()
    }

    /// The API key, only when it is usable.
    pub fn usable_api_key(&self) -> Option<&str> {
        if self.is_configured() {
            self.api_key.as_deref().map(str::trim)
        } else {
            None
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            rest_base_url: default_rest_base_url(),
            ws_url: default_ws_url(),
            live_fetch_enabled: true,
            request_timeout_seconds: default_request_timeout(),
            fetch_deadline_seconds: default_fetch_deadline(),
            page_limit: default_page_limit(),
            max_records: default_max_records(),
            horizon_months: default_horizon_months(),
        }
    }
}

/// True for unresolved `${VAR}` references and well-known template values.
pub fn is_placeholder_key(key: &str) -> bool {
    let lowered = key.trim().to_ascii_lowercase();
    has_unresolved_env_vars(key)
        || PLACEHOLDER_API_KEYS.contains(&lowered.as_str())
        || lowered.starts_with("your_")
        || lowered.starts_with('<')
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RealtimeConfig {
    /// Event prefix used in subscribe params (`<prefix>.<symbol>.*`).
    #[serde(default = "default_event_prefix")]
    pub event_prefix: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            event_prefix: default_event_prefix(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_reconnect_attempts(),
            base_delay_ms: default_reconnect_base_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
            jitter_pct: default_jitter_pct(),
        }
    }
}

/// Remote expiry categorization rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub rpc_api_key: Option<String>,
    #[serde(default = "default_classifier_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            rpc_api_key: None,
            timeout_seconds: default_classifier_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: None,
            max_connections: default_max_connections(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default = "default_sync_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_enabled")]
    pub run_on_startup: bool,
    #[serde(default = "default_max_concurrent_tickers")]
    pub max_concurrent_tickers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            interval_seconds: default_sync_interval(),
            run_on_startup: true,
            max_concurrent_tickers: default_max_concurrent_tickers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// LiquidTicker rows older than this are treated as a cache miss.
    #[serde(default = "default_ttl_seconds")]
    pub price_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            price_ttl_seconds: default_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}
