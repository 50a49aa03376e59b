use crate::*;
use thiserror::Error;
use url::Url;

/// Largest batch the persistence layer accepts in one upsert.
pub const MAX_BATCH_SIZE: usize = 500;

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Provider: {message}")]
    InvalidProvider { message: String },

    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: String, value: String },

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("Storage: {message}")]
    InvalidStorage { message: String },

    #[error("Realtime: {message}")]
    InvalidRealtime { message: String },

    #[error("Sync: {message}")]
    InvalidSync { message: String },

    #[error("Invalid log format '{0}'. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &ChainSyncConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_provider(&config.provider, &mut report);
    validate_realtime(&config.realtime, &mut report);
    validate_classifier(&config.classifier, &mut report);
    validate_storage(&config.storage, &mut report);
    validate_sync(&config.sync, &mut report);

    if !["pretty", "json", "compact"].contains(&config.logging.format.to_lowercase().as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(config.logging.format.clone()));
    }

    report
}

fn validate_url(field: &str, value: &str, report: &mut ValidationReport) {
    if Url::parse(value).is_err() {
        report.add_error(ValidationError::InvalidUrl {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

fn validate_provider(provider: &ProviderConfig, report: &mut ValidationReport) {
    // Unconfigured keys fall back to synthetic data, so they only warn.
    match provider.configuration_status() {
        ConfigurationStatus::Live => {}
        ConfigurationStatus::MissingApiKey => report.add_warning(
            "provider.api_key",
            "No API key set; synthetic data will be served",
        ),
        ConfigurationStatus::PlaceholderApiKey => report.add_warning(
            "provider.api_key",
            "API key looks like a placeholder; synthetic data will be served",
        ),
        ConfigurationStatus::LiveFetchDisabled => report.add_warning(
            "provider.live_fetch_enabled",
            "Live fetching disabled; synthetic data will be served",
        ),
    }

    validate_url("provider.rest_base_url", &provider.rest_base_url, report);
    validate_url("provider.ws_url", &provider.ws_url, report);

    if !provider.ws_url.starts_with("ws://") && !provider.ws_url.starts_with("wss://") {
        report.add_error(ValidationError::InvalidProvider {
            message: format!("ws_url must use ws:// or wss://, got {}", provider.ws_url),
        });
    }

    if provider.request_timeout_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "provider.request_timeout_seconds".to_string(),
        });
    }
    if provider.fetch_deadline_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "provider.fetch_deadline_seconds".to_string(),
        });
    }
    if provider.page_limit == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "provider.page_limit".to_string(),
        });
    }
    if provider.max_records == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "provider.max_records".to_string(),
        });
    }
    if provider.horizon_months == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "provider.horizon_months".to_string(),
        });
    }
}

fn validate_realtime(realtime: &RealtimeConfig, report: &mut ValidationReport) {
    if realtime.event_prefix.trim().is_empty() {
        report.add_error(ValidationError::InvalidRealtime {
            message: "event_prefix is required".to_string(),
        });
    }

    let reconnect = &realtime.reconnect;
    if reconnect.max_attempts == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "realtime.reconnect.max_attempts".to_string(),
        });
    }
    if reconnect.max_delay_ms < reconnect.base_delay_ms {
        report.add_error(ValidationError::InvalidRealtime {
            message: "reconnect.max_delay_ms must be >= base_delay_ms".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&reconnect.jitter_pct) {
        report.add_error(ValidationError::InvalidRealtime {
            message: "reconnect.jitter_pct must be between 0 and 1".to_string(),
        });
    }
}

fn validate_classifier(classifier: &ClassifierConfig, report: &mut ValidationReport) {
    match classifier.rpc_url.as_deref() {
        Some(url) => validate_url("classifier.rpc_url", url, report),
        None => report.add_default("classifier", "local day-count rule only"),
    }
}

fn validate_storage(storage: &StorageConfig, report: &mut ValidationReport) {
    if storage.batch_size == 0 || storage.batch_size > MAX_BATCH_SIZE {
        report.add_error(ValidationError::InvalidStorage {
            message: format!(
                "batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, storage.batch_size
            ),
        });
    }

    match storage.backend {
        StorageBackend::Memory => {
            report.add_warning(
                "storage.backend",
                "In-memory storage does not survive restarts",
            );
        }
        StorageBackend::Postgres => match storage.database_url.as_deref() {
            None | Some("") => report.add_error(ValidationError::InvalidStorage {
                message: "database_url is required for the postgres backend".to_string(),
            }),
            Some(url) if has_unresolved_env_vars(url) => {
                report.add_error(ValidationError::InvalidStorage {
                    message: "database_url references an unset environment variable".to_string(),
                })
            }
            Some(_) => {}
        },
    }

    if storage.max_connections == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "storage.max_connections".to_string(),
        });
    }
}

fn validate_sync(sync: &SyncConfig, report: &mut ValidationReport) {
    if sync.tickers.is_empty() {
        report.add_warning("sync.tickers", "No tickers configured; sync runs are no-ops");
    }

    for ticker in &sync.tickers {
        if ticker.trim().is_empty() {
            report.add_error(ValidationError::InvalidSync {
                message: "ticker symbols must not be empty".to_string(),
            });
        }
    }

    if sync.interval_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "sync.interval_seconds".to_string(),
        });
    }
    if sync.max_concurrent_tickers == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "sync.max_concurrent_tickers".to_string(),
        });
    }
}
