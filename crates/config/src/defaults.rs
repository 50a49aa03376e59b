pub fn default_enabled() -> bool {
    true
}

pub fn default_rest_base_url() -> String {
    "https://api.polygon.io".to_string()
}

pub fn default_ws_url() -> String {
    "wss://socket.polygon.io/options".to_string()
}

pub fn default_request_timeout() -> u64 {
    30
}

pub fn default_fetch_deadline() -> u64 {
    60
}

pub fn default_page_limit() -> u32 {
    250
}

pub fn default_max_records() -> usize {
    10_000
}

pub fn default_horizon_months() -> u32 {
    3
}

pub fn default_event_prefix() -> String {
    "Q".to_string()
}

pub fn default_reconnect_attempts() -> usize {
    5
}

pub fn default_reconnect_base_delay_ms() -> u64 {
    500
}

pub fn default_reconnect_max_delay_ms() -> u64 {
    15_000
}

pub fn default_jitter_pct() -> f64 {
    0.2
}

pub fn default_classifier_timeout() -> u64 {
    5
}

pub fn default_storage_backend() -> super::StorageBackend {
    super::StorageBackend::Memory
}

pub fn default_max_connections() -> u32 {
    10
}

pub fn default_batch_size() -> usize {
    500
}

pub fn default_sync_interval() -> u64 {
    900
}

pub fn default_max_concurrent_tickers() -> usize {
    4
}

pub fn default_ttl_seconds() -> u64 {
    300
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}
