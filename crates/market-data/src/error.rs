//! Market data error types

use thiserror::Error;

/// Errors raised while talking to the upstream provider
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// Transport-level failure (DNS, TLS, socket)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Provider answered but reported an error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Non-success HTTP status
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Fetch exceeded its deadline
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Subscribe or auth frame could not be sent
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Operation requires an open realtime connection
    #[error("Realtime connection is not open")]
    NotConnected,
}

impl From<reqwest::Error> for MarketDataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MarketDataError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            MarketDataError::Http {
                status: status.as_u16(),
                // path only; the query carries the API key
                url: err.url().map(|u| u.path().to_string()).unwrap_or_default(),
            }
        } else {
            MarketDataError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketDataError::Connection(err.to_string())
    }
}
