//! Shared types for the upstream options provider

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Option type (Call or Put)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    Call,
    Put,
}

impl ContractType {
    pub fn code(&self) -> &'static str {
        match self {
            ContractType::Call => "C",
            ContractType::Put => "P",
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            ContractType::Call => "call",
            ContractType::Put => "put",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "call" | "c" => Some(ContractType::Call),
            "put" | "p" => Some(ContractType::Put),
            _ => None,
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Reference data for one listed contract, as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDescriptor {
    /// Provider contract ticker (e.g. `O:SPY251219C00550000`).
    pub ticker: String,
    pub underlying_ticker: String,
    pub contract_type: ContractType,
    pub strike_price: f64,
    pub expiration_date: NaiveDate,
    pub shares_per_contract: Option<u32>,
    pub exercise_style: Option<String>,
}

/// Option Greeks, passed through from the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

/// Latest quote, trade and Greeks for one contract.
///
/// Every market field is optional; the provider omits what it does not have.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub contract_ticker: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last_price: Option<f64>,
    pub day_close: Option<f64>,
    pub volume: Option<f64>,
    pub open_interest: Option<f64>,
    pub implied_volatility: Option<f64>,
    pub greeks: Option<Greeks>,
    pub underlying_price: Option<f64>,
    pub last_trade_timestamp: Option<DateTime<Utc>>,
}

/// Technical indicators served by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
}

impl IndicatorKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Rsi => "rsi",
        }
    }

    pub fn default_window(&self) -> u32 {
        match self {
            IndicatorKind::Sma => 50,
            IndicatorKind::Ema => 20,
            IndicatorKind::Rsi => 14,
        }
    }
}

/// Most recent value of one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub kind: IndicatorKind,
    pub window: u32,
    pub value: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// SMA, EMA and RSI for one underlying, fetched together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub sma: Option<IndicatorValue>,
    pub ema: Option<IndicatorValue>,
    pub rsi: Option<IndicatorValue>,
}

/// Quote event from the realtime feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteTick {
    #[serde(rename = "sym")]
    pub symbol: String,
    #[serde(rename = "bp", default)]
    pub bid_price: f64,
    #[serde(rename = "ap", default)]
    pub ask_price: f64,
    #[serde(rename = "bs", default)]
    pub bid_size: f64,
    #[serde(rename = "as", default)]
    pub ask_size: f64,
    /// Exchange timestamp, Unix milliseconds.
    #[serde(rename = "t", default)]
    pub timestamp: i64,
}

/// Trade event from the realtime feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    #[serde(rename = "sym")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "s", default)]
    pub size: f64,
    #[serde(rename = "x", default)]
    pub exchange: Option<i64>,
    #[serde(rename = "t", default)]
    pub timestamp: i64,
}

/// Connection status notice (`auth_success`, `auth_failed`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// One element of an inbound realtime frame, discriminated by `ev`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "ev")]
pub enum RealtimeEvent {
    #[serde(rename = "Q")]
    Quote(QuoteTick),
    #[serde(rename = "T")]
    Trade(TradeTick),
    #[serde(rename = "status")]
    Status(StatusMessage),
    #[serde(other)]
    Other,
}

/// A tick delivered to subscribers. Only quotes and trades are forwarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MarketTick {
    Quote(QuoteTick),
    Trade(TradeTick),
}

impl MarketTick {
    pub fn symbol(&self) -> &str {
        match self {
            MarketTick::Quote(q) => &q.symbol,
            MarketTick::Trade(t) => &t.symbol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MarketTick::Quote(_) => "quote",
            MarketTick::Trade(_) => "trade",
        }
    }
}

impl RealtimeEvent {
    /// Convert into a subscriber tick; `None` for non-tick events.
    pub fn into_tick(self) -> Option<MarketTick> {
        match self {
            RealtimeEvent::Quote(q) => Some(MarketTick::Quote(q)),
            RealtimeEvent::Trade(t) => Some(MarketTick::Trade(t)),
            RealtimeEvent::Status(_) | RealtimeEvent::Other => None,
        }
    }
}

/// Inputs for Black-Scholes pricing
#[derive(Debug, Clone, Copy)]
pub struct BSInputs {
    /// Spot price of the underlying
    pub spot: f64,
    pub strike: f64,
    /// Time to expiry (in years)
    pub time: f64,
    /// Implied volatility (as decimal, e.g., 0.25 = 25%)
    pub vol: f64,
    pub rate: f64,
    pub contract_type: ContractType,
}

impl BSInputs {
    /// Clamp inputs to safe ranges
    pub fn validate(&mut self) {
        self.time = self.time.max(1.0 / (365.25 * 24.0 * 3600.0));
        self.vol = self.vol.clamp(0.01, 5.0);
        self.spot = self.spot.max(1e-6);
        self.strike = self.strike.max(1e-6);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_type_db_strings() {
        assert_eq!(ContractType::Call.as_db_str(), "call");
        assert_eq!(ContractType::from_db_str("PUT"), Some(ContractType::Put));
        assert_eq!(ContractType::from_db_str("C"), Some(ContractType::Call));
        assert_eq!(ContractType::from_db_str("other"), None);
    }

    #[test]
    fn test_realtime_event_discriminator() {
        let frame = r#"[
            {"ev":"Q","sym":"O:SPY251219C00550000","bp":1.2,"ap":1.3,"bs":10,"as":12,"t":1700000000000},
            {"ev":"T","sym":"O:SPY251219C00550000","p":1.25,"s":3,"x":4,"t":1700000000001},
            {"ev":"status","status":"auth_success","message":"authenticated"},
            {"ev":"AM","sym":"SPY"}
        ]"#;

        let events: Vec<RealtimeEvent> = serde_json::from_str(frame).unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], RealtimeEvent::Quote(ref q) if q.ask_price == 1.3));
        assert!(matches!(events[1], RealtimeEvent::Trade(ref t) if t.price == 1.25));
        assert!(matches!(events[2], RealtimeEvent::Status(ref s) if s.status == "auth_success"));
        assert_eq!(events[3], RealtimeEvent::Other);

        let ticks: Vec<MarketTick> = events.into_iter().filter_map(RealtimeEvent::into_tick).collect();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].kind(), "quote");
        assert_eq!(ticks[1].symbol(), "O:SPY251219C00550000");
    }
}
