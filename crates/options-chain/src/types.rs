//! Domain types for persisted options chains.

use chrono::{DateTime, NaiveDate, Utc};
use market_data::ContractType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One options contract's current state.
///
/// Upserted by `contract_ticker`; never deleted. Expired contracts are
/// filtered out at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveOptionsContract {
    pub contract_ticker: String,
    pub underlying_ticker: String,
    pub contract_type: ContractType,
    pub strike_price: f64,
    pub expiration_date: NaiveDate,

    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub mark: f64,
    pub volume: u64,
    pub open_interest: u64,
    pub implied_volatility: f64,

    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,

    pub intrinsic_value: f64,
    pub time_value: f64,
    /// `ask - bid`, not clamped. Zero or negative means no usable quote.
    pub bid_ask_spread: f64,
    pub last_trade_timestamp: Option<DateTime<Utc>>,
}

impl LiveOptionsContract {
    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        days_between(today, self.expiration_date)
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date < today
    }

    pub fn is_call(&self) -> bool {
        self.contract_type == ContractType::Call
    }
}

/// Calendar days from `today` to `expiration` (negative once expired).
pub fn days_between(today: NaiveDate, expiration: NaiveDate) -> i64 {
    (expiration - today).num_days()
}

/// An underlying eligible for chain sync, doubling as a price cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidTicker {
    pub ticker: String,
    pub name: String,
    pub sector: String,
    pub current_price: f64,
    pub avg_volume: u64,
    pub avg_open_interest: u64,
    pub is_active: bool,
    pub last_update: DateTime<Utc>,
}

impl LiquidTicker {
    /// A bare row for a symbol seen only through a price lookup.
    pub fn from_price(ticker: &str, price: f64, now: DateTime<Utc>) -> Self {
        Self {
            ticker: ticker.to_string(),
            name: ticker.to_string(),
            sector: "Unknown".to_string(),
            current_price: price,
            avg_volume: 0,
            avg_open_interest: 0,
            is_active: true,
            last_update: now,
        }
    }

    /// Cached price is usable if positive and younger than `ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.current_price > 0.0 && now - self.last_update <= ttl
    }

    pub fn with_price(mut self, price: f64, now: DateTime<Utc>) -> Self {
        self.current_price = price;
        self.last_update = now;
        self
    }
}

/// Maturity bucket of an expiration date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExpiryType {
    #[serde(rename = "0DTE")]
    ZeroDte,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    #[serde(rename = "LEAPS")]
    Leaps,
}

impl ExpiryType {
    pub const ALL: [ExpiryType; 6] = [
        ExpiryType::ZeroDte,
        ExpiryType::Daily,
        ExpiryType::Weekly,
        ExpiryType::Monthly,
        ExpiryType::Quarterly,
        ExpiryType::Leaps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryType::ZeroDte => "0DTE",
            ExpiryType::Daily => "Daily",
            ExpiryType::Weekly => "Weekly",
            ExpiryType::Monthly => "Monthly",
            ExpiryType::Quarterly => "Quarterly",
            ExpiryType::Leaps => "LEAPS",
        }
    }

    /// Case-insensitive parse of the stored label.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for ExpiryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExpiryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            format!(
                "unknown expiry type '{}', expected one of 0DTE, Daily, Weekly, Monthly, Quarterly, LEAPS",
                s
            )
        })
    }
}

/// Summed call/put activity for one (underlying, expiry).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryAggregate {
    pub call_volume: u64,
    pub put_volume: u64,
    pub call_open_interest: u64,
    pub put_open_interest: u64,
}

impl ExpiryAggregate {
    pub fn add(&mut self, contract: &LiveOptionsContract) {
        if contract.is_call() {
            self.call_volume += contract.volume;
            self.call_open_interest += contract.open_interest;
        } else {
            self.put_volume += contract.volume;
            self.put_open_interest += contract.open_interest;
        }
    }

    pub fn from_contracts<'a>(contracts: impl IntoIterator<Item = &'a LiveOptionsContract>) -> Self {
        let mut aggregate = Self::default();
        for contract in contracts {
            aggregate.add(contract);
        }
        aggregate
    }
}

/// Per-(underlying, expiration date) aggregate. Upserted on every sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsExpiry {
    pub underlying_ticker: String,
    pub expiration_date: NaiveDate,
    pub expiry_type: ExpiryType,
    pub days_to_expiry: i64,
    pub call_volume: u64,
    pub put_volume: u64,
    pub call_open_interest: u64,
    pub put_open_interest: u64,
}

impl OptionsExpiry {
    pub fn new(
        underlying_ticker: &str,
        expiration_date: NaiveDate,
        expiry_type: ExpiryType,
        days_to_expiry: i64,
        aggregate: ExpiryAggregate,
    ) -> Self {
        Self {
            underlying_ticker: underlying_ticker.to_string(),
            expiration_date,
            expiry_type,
            days_to_expiry,
            call_volume: aggregate.call_volume,
            put_volume: aggregate.put_volume,
            call_open_interest: aggregate.call_open_interest,
            put_open_interest: aggregate.put_open_interest,
        }
    }

    pub fn total_volume(&self) -> u64 {
        self.call_volume + self.put_volume
    }

    pub fn total_open_interest(&self) -> u64 {
        self.call_open_interest + self.put_open_interest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_type_labels() {
        assert_eq!(ExpiryType::ZeroDte.as_str(), "0DTE");
        assert_eq!(ExpiryType::parse("leaps"), Some(ExpiryType::Leaps));
        assert_eq!("monthly".parse::<ExpiryType>(), Ok(ExpiryType::Monthly));
        assert!("yearly".parse::<ExpiryType>().is_err());

        let json = serde_json::to_string(&ExpiryType::ZeroDte).unwrap();
        assert_eq!(json, "\"0DTE\"");
    }

    #[test]
    fn test_ticker_freshness() {
        let now = Utc::now();
        let ticker = LiquidTicker::from_price("SPY", 550.0, now - chrono::Duration::seconds(200));

        assert!(ticker.is_fresh(now, chrono::Duration::seconds(300)));
        assert!(!ticker.is_fresh(now, chrono::Duration::seconds(100)));
        assert!(!LiquidTicker::from_price("SPY", 0.0, now).is_fresh(now, chrono::Duration::seconds(300)));
    }

    #[test]
    fn test_days_between() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(days_between(today, today), 0);
        assert_eq!(days_between(today, NaiveDate::from_ymd_opt(2025, 3, 21).unwrap()), 7);
        assert_eq!(days_between(today, NaiveDate::from_ymd_opt(2025, 3, 13).unwrap()), -1);
    }
}
