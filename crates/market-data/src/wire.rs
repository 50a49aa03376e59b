//! Provider response bodies.
//!
//! Everything is optional on the wire; conversion into domain types skips
//! rows that lack the fields a record cannot exist without.

use crate::types::{ContractDescriptor, ContractType, Greeks, IndicatorKind, IndicatorValue, SnapshotRecord};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    pub results: Option<Vec<T>>,
    pub next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContractItem {
    ticker: Option<String>,
    underlying_ticker: Option<String>,
    contract_type: Option<String>,
    strike_price: Option<f64>,
    expiration_date: Option<String>,
    shares_per_contract: Option<f64>,
    exercise_style: Option<String>,
}

impl ContractItem {
    pub fn into_descriptor(self) -> Option<ContractDescriptor> {
        let contract_type = ContractType::from_db_str(self.contract_type.as_deref()?)?;
        let expiration_date =
            NaiveDate::parse_from_str(self.expiration_date.as_deref()?, "%Y-%m-%d").ok()?;

        Some(ContractDescriptor {
            ticker: self.ticker?,
            underlying_ticker: self.underlying_ticker?,
            contract_type,
            strike_price: self.strike_price?,
            expiration_date,
            shares_per_contract: self.shares_per_contract.map(|s| s.max(0.0) as u32),
            exercise_style: self.exercise_style,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotItem {
    details: Option<SnapshotDetails>,
    day: Option<SnapshotDay>,
    last_quote: Option<SnapshotQuote>,
    last_trade: Option<SnapshotTrade>,
    greeks: Option<SnapshotGreeks>,
    implied_volatility: Option<f64>,
    open_interest: Option<f64>,
    underlying_asset: Option<SnapshotUnderlying>,
}

#[derive(Debug, Deserialize)]
struct SnapshotDetails {
    ticker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotDay {
    close: Option<f64>,
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotQuote {
    bid: Option<f64>,
    ask: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotTrade {
    price: Option<f64>,
    /// Nanoseconds since the epoch.
    sip_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotGreeks {
    delta: Option<f64>,
    gamma: Option<f64>,
    theta: Option<f64>,
    vega: Option<f64>,
    rho: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotUnderlying {
    price: Option<f64>,
}

impl SnapshotItem {
    pub fn into_record(self) -> Option<SnapshotRecord> {
        let contract_ticker = self.details?.ticker?;
        let (last_price, last_trade_timestamp) = match self.last_trade {
            Some(trade) => (trade.price, trade.sip_timestamp.map(|ns| Utc.timestamp_nanos(ns))),
            None => (None, None),
        };

        Some(SnapshotRecord {
            contract_ticker,
            bid: self.last_quote.as_ref().and_then(|q| q.bid),
            ask: self.last_quote.as_ref().and_then(|q| q.ask),
            last_price,
            day_close: self.day.as_ref().and_then(|d| d.close),
            volume: self.day.as_ref().and_then(|d| d.volume),
            open_interest: self.open_interest,
            implied_volatility: self.implied_volatility,
            greeks: self.greeks.map(|g| Greeks {
                delta: g.delta.unwrap_or(0.0),
                gamma: g.gamma.unwrap_or(0.0),
                theta: g.theta.unwrap_or(0.0),
                vega: g.vega.unwrap_or(0.0),
                rho: g.rho.unwrap_or(0.0),
            }),
            underlying_price: self.underlying_asset.and_then(|u| u.price),
            last_trade_timestamp,
        })
    }
}

/// `/v2/aggs/ticker/{ticker}/prev`
#[derive(Debug, Deserialize)]
pub(crate) struct PreviousCloseResponse {
    #[serde(default)]
    pub results: Vec<AggregateBar>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AggregateBar {
    #[serde(rename = "c")]
    pub close: Option<f64>,
}

/// `/v2/snapshot/locale/us/markets/stocks/tickers`
#[derive(Debug, Deserialize)]
pub(crate) struct StocksSnapshotResponse {
    #[serde(default)]
    pub tickers: Vec<StockSnapshot>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StockSnapshot {
    pub ticker: String,
    day: Option<AggregateBar>,
    #[serde(rename = "prevDay")]
    prev_day: Option<AggregateBar>,
    #[serde(rename = "lastTrade")]
    last_trade: Option<StockTrade>,
}

#[derive(Debug, Deserialize)]
struct StockTrade {
    #[serde(rename = "p")]
    price: Option<f64>,
}

impl StockSnapshot {
    /// Last trade, else today's close, else yesterday's close.
    pub fn price(&self) -> Option<f64> {
        let positive = |p: Option<f64>| p.filter(|v| v.is_finite() && *v > 0.0);
        positive(self.last_trade.as_ref().and_then(|t| t.price))
            .or_else(|| positive(self.day.as_ref().and_then(|d| d.close)))
            .or_else(|| positive(self.prev_day.as_ref().and_then(|d| d.close)))
    }
}

/// `/v1/indicators/{kind}/{ticker}`
#[derive(Debug, Deserialize)]
pub(crate) struct IndicatorResponse {
    results: Option<IndicatorResults>,
}

#[derive(Debug, Deserialize)]
struct IndicatorResults {
    #[serde(default)]
    values: Vec<IndicatorPoint>,
}

#[derive(Debug, Deserialize)]
struct IndicatorPoint {
    /// Milliseconds since the epoch.
    timestamp: Option<i64>,
    value: Option<f64>,
}

impl IndicatorResponse {
    /// The newest point; the provider orders values descending.
    pub fn latest(self, kind: IndicatorKind, window: u32) -> Option<IndicatorValue> {
        let point = self.results?.values.into_iter().next()?;
        Some(IndicatorValue {
            kind,
            window,
            value: point.value?,
            timestamp: point
                .timestamp
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_item_conversion() {
        let page: Page<ContractItem> = serde_json::from_str(
            r#"{
                "results": [
                    {"ticker":"O:SPY251219C00550000","underlying_ticker":"SPY","contract_type":"call",
                     "strike_price":550,"expiration_date":"2025-12-19","shares_per_contract":100,
                     "exercise_style":"american"},
                    {"ticker":"O:SPY251219X00550000","underlying_ticker":"SPY","contract_type":"other",
                     "strike_price":550,"expiration_date":"2025-12-19"},
                    {"ticker":"O:SPY251219P00550000","underlying_ticker":"SPY","contract_type":"put",
                     "strike_price":550,"expiration_date":"not-a-date"}
                ],
                "next_url": "https://api.polygon.io/v3/reference/options/contracts?cursor=abc"
            }"#,
        )
        .unwrap();

        assert!(page.next_url.is_some());
        let descriptors: Vec<_> = page
            .results
            .unwrap_or_default()
            .into_iter()
            .filter_map(ContractItem::into_descriptor)
            .collect();

        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].contract_type, ContractType::Call);
        assert_eq!(descriptors[0].shares_per_contract, Some(100));
        assert_eq!(
            descriptors[0].expiration_date,
            NaiveDate::from_ymd_opt(2025, 12, 19).unwrap()
        );
    }

    #[test]
    fn test_snapshot_item_conversion() {
        let item: SnapshotItem = serde_json::from_str(
            r#"{
                "details": {"ticker":"O:SPY251219C00550000"},
                "day": {"close": 12.4, "volume": 1530},
                "last_quote": {"bid": 12.3, "ask": 12.5},
                "last_trade": {"price": 12.45, "sip_timestamp": 1700000000000000000},
                "greeks": {"delta": 0.52, "gamma": 0.01, "theta": -0.2, "vega": 0.6},
                "implied_volatility": 0.18,
                "open_interest": 40210,
                "underlying_asset": {"price": 551.2}
            }"#,
        )
        .unwrap();

        let record = item.into_record().unwrap();
        assert_eq!(record.contract_ticker, "O:SPY251219C00550000");
        assert_eq!(record.bid, Some(12.3));
        assert_eq!(record.volume, Some(1530.0));
        assert_eq!(record.greeks.unwrap().rho, 0.0);
        assert_eq!(record.underlying_price, Some(551.2));
        assert_eq!(record.last_trade_timestamp.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_snapshot_item_without_ticker_is_skipped() {
        let item: SnapshotItem = serde_json::from_str(r#"{"day": {"close": 1.0}}"#).unwrap();
        assert!(item.into_record().is_none());
    }

    #[test]
    fn test_stock_snapshot_price_preference() {
        let body = r#"{"tickers":[
            {"ticker":"SPY","lastTrade":{"p":551.0},"day":{"c":550.0},"prevDay":{"c":548.0}},
            {"ticker":"QQQ","lastTrade":{"p":0},"day":{"c":0},"prevDay":{"c":480.5}}
        ]}"#;
        let response: StocksSnapshotResponse = serde_json::from_str(body).unwrap();

        assert_eq!(response.tickers[0].price(), Some(551.0));
        assert_eq!(response.tickers[1].price(), Some(480.5));
    }
}
