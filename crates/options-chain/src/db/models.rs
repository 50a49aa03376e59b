//! Database row models for the chain tables.
//!
//! Rows map one-to-one onto `options_contracts`, `options_expiries` and
//! `liquid_tickers` and convert to and from the domain types.

use crate::error::{ChainError, ChainResult};
use crate::types::{ExpiryType, LiquidTicker, LiveOptionsContract, OptionsExpiry};
use chrono::{DateTime, NaiveDate, Utc};
use market_data::ContractType;
use sqlx::FromRow;

fn to_db_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db_count(value: i64) -> u64 {
    value.max(0) as u64
}

#[derive(Debug, Clone, FromRow)]
pub struct ContractRow {
    pub contract_ticker: String,
    pub underlying_ticker: String,
    pub contract_type: String,
    pub strike_price: f64,
    pub expiration_date: NaiveDate,
    pub bid: f64,
    pub ask: f64,
    pub last_price: f64,
    pub mark: f64,
    pub volume: i64,
    pub open_interest: i64,
    pub implied_volatility: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
    pub intrinsic_value: f64,
    pub time_value: f64,
    pub bid_ask_spread: f64,
    pub last_trade_timestamp: Option<DateTime<Utc>>,
}

impl ContractRow {
    /// Columns in bind order, shared by INSERT and SELECT.
    pub const COLUMNS: &'static [&'static str] = &[
        "contract_ticker",
        "underlying_ticker",
        "contract_type",
        "strike_price",
        "expiration_date",
        "bid",
        "ask",
        "last_price",
        "mark",
        "volume",
        "open_interest",
        "implied_volatility",
        "delta",
        "gamma",
        "theta",
        "vega",
        "rho",
        "intrinsic_value",
        "time_value",
        "bid_ask_spread",
        "last_trade_timestamp",
    ];

    pub fn from_domain(contract: &LiveOptionsContract) -> Self {
        Self {
            contract_ticker: contract.contract_ticker.clone(),
            underlying_ticker: contract.underlying_ticker.to_ascii_uppercase(),
            contract_type: contract.contract_type.as_db_str().to_string(),
            strike_price: contract.strike_price,
            expiration_date: contract.expiration_date,
            bid: contract.bid,
            ask: contract.ask,
            last_price: contract.last,
            mark: contract.mark,
            volume: to_db_count(contract.volume),
            open_interest: to_db_count(contract.open_interest),
            implied_volatility: contract.implied_volatility,
            delta: contract.delta,
            gamma: contract.gamma,
            theta: contract.theta,
            vega: contract.vega,
            rho: contract.rho,
            intrinsic_value: contract.intrinsic_value,
            time_value: contract.time_value,
            bid_ask_spread: contract.bid_ask_spread,
            last_trade_timestamp: contract.last_trade_timestamp,
        }
    }

    pub fn to_domain(self) -> ChainResult<LiveOptionsContract> {
        let contract_type = ContractType::from_db_str(&self.contract_type).ok_or_else(|| {
            ChainError::Storage(format!(
                "contract {} has unknown type '{}'",
                self.contract_ticker, self.contract_type
            ))
        })?;

        Ok(LiveOptionsContract {
            contract_ticker: self.contract_ticker,
            underlying_ticker: self.underlying_ticker,
            contract_type,
            strike_price: self.strike_price,
            expiration_date: self.expiration_date,
            bid: self.bid,
            ask: self.ask,
            last: self.last_price,
            mark: self.mark,
            volume: from_db_count(self.volume),
            open_interest: from_db_count(self.open_interest),
            implied_volatility: self.implied_volatility,
            delta: self.delta,
            gamma: self.gamma,
            theta: self.theta,
            vega: self.vega,
            rho: self.rho,
            intrinsic_value: self.intrinsic_value,
            time_value: self.time_value,
            bid_ask_spread: self.bid_ask_spread,
            last_trade_timestamp: self.last_trade_timestamp,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ExpiryRow {
    pub expiration_date: NaiveDate,
    pub underlying_ticker: String,
    pub expiry_type: String,
    pub days_to_expiry: i64,
    pub call_volume: i64,
    pub put_volume: i64,
    pub call_open_interest: i64,
    pub put_open_interest: i64,
}

impl ExpiryRow {
    pub const COLUMNS: &'static [&'static str] = &[
        "expiration_date",
        "underlying_ticker",
        "expiry_type",
        "days_to_expiry",
        "call_volume",
        "put_volume",
        "call_open_interest",
        "put_open_interest",
    ];

    pub fn from_domain(expiry: &OptionsExpiry) -> Self {
        Self {
            expiration_date: expiry.expiration_date,
            underlying_ticker: expiry.underlying_ticker.to_ascii_uppercase(),
            expiry_type: expiry.expiry_type.as_str().to_string(),
            days_to_expiry: expiry.days_to_expiry,
            call_volume: to_db_count(expiry.call_volume),
            put_volume: to_db_count(expiry.put_volume),
            call_open_interest: to_db_count(expiry.call_open_interest),
            put_open_interest: to_db_count(expiry.put_open_interest),
        }
    }

    pub fn to_domain(self) -> ChainResult<OptionsExpiry> {
        let expiry_type = ExpiryType::parse(&self.expiry_type).ok_or_else(|| {
            ChainError::Storage(format!(
                "expiry {} {} has unknown type '{}'",
                self.underlying_ticker, self.expiration_date, self.expiry_type
            ))
        })?;

        Ok(OptionsExpiry {
            underlying_ticker: self.underlying_ticker,
            expiration_date: self.expiration_date,
            expiry_type,
            days_to_expiry: self.days_to_expiry,
            call_volume: from_db_count(self.call_volume),
            put_volume: from_db_count(self.put_volume),
            call_open_interest: from_db_count(self.call_open_interest),
            put_open_interest: from_db_count(self.put_open_interest),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TickerRow {
    pub ticker: String,
    pub name: String,
    pub sector: String,
    pub current_price: f64,
    pub avg_volume: i64,
    pub avg_open_interest: i64,
    pub is_active: bool,
    pub last_update: DateTime<Utc>,
}

impl TickerRow {
    pub const COLUMNS: &'static [&'static str] = &[
        "ticker",
        "name",
        "sector",
        "current_price",
        "avg_volume",
        "avg_open_interest",
        "is_active",
        "last_update",
    ];

    pub fn from_domain(ticker: &LiquidTicker) -> Self {
        Self {
            ticker: ticker.ticker.to_ascii_uppercase(),
            name: ticker.name.clone(),
            sector: ticker.sector.clone(),
            current_price: ticker.current_price,
            avg_volume: to_db_count(ticker.avg_volume),
            avg_open_interest: to_db_count(ticker.avg_open_interest),
            is_active: ticker.is_active,
            last_update: ticker.last_update,
        }
    }

    pub fn to_domain(self) -> LiquidTicker {
        LiquidTicker {
            ticker: self.ticker,
            name: self.name,
            sector: self.sector,
            current_price: self.current_price,
            avg_volume: from_db_count(self.avg_volume),
            avg_open_interest: from_db_count(self.avg_open_interest),
            is_active: self.is_active,
            last_update: self.last_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::contract;
    use crate::types::ExpiryAggregate;

    #[test]
    fn test_contract_row_conversion() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 20).unwrap();
        let c = contract("O:SPY250620P00540000", "spy", ContractType::Put, 540.0, date);

        let row = ContractRow::from_domain(&c);
        assert_eq!(row.contract_type, "put");
        assert_eq!(row.underlying_ticker, "SPY");
        assert_eq!(row.last_price, c.last);

        let back = row.to_domain().unwrap();
        assert_eq!(back.contract_type, ContractType::Put);
        assert_eq!(back.volume, c.volume);
    }

    #[test]
    fn test_unknown_types_are_storage_errors() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 20).unwrap();
        let mut row = ContractRow::from_domain(&contract("O:X", "SPY", ContractType::Call, 1.0, date));
        row.contract_type = "straddle".to_string();
        assert!(matches!(row.to_domain(), Err(ChainError::Storage(_))));

        let mut row = ExpiryRow::from_domain(&OptionsExpiry::new(
            "SPY",
            date,
            ExpiryType::ZeroDte,
            0,
            ExpiryAggregate::default(),
        ));
        assert_eq!(row.expiry_type, "0DTE");
        row.expiry_type = "Yearly".to_string();
        assert!(row.to_domain().is_err());
    }

    #[test]
    fn test_expiry_row_round_trip() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 20).unwrap();
        let expiry = OptionsExpiry::new(
            "qqq",
            date,
            ExpiryType::Quarterly,
            98,
            ExpiryAggregate {
                call_volume: 1_200,
                put_volume: 800,
                call_open_interest: u64::MAX,
                put_open_interest: 0,
            },
        );

        let row = ExpiryRow::from_domain(&expiry);
        assert_eq!(row.underlying_ticker, "QQQ");
        assert_eq!(row.expiry_type, "Quarterly");
        assert_eq!(row.call_open_interest, i64::MAX);

        let back = row.to_domain().unwrap();
        assert_eq!(back.underlying_ticker, "QQQ");
        assert_eq!(back.expiration_date, date);
        assert_eq!(back.expiry_type, ExpiryType::Quarterly);
        assert_eq!(back.days_to_expiry, 98);
        assert_eq!(back.call_volume, 1_200);
        assert_eq!(back.put_volume, 800);
        assert_eq!(back.call_open_interest, i64::MAX as u64);
    }

    #[test]
    fn test_every_expiry_type_survives_storage() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 20).unwrap();
        for kind in ExpiryType::ALL {
            let row = ExpiryRow::from_domain(&OptionsExpiry::new("SPY", date, kind, 1, ExpiryAggregate::default()));
            assert_eq!(row.to_domain().unwrap().expiry_type, kind);
        }
    }

    #[test]
    fn test_ticker_row_round_trip() {
        let now = Utc::now();
        let mut ticker = LiquidTicker::from_price("iwm", 210.5, now);
        ticker.avg_volume = 25_000_000;
        ticker.avg_open_interest = 1_000;
        ticker.is_active = false;

        let row = TickerRow::from_domain(&ticker);
        assert_eq!(row.ticker, "IWM");
        assert_eq!(row.name, "iwm");

        let back = row.to_domain();
        assert_eq!(back.ticker, "IWM");
        assert_eq!(back.current_price, 210.5);
        assert_eq!(back.avg_volume, 25_000_000);
        assert_eq!(back.avg_open_interest, 1_000);
        assert!(!back.is_active);
        assert_eq!(back.last_update, now);
    }

    #[test]
    fn test_negative_stored_counts_read_as_zero() {
        let mut row = TickerRow::from_domain(&LiquidTicker::from_price("SPY", 550.0, Utc::now()));
        row.avg_volume = -5;
        row.avg_open_interest = i64::MIN;
        let back = row.to_domain();
        assert_eq!(back.avg_volume, 0);
        assert_eq!(back.avg_open_interest, 0);

        let date = NaiveDate::from_ymd_opt(2025, 6, 20).unwrap();
        let mut row = ContractRow::from_domain(&contract("O:X", "SPY", ContractType::Call, 1.0, date));
        row.volume = -1;
        assert_eq!(row.to_domain().unwrap().volume, 0);
    }

    #[test]
    fn test_column_lists_match_bind_counts() {
        assert_eq!(ContractRow::COLUMNS.len(), 21);
        assert_eq!(ExpiryRow::COLUMNS.len(), 8);
        assert_eq!(TickerRow::COLUMNS.len(), 8);
    }
}
