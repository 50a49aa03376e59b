//! Chain storage traits and the in-memory implementation.
//!
//! `ChainStore` abstracts the three persisted collections: contracts keyed by
//! contract ticker, expiries keyed by (expiration date, underlying) and
//! liquid tickers keyed by symbol. Every write is an upsert; nothing is deleted.

use crate::error::ChainResult;
use crate::types::{ExpiryAggregate, LiquidTicker, LiveOptionsContract, OptionsExpiry};
use async_trait::async_trait;
use chrono::NaiveDate;
use market_data::ContractType;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Query filters for listing contracts.
#[derive(Debug, Clone, Default)]
pub struct ContractQuery {
    pub underlying: Option<String>,
    pub contract_type: Option<ContractType>,
    /// Exact expiration date.
    pub expiration_date: Option<NaiveDate>,
    /// Expiration on or after this date.
    pub expiring_from: Option<NaiveDate>,
    pub strike_min: Option<f64>,
    pub strike_max: Option<f64>,
    pub limit: Option<usize>,
}

impl ContractQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_underlying(mut self, underlying: impl Into<String>) -> Self {
        self.underlying = Some(underlying.into());
        self
    }

    pub fn with_contract_type(mut self, contract_type: ContractType) -> Self {
        self.contract_type = Some(contract_type);
        self
    }

    pub fn with_expiration(mut self, date: NaiveDate) -> Self {
        self.expiration_date = Some(date);
        self
    }

    /// Exclude contracts that expired before `date`.
    pub fn expiring_from(mut self, date: NaiveDate) -> Self {
        self.expiring_from = Some(date);
        self
    }

    pub fn with_strike_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.strike_min = min;
        self.strike_max = max;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, contract: &LiveOptionsContract) -> bool {
        if let Some(ref underlying) = self.underlying {
            if !contract.underlying_ticker.eq_ignore_ascii_case(underlying) {
                return false;
            }
        }

        if let Some(contract_type) = self.contract_type {
            if contract.contract_type != contract_type {
                return false;
            }
        }

        if let Some(date) = self.expiration_date {
            if contract.expiration_date != date {
                return false;
            }
        }

        if let Some(from) = self.expiring_from {
            if contract.expiration_date < from {
                return false;
            }
        }

        if let Some(min) = self.strike_min {
            if contract.strike_price < min {
                return false;
            }
        }

        if let Some(max) = self.strike_max {
            if contract.strike_price > max {
                return false;
            }
        }

        true
    }
}

/// Chain ordering used by every listing: expiry, strike, then calls before puts.
pub fn chain_order(a: &LiveOptionsContract, b: &LiveOptionsContract) -> Ordering {
    a.expiration_date
        .cmp(&b.expiration_date)
        .then_with(|| {
            a.strike_price
                .partial_cmp(&b.strike_price)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.contract_type.code().cmp(b.contract_type.code()))
}

/// Persistence for contracts, expiries and liquid tickers.
///
/// Upserts return the number of rows written. Conflicting keys overwrite,
/// so re-running a sync is idempotent.
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn upsert_contracts(&self, contracts: &[LiveOptionsContract]) -> ChainResult<u64>;

    async fn upsert_expiries(&self, expiries: &[OptionsExpiry]) -> ChainResult<u64>;

    async fn upsert_tickers(&self, tickers: &[LiquidTicker]) -> ChainResult<u64>;

    /// Contracts matching `query`, in [`chain_order`].
    async fn list_contracts(&self, query: &ContractQuery) -> ChainResult<Vec<LiveOptionsContract>>;

    /// Expiries for an underlying, nearest first.
    async fn list_expiries(&self, underlying: &str) -> ChainResult<Vec<OptionsExpiry>>;

    async fn get_ticker(&self, ticker: &str) -> ChainResult<Option<LiquidTicker>>;

    async fn list_tickers(&self, active_only: bool) -> ChainResult<Vec<LiquidTicker>>;

    /// Sum call/put volume and open interest of persisted contracts for one expiry.
    async fn aggregate_expiry(
        &self,
        underlying: &str,
        expiration_date: NaiveDate,
    ) -> ChainResult<ExpiryAggregate> {
        let query = ContractQuery::new()
            .with_underlying(underlying)
            .with_expiration(expiration_date);
        let contracts = self.list_contracts(&query).await?;
        Ok(ExpiryAggregate::from_contracts(&contracts))
    }

    async fn has_contracts(&self, underlying: &str) -> ChainResult<bool> {
        let query = ContractQuery::new().with_underlying(underlying).with_limit(1);
        Ok(!self.list_contracts(&query).await?.is_empty())
    }
}

type ExpiryKey = (NaiveDate, String);

/// In-memory [`ChainStore`]. Default backend and test double.
#[derive(Debug, Clone, Default)]
pub struct InMemoryChainStore {
    contracts: Arc<RwLock<HashMap<String, LiveOptionsContract>>>,
    expiries: Arc<RwLock<HashMap<ExpiryKey, OptionsExpiry>>>,
    tickers: Arc<RwLock<HashMap<String, LiquidTicker>>>,
}

impl InMemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contract_count(&self) -> usize {
        self.contracts.read().len()
    }

    pub fn expiry_count(&self) -> usize {
        self.expiries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.read().is_empty()
    }
}

#[async_trait]
impl ChainStore for InMemoryChainStore {
    async fn upsert_contracts(&self, contracts: &[LiveOptionsContract]) -> ChainResult<u64> {
        let mut map = self.contracts.write();
        for contract in contracts {
            map.insert(contract.contract_ticker.clone(), contract.clone());
        }
        Ok(contracts.len() as u64)
    }

    async fn upsert_expiries(&self, expiries: &[OptionsExpiry]) -> ChainResult<u64> {
        let mut map = self.expiries.write();
        for expiry in expiries {
            let key = (expiry.expiration_date, expiry.underlying_ticker.to_ascii_uppercase());
            map.insert(key, expiry.clone());
        }
        Ok(expiries.len() as u64)
    }

    async fn upsert_tickers(&self, tickers: &[LiquidTicker]) -> ChainResult<u64> {
        let mut map = self.tickers.write();
        for ticker in tickers {
            map.insert(ticker.ticker.to_ascii_uppercase(), ticker.clone());
        }
        Ok(tickers.len() as u64)
    }

    async fn list_contracts(&self, query: &ContractQuery) -> ChainResult<Vec<LiveOptionsContract>> {
        let mut results: Vec<LiveOptionsContract> = self
            .contracts
            .read()
            .values()
            .filter(|c| query.matches(c))
            .cloned()
            .collect();

        results.sort_by(chain_order);
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn list_expiries(&self, underlying: &str) -> ChainResult<Vec<OptionsExpiry>> {
        let mut results: Vec<OptionsExpiry> = self
            .expiries
            .read()
            .values()
            .filter(|e| e.underlying_ticker.eq_ignore_ascii_case(underlying))
            .cloned()
            .collect();

        results.sort_by_key(|e| e.expiration_date);
        Ok(results)
    }

    async fn get_ticker(&self, ticker: &str) -> ChainResult<Option<LiquidTicker>> {
        Ok(self.tickers.read().get(&ticker.to_ascii_uppercase()).cloned())
    }

    async fn list_tickers(&self, active_only: bool) -> ChainResult<Vec<LiquidTicker>> {
        let mut results: Vec<LiquidTicker> = self
            .tickers
            .read()
            .values()
            .filter(|t| !active_only || t.is_active)
            .cloned()
            .collect();

        results.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(results)
    }
}
