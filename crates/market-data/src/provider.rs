//! Provider seam used by the sync pipeline and the read facade.

use crate::types::{ContractDescriptor, SnapshotRecord};
use async_trait::async_trait;
use std::collections::HashMap;

/// Contracts and their snapshot for one underlying.
#[derive(Debug, Clone, Default)]
pub struct ChainData {
    pub contracts: Vec<ContractDescriptor>,
    /// Snapshot records keyed by contract ticker.
    pub snapshot: HashMap<String, SnapshotRecord>,
}

/// Source of options reference and market data.
///
/// Implementations never fail: errors are logged and an empty result is
/// returned, so callers only ever see "no data".
#[async_trait]
pub trait OptionsDataProvider: Send + Sync {
    /// Listed contracts for an underlying, within the configured horizon.
    async fn fetch_contracts(&self, underlying: &str) -> Vec<ContractDescriptor>;

    /// Latest market data for every contract of an underlying.
    async fn fetch_snapshot(&self, underlying: &str) -> Vec<SnapshotRecord>;

    async fn fetch_underlying_price(&self, ticker: &str) -> Option<f64>;

    /// Prices for several underlyings in one call. Missing symbols are absent.
    async fn fetch_underlying_prices(&self, tickers: &[String]) -> HashMap<String, f64>;

    /// Contracts and snapshot fetched concurrently.
    async fn fetch_chain(&self, underlying: &str) -> ChainData {
        let (contracts, snapshot) = tokio::join!(
            self.fetch_contracts(underlying),
            self.fetch_snapshot(underlying)
        );

        ChainData {
            contracts,
            snapshot: index_by_contract(snapshot),
        }
    }
}

/// Key snapshot records by contract ticker. Later duplicates win.
pub fn index_by_contract(records: Vec<SnapshotRecord>) -> HashMap<String, SnapshotRecord> {
    records
        .into_iter()
        .map(|record| (record.contract_ticker.clone(), record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_by_contract() {
        let records = vec![
            SnapshotRecord {
                contract_ticker: "O:A".to_string(),
                bid: Some(1.0),
                ..Default::default()
            },
            SnapshotRecord {
                contract_ticker: "O:B".to_string(),
                ..Default::default()
            },
            SnapshotRecord {
                contract_ticker: "O:A".to_string(),
                bid: Some(2.0),
                ..Default::default()
            },
        ];

        let index = index_by_contract(records);
        assert_eq!(index.len(), 2);
        assert_eq!(index["O:A"].bid, Some(2.0));
    }
}
