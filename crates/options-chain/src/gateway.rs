//! Chunked, idempotent bulk writes.
//!
//! Rows go to the store in batches of at most `batch_size`. A failed batch is
//! logged and counted; later batches are still attempted.

use crate::error::ChainResult;
use crate::store::ChainStore;
use crate::types::{LiquidTicker, LiveOptionsContract, OptionsExpiry};
use async_trait::async_trait;
use config::MAX_BATCH_SIZE;
use observability::SyncMetrics;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub batches: usize,
    pub failed_batches: usize,
    /// Rows the store acknowledged.
    pub rows: u64,
}

impl UpsertReport {
    pub fn is_complete(&self) -> bool {
        self.failed_batches == 0
    }

    pub fn merge(&mut self, other: UpsertReport) {
        self.batches += other.batches;
        self.failed_batches += other.failed_batches;
        self.rows += other.rows;
    }
}

#[async_trait]
trait BatchRow: Sync + Sized {
    const KIND: &'static str;

    async fn write(store: &dyn ChainStore, rows: &[Self]) -> ChainResult<u64>;
}

#[async_trait]
impl BatchRow for LiveOptionsContract {
    const KIND: &'static str = "contracts";

    async fn write(store: &dyn ChainStore, rows: &[Self]) -> ChainResult<u64> {
        store.upsert_contracts(rows).await
    }
}

#[async_trait]
impl BatchRow for OptionsExpiry {
    const KIND: &'static str = "expiries";

    async fn write(store: &dyn ChainStore, rows: &[Self]) -> ChainResult<u64> {
        store.upsert_expiries(rows).await
    }
}

#[async_trait]
impl BatchRow for LiquidTicker {
    const KIND: &'static str = "tickers";

    async fn write(store: &dyn ChainStore, rows: &[Self]) -> ChainResult<u64> {
        store.upsert_tickers(rows).await
    }
}

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn ChainStore>,
    batch_size: usize,
    metrics: SyncMetrics,
}

impl PersistenceGateway {
    /// `batch_size` is clamped to `1..=500`.
    pub fn new(store: Arc<dyn ChainStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            metrics: SyncMetrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn upsert_contracts(&self, contracts: &[LiveOptionsContract]) -> UpsertReport {
        let report = self.write_batches(contracts).await;
        self.metrics.record_contracts_persisted(report.rows as usize);
        report
    }

    pub async fn upsert_expiries(&self, expiries: &[OptionsExpiry]) -> UpsertReport {
        let report = self.write_batches(expiries).await;
        self.metrics.record_expiries_persisted(report.rows as usize);
        report
    }

    pub async fn upsert_tickers(&self, tickers: &[LiquidTicker]) -> UpsertReport {
        self.write_batches(tickers).await
    }

    async fn write_batches<T: BatchRow>(&self, rows: &[T]) -> UpsertReport {
        let mut report = UpsertReport::default();
        if rows.is_empty() {
            return report;
        }

        let total_batches = rows.len().div_ceil(self.batch_size);
        for (index, chunk) in rows.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            match T::write(self.store.as_ref(), chunk).await {
                Ok(written) => {
                    report.rows += written;
                    debug!(kind = T::KIND, batch = index + 1, total_batches, rows = written, "Batch upserted");
                }
                Err(e) => {
                    report.failed_batches += 1;
                    error!(
                        kind = T::KIND,
                        batch = index + 1,
                        total_batches,
                        rows = chunk.len(),
                        error = %e,
                        "Batch upsert failed, continuing with remaining batches"
                    );
                }
            }
        }

        if report.failed_batches > 0 {
            self.metrics.record_failed_batches(report.failed_batches);
        }

        info!(
            kind = T::KIND,
            rows = report.rows,
            batches = report.batches,
            failed_batches = report.failed_batches,
            "Upsert complete"
        );
        report
    }
}
