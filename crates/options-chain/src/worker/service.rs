//! Chain sync for one or many underlyings.
//!
//! Order within a ticker is fixed: fetch, normalize, upsert contracts, then
//! aggregate and upsert expiries from the committed rows.

use crate::classifier::ExpiryClassifier;
use crate::error::{ChainError, ChainResult};
use crate::gateway::{PersistenceGateway, UpsertReport};
use crate::normalizer::normalize;
use crate::types::{LiquidTicker, LiveOptionsContract};
use chrono::{NaiveDate, Utc};
use config::ConfigurationStatus;
use futures::stream::{self, StreamExt};
use market_data::{ChainData, OptionsDataProvider};
use observability::SyncMetrics;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Why a ticker sync wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unconfigured,
    NoContracts,
    NoUnderlyingPrice,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Unconfigured => "unconfigured",
            SkipReason::NoContracts => "no_contracts",
            SkipReason::NoUnderlyingPrice => "no_underlying_price",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub ticker: String,
    pub skipped: Option<SkipReason>,
    pub fetched: usize,
    pub snapshots: usize,
    pub normalized: usize,
    pub underlying_price: Option<f64>,
    pub contracts: UpsertReport,
    pub expiries: UpsertReport,
}

impl SyncReport {
    fn skipped(ticker: &str, reason: SkipReason) -> Self {
        Self {
            ticker: ticker.to_string(),
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn failed_batches(&self) -> usize {
        self.contracts.failed_batches + self.expiries.failed_batches
    }
}

pub struct ChainSyncService {
    provider: Arc<dyn OptionsDataProvider>,
    gateway: PersistenceGateway,
    classifier: ExpiryClassifier,
    status: ConfigurationStatus,
    max_concurrent: usize,
    metrics: SyncMetrics,
}

impl ChainSyncService {
    pub fn new(
        provider: Arc<dyn OptionsDataProvider>,
        gateway: PersistenceGateway,
        classifier: ExpiryClassifier,
        status: ConfigurationStatus,
    ) -> Self {
        Self {
            provider,
            gateway,
            classifier,
            status,
            max_concurrent: 4,
            metrics: SyncMetrics::new(),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn sync_ticker(&self, ticker: &str) -> ChainResult<SyncReport> {
        self.sync_ticker_at(ticker, Utc::now().date_naive()).await
    }

    /// Sync one underlying.
    ///
    /// Only corrupt input (`InvalidStrike`, `NonFiniteValue`) returns `Err`,
    /// and it does so before anything is written.
    #[instrument(skip(self))]
    pub async fn sync_ticker_at(&self, ticker: &str, today: NaiveDate) -> ChainResult<SyncReport> {
        let ticker = ticker.trim().to_ascii_uppercase();

        if !self.status.is_live() {
            debug!(ticker = %ticker, status = self.status.as_str(), "Provider not configured, skipping sync");
            return Ok(SyncReport::skipped(&ticker, SkipReason::Unconfigured));
        }

        let started = Instant::now();
        let ChainData { contracts, snapshot } = self.provider.fetch_chain(&ticker).await;
        self.metrics.record_fetched(contracts.len());

        let mut report = SyncReport {
            ticker: ticker.clone(),
            fetched: contracts.len(),
            snapshots: snapshot.len(),
            ..Default::default()
        };

        if contracts.is_empty() {
            info!(ticker = %ticker, "Provider returned no contracts");
            report.skipped = Some(SkipReason::NoContracts);
            return Ok(report);
        }

        let underlying_price = match snapshot
            .values()
            .filter_map(|s| s.underlying_price)
            .find(|p| p.is_finite() && *p > 0.0)
        {
            Some(price) => Some(price),
            None => self
                .provider
                .fetch_underlying_price(&ticker)
                .await
                .filter(|p| p.is_finite() && *p > 0.0),
        };
        let Some(underlying_price) = underlying_price else {
            warn!(ticker = %ticker, "No underlying price, skipping sync");
            report.skipped = Some(SkipReason::NoUnderlyingPrice);
            return Ok(report);
        };
        report.underlying_price = Some(underlying_price);

        let mut normalized: Vec<LiveOptionsContract> = Vec::with_capacity(contracts.len());
        for descriptor in &contracts {
            match normalize(descriptor, snapshot.get(&descriptor.ticker), underlying_price) {
                Ok(contract) => normalized.push(contract),
                Err(e) if e.is_fatal() => {
                    error!(ticker = %ticker, contract = %descriptor.ticker, error = %e, "Corrupt contract data, aborting sync");
                    return Err(e);
                }
                Err(e) => warn!(ticker = %ticker, error = %e, "Skipping contract"),
            }
        }
        report.normalized = normalized.len();

        report.contracts = self.gateway.upsert_contracts(&normalized).await;

        let expirations: BTreeSet<NaiveDate> =
            normalized.iter().map(|c| c.expiration_date).collect();
        let mut expiries = Vec::with_capacity(expirations.len());
        for expiration in expirations {
            match self
                .classifier
                .build_expiry(self.gateway.store().as_ref(), &ticker, expiration, today)
                .await
            {
                Ok(expiry) => expiries.push(expiry),
                Err(e) => warn!(ticker = %ticker, %expiration, error = %e, "Expiry aggregation failed"),
            }
        }
        report.expiries = self.gateway.upsert_expiries(&expiries).await;

        self.refresh_ticker(&ticker, underlying_price).await;

        self.metrics.record_sync(started.elapsed());
        info!(
            ticker = %ticker,
            fetched = report.fetched,
            normalized = report.normalized,
            contracts = report.contracts.rows,
            expiries = report.expiries.rows,
            failed_batches = report.failed_batches(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync complete"
        );
        Ok(report)
    }

    async fn refresh_ticker(&self, ticker: &str, price: f64) {
        let now = Utc::now();
        let row = match self.gateway.store().get_ticker(ticker).await {
            Ok(Some(row)) => row.with_price(price, now),
            Ok(None) => LiquidTicker::from_price(ticker, price, now),
            Err(e) => {
                warn!(ticker, error = %e, "Ticker read failed, writing a bare row");
                LiquidTicker::from_price(ticker, price, now)
            }
        };
        self.gateway.upsert_tickers(&[row]).await;
    }

    /// Sync many underlyings with at most `max_concurrent` in flight.
    pub async fn sync_all(&self, tickers: &[String]) -> Vec<(String, ChainResult<SyncReport>)> {
        info!(tickers = tickers.len(), max_concurrent = self.max_concurrent, "Starting sync run");

        let results: Vec<(String, ChainResult<SyncReport>)> = stream::iter(tickers.iter().cloned())
            .map(|ticker| async move {
                let result = self.sync_ticker(&ticker).await;
                (ticker, result)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            error!(failed, total = results.len(), "Sync run finished with aborted tickers");
        } else {
            info!(total = results.len(), "Sync run finished");
        }
        results
    }
}

/// Shortcut for callers that only need to know whether a run aborted anywhere.
pub fn first_error(results: &[(String, ChainResult<SyncReport>)]) -> Option<&ChainError> {
    results.iter().find_map(|(_, r)| r.as_ref().err())
}
