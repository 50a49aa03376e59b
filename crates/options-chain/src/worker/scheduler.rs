//! Interval loop driving [`ChainSyncService::sync_all`].

use super::service::{ChainSyncService, SyncReport};
use crate::error::ChainResult;
use config::SyncConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

pub struct SyncWorker {
    service: Arc<ChainSyncService>,
    tickers: Vec<String>,
    interval: Duration,
    run_on_startup: bool,
}

impl SyncWorker {
    pub fn new(service: Arc<ChainSyncService>, tickers: Vec<String>, interval: Duration, run_on_startup: bool) -> Self {
        Self {
            service,
            tickers,
            interval: interval.max(Duration::from_secs(1)),
            run_on_startup,
        }
    }

    pub fn from_config(service: Arc<ChainSyncService>, config: &SyncConfig) -> Self {
        Self::new(
            service,
            config.tickers.clone(),
            Duration::from_secs(config.interval_seconds),
            config.run_on_startup,
        )
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tickers = self.tickers.len(),
            interval_secs = self.interval.as_secs(),
            run_on_startup = self.run_on_startup,
            "Starting SyncWorker"
        );

        if self.tickers.is_empty() {
            warn!("No tickers configured, SyncWorker has nothing to do");
        }

        if self.run_on_startup {
            self.run_cycle().await;
        }

        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timer.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("SyncWorker shutting down");
                        return;
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Vec<(String, ChainResult<SyncReport>)> {
        let results = self.service.sync_all(&self.tickers).await;
        for (ticker, result) in &results {
            if let Err(e) = result {
                error!(ticker = %ticker, error = %e, "Ticker sync aborted");
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ExpiryClassifier;
    use crate::gateway::PersistenceGateway;
    use crate::store::InMemoryChainStore;
    use async_trait::async_trait;
    use config::ConfigurationStatus;
    use market_data::{ContractDescriptor, OptionsDataProvider, SnapshotRecord};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl OptionsDataProvider for CountingProvider {
        async fn fetch_contracts(&self, _underlying: &str) -> Vec<ContractDescriptor> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }

        async fn fetch_snapshot(&self, _underlying: &str) -> Vec<SnapshotRecord> {
            Vec::new()
        }

        async fn fetch_underlying_price(&self, _ticker: &str) -> Option<f64> {
            None
        }

        async fn fetch_underlying_prices(&self, _tickers: &[String]) -> HashMap<String, f64> {
            HashMap::new()
        }
    }

    fn worker(provider: Arc<CountingProvider>, run_on_startup: bool) -> SyncWorker {
        let service = ChainSyncService::new(
            provider,
            PersistenceGateway::new(Arc::new(InMemoryChainStore::new()), 500),
            ExpiryClassifier::local(),
            ConfigurationStatus::Live,
        );
        SyncWorker::new(
            Arc::new(service),
            vec!["SPY".to_string()],
            Duration::from_secs(60),
            run_on_startup,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_startup_and_each_interval_until_shutdown() {
        let provider = Arc::new(CountingProvider::default());
        let worker = worker(provider.clone(), true);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_startup_run_when_disabled() {
        let provider = Arc::new(CountingProvider::default());
        let worker = worker(provider.clone(), false);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 0);

        drop(tx);
        handle.await.unwrap();
    }
}
