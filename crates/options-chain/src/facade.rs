//! Read path for external collaborators.
//!
//! Every call returns a non-empty, well-formed result. When the provider is
//! unconfigured, storage is empty or storage fails, synthetic data is served
//! and the result is tagged [`DataSource::Synthetic`].

use crate::classifier::classify_by_days;
use crate::fallback::FallbackSynthesizer;
use crate::store::{ChainStore, ContractQuery};
use crate::types::{days_between, ExpiryType, LiquidTicker, LiveOptionsContract, OptionsExpiry};
use chrono::{NaiveDate, Utc};
use config::ConfigurationStatus;
use market_data::OptionsDataProvider;
use observability::SyncMetrics;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Synthetic,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Live => "live",
            DataSource::Synthetic => "synthetic",
        }
    }
}

/// A result tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub data: T,
    pub source: DataSource,
}

impl<T> Sourced<T> {
    pub fn live(data: T) -> Self {
        Self {
            data,
            source: DataSource::Live,
        }
    }

    pub fn synthetic(data: T) -> Self {
        Self {
            data,
            source: DataSource::Synthetic,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.source == DataSource::Synthetic
    }
}

// Stored types are computed at sync time. Once a row has aged, reclassify it
// for today with the local rule.
fn refresh_expiry(mut expiry: OptionsExpiry, today: NaiveDate) -> OptionsExpiry {
    let days = days_between(today, expiry.expiration_date);
    if days != expiry.days_to_expiry {
        expiry.days_to_expiry = days;
        expiry.expiry_type = classify_by_days(days);
    }
    expiry
}

fn strike_order(a: &LiveOptionsContract, b: &LiveOptionsContract) -> Ordering {
    a.strike_price
        .partial_cmp(&b.strike_price)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.expiration_date.cmp(&b.expiration_date))
        .then_with(|| a.contract_type.code().cmp(b.contract_type.code()))
}

pub struct DataAccessFacade {
    store: Arc<dyn ChainStore>,
    provider: Arc<dyn OptionsDataProvider>,
    synthesizer: FallbackSynthesizer,
    status: ConfigurationStatus,
    price_ttl: chrono::Duration,
    metrics: SyncMetrics,
}

impl DataAccessFacade {
    pub fn new(
        store: Arc<dyn ChainStore>,
        provider: Arc<dyn OptionsDataProvider>,
        status: ConfigurationStatus,
    ) -> Self {
        Self {
            store,
            provider,
            synthesizer: FallbackSynthesizer::new(),
            status,
            price_ttl: chrono::Duration::seconds(300),
            metrics: SyncMetrics::new(),
        }
    }

    pub fn with_price_ttl(mut self, ttl_seconds: u64) -> Self {
        self.price_ttl = chrono::Duration::seconds(ttl_seconds as i64);
        self
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Whether reads can be live at all. Synthetic-ness of a single result is
    /// on its [`Sourced::source`].
    pub fn configuration_status(&self) -> ConfigurationStatus {
        self.status
    }

    pub fn synthesizer(&self) -> &FallbackSynthesizer {
        &self.synthesizer
    }

    /// Unexpired contracts for a ticker, sorted by strike.
    pub async fn get_contracts(
        &self,
        ticker: &str,
        expiry: Option<NaiveDate>,
        expiry_type: Option<ExpiryType>,
    ) -> Sourced<Vec<LiveOptionsContract>> {
        self.get_contracts_at(ticker, expiry, expiry_type, Utc::now().date_naive())
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_contracts_at(
        &self,
        ticker: &str,
        expiry: Option<NaiveDate>,
        expiry_type: Option<ExpiryType>,
        today: NaiveDate,
    ) -> Sourced<Vec<LiveOptionsContract>> {
        let ticker = ticker.trim().to_ascii_uppercase();

        if !self.status.is_live() {
            debug!(ticker = %ticker, status = self.status.as_str(), "Provider not configured, serving synthetic chain");
            return self.synthetic_contracts(&ticker, expiry, expiry_type, today, "unconfigured");
        }

        let mut query = ContractQuery::new()
            .with_underlying(ticker.clone())
            .expiring_from(today);
        if let Some(date) = expiry {
            query = query.with_expiration(date);
        }

        let mut rows = match self.store.list_contracts(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Contract read failed, serving synthetic chain");
                return self.synthetic_contracts(&ticker, expiry, expiry_type, today, "store_error");
            }
        };

        if let Some(wanted) = expiry_type {
            let dates = self.dates_of_type(&ticker, wanted, today).await;
            rows.retain(|c| {
                dates
                    .as_ref()
                    .map(|d| d.contains(&c.expiration_date))
                    .unwrap_or_else(|| classify_by_days(days_between(today, c.expiration_date)) == wanted)
            });
        }

        if rows.is_empty() {
            info!(ticker = %ticker, "No stored contracts, serving synthetic chain");
            return self.synthetic_contracts(&ticker, expiry, expiry_type, today, "empty_store");
        }

        rows.sort_by(strike_order);
        Sourced::live(rows)
    }

    // Persisted expiry dates carrying `wanted`, or None when no expiry rows exist.
    async fn dates_of_type(
        &self,
        ticker: &str,
        wanted: ExpiryType,
        today: NaiveDate,
    ) -> Option<HashSet<NaiveDate>> {
        match self.store.list_expiries(ticker).await {
            Ok(expiries) if !expiries.is_empty() => Some(
                expiries
                    .into_iter()
                    .filter(|e| e.expiration_date >= today)
                    .map(|e| refresh_expiry(e, today))
                    .filter(|e| e.expiry_type == wanted)
                    .map(|e| e.expiration_date)
                    .collect(),
            ),
            Ok(_) => None,
            Err(e) => {
                warn!(ticker, error = %e, "Expiry read failed, classifying contracts locally");
                None
            }
        }
    }

    fn synthetic_contracts(
        &self,
        ticker: &str,
        expiry: Option<NaiveDate>,
        expiry_type: Option<ExpiryType>,
        today: NaiveDate,
        reason: &'static str,
    ) -> Sourced<Vec<LiveOptionsContract>> {
        self.metrics.record_fallback(reason);

        // An explicit date wins; a type filter picks a date inside that bucket.
        let expiration = match (expiry, expiry_type) {
            (Some(date), _) if date >= today => Some(date),
            (_, Some(wanted)) => self
                .synthesizer
                .expiration_dates_of_type(wanted, today)
                .first()
                .copied(),
            _ => None,
        };

        let mut chain = self.synthesizer.synthetic_chain(ticker, expiration, today);
        chain.sort_by(strike_order);
        Sourced::synthetic(chain)
    }

    /// Unexpired expiries for a ticker, nearest first, with `days_to_expiry`
    /// recomputed for today. Rows whose day count changed since sync are
    /// reclassified with the local rule before the type filter applies.
    pub async fn get_expiries(
        &self,
        ticker: &str,
        expiry_type: Option<ExpiryType>,
    ) -> Sourced<Vec<OptionsExpiry>> {
        self.get_expiries_at(ticker, expiry_type, Utc::now().date_naive())
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_expiries_at(
        &self,
        ticker: &str,
        expiry_type: Option<ExpiryType>,
        today: NaiveDate,
    ) -> Sourced<Vec<OptionsExpiry>> {
        let ticker = ticker.trim().to_ascii_uppercase();

        if !self.status.is_live() {
            debug!(ticker = %ticker, status = self.status.as_str(), "Provider not configured, serving synthetic expiries");
            return self.synthetic_expiries(&ticker, expiry_type, today, "unconfigured");
        }

        let rows = match self.store.list_expiries(&ticker).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Expiry read failed, serving synthetic expiries");
                return self.synthetic_expiries(&ticker, expiry_type, today, "store_error");
            }
        };

        let rows: Vec<OptionsExpiry> = rows
            .into_iter()
            .filter(|e| e.expiration_date >= today)
            .map(|e| refresh_expiry(e, today))
            .filter(|e| expiry_type.map_or(true, |t| e.expiry_type == t))
            .collect();

        if rows.is_empty() {
            info!(ticker = %ticker, "No stored expiries, serving synthetic expiries");
            return self.synthetic_expiries(&ticker, expiry_type, today, "empty_store");
        }
        Sourced::live(rows)
    }

    fn synthetic_expiries(
        &self,
        ticker: &str,
        expiry_type: Option<ExpiryType>,
        today: NaiveDate,
        reason: &'static str,
    ) -> Sourced<Vec<OptionsExpiry>> {
        self.metrics.record_fallback(reason);

        Sourced::synthetic(match expiry_type {
            Some(wanted) => self.synthesizer.synthetic_expiries_of_type(ticker, wanted, today),
            None => self.synthesizer.synthetic_expiries(ticker, today),
        })
    }

    /// Cached price if fresh, else the provider (refreshing the cache), else
    /// the synthetic price table.
    #[instrument(skip(self))]
    pub async fn get_underlying_price(&self, ticker: &str) -> Sourced<f64> {
        let ticker = ticker.trim().to_ascii_uppercase();
        let now = Utc::now();

        let cached = match self.store.get_ticker(&ticker).await {
            Ok(row) => row,
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Ticker cache read failed");
                None
            }
        };

        if let Some(ref row) = cached {
            if row.is_fresh(now, self.price_ttl) {
                debug!(ticker = %ticker, price = row.current_price, "Price cache hit");
                return Sourced::live(row.current_price);
            }
        }

        if self.status.is_live() {
            if let Some(price) = self
                .provider
                .fetch_underlying_price(&ticker)
                .await
                .filter(|p| p.is_finite() && *p > 0.0)
            {
                let row = match cached {
                    Some(row) => row.with_price(price, now),
                    None => LiquidTicker::from_price(&ticker, price, now),
                };
                if let Err(e) = self.store.upsert_tickers(&[row]).await {
                    warn!(ticker = %ticker, error = %e, "Failed to refresh price cache");
                }
                return Sourced::live(price);
            }
            warn!(ticker = %ticker, "Underlying price unavailable, using synthetic price");
        }

        self.metrics.record_fallback("price");
        Sourced::synthetic(self.synthesizer.price_for(&ticker))
    }

    /// Active liquid tickers, or the synthetic table when none are stored.
    pub async fn get_tickers(&self) -> Sourced<Vec<LiquidTicker>> {
        if self.status.is_live() {
            match self.store.list_tickers(true).await {
                Ok(rows) if !rows.is_empty() => return Sourced::live(rows),
                Ok(_) => debug!("No stored tickers, serving synthetic tickers"),
                Err(e) => warn!(error = %e, "Ticker read failed, serving synthetic tickers"),
            }
        }

        self.metrics.record_fallback("tickers");
        Sourced::synthetic(self.synthesizer.synthetic_tickers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::contract;
    use crate::store::InMemoryChainStore;
    use crate::types::ExpiryAggregate;
    use async_trait::async_trait;
    use market_data::{ContractDescriptor, ContractType, SnapshotRecord};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[derive(Default)]
    struct FakeProvider {
        price: Option<f64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OptionsDataProvider for FakeProvider {
        async fn fetch_contracts(&self, _underlying: &str) -> Vec<ContractDescriptor> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Vec::new()
        }

        async fn fetch_snapshot(&self, _underlying: &str) -> Vec<SnapshotRecord> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Vec::new()
        }

        async fn fetch_underlying_price(&self, _ticker: &str) -> Option<f64> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.price
        }

        async fn fetch_underlying_prices(&self, _tickers: &[String]) -> HashMap<String, f64> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            HashMap::new()
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 5).unwrap()
    }

    fn in_days(days: i64) -> NaiveDate {
        today() + chrono::Duration::days(days)
    }

    fn facade(
        store: Arc<InMemoryChainStore>,
        provider: Arc<FakeProvider>,
        status: ConfigurationStatus,
    ) -> DataAccessFacade {
        DataAccessFacade::new(store, provider, status)
    }

    #[tokio::test]
    async fn test_unknown_ticker_without_key_is_synthetic_and_sorted() {
        let provider = Arc::new(FakeProvider::default());
        let facade = facade(
            Arc::new(InMemoryChainStore::new()),
            provider.clone(),
            ConfigurationStatus::MissingApiKey,
        );

        let result = facade
            .get_contracts_at("UNKNOWN_TICKER", None, None, today())
            .await;

        assert!(result.is_synthetic());
        assert!(!result.data.is_empty());
        assert!(result
            .data
            .windows(2)
            .all(|w| w[0].strike_price <= w[1].strike_price));
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stored_contracts_exclude_expired() {
        let store = Arc::new(InMemoryChainStore::new());
        store
            .upsert_contracts(&[
                contract("O:OLD", "SPY", ContractType::Call, 500.0, in_days(-1)),
                contract("O:B", "SPY", ContractType::Call, 560.0, in_days(2)),
                contract("O:A", "SPY", ContractType::Put, 540.0, in_days(9)),
            ])
            .await
            .unwrap();

        let facade = facade(store, Arc::new(FakeProvider::default()), ConfigurationStatus::Live);
        let result = facade.get_contracts_at("spy", None, None, today()).await;

        assert_eq!(result.source, DataSource::Live);
        let tickers: Vec<&str> = result.data.iter().map(|c| c.contract_ticker.as_str()).collect();
        assert_eq!(tickers, vec!["O:A", "O:B"]);
    }

    #[tokio::test]
    async fn test_empty_store_falls_back() {
        let facade = facade(
            Arc::new(InMemoryChainStore::new()),
            Arc::new(FakeProvider::default()),
            ConfigurationStatus::Live,
        );

        let result = facade.get_contracts_at("SPY", None, None, today()).await;
        assert!(result.is_synthetic());
        assert_eq!(result.data.len(), 62);
    }

    #[tokio::test]
    async fn test_only_expired_rows_fall_back() {
        let store = Arc::new(InMemoryChainStore::new());
        store
            .upsert_contracts(&[contract("O:OLD", "SPY", ContractType::Call, 500.0, in_days(-3))])
            .await
            .unwrap();

        let facade = facade(store, Arc::new(FakeProvider::default()), ConfigurationStatus::Live);
        let result = facade.get_contracts_at("SPY", None, None, today()).await;
        assert!(result.is_synthetic());
        assert!(result.data.iter().all(|c| c.expiration_date >= today()));
    }

    #[tokio::test]
    async fn test_expiry_type_filter_uses_stored_classification() {
        let store = Arc::new(InMemoryChainStore::new());
        store
            .upsert_contracts(&[
                contract("O:W", "SPY", ContractType::Call, 550.0, in_days(2)),
                contract("O:M", "SPY", ContractType::Call, 550.0, in_days(30)),
            ])
            .await
            .unwrap();
        store
            .upsert_expiries(&[
                OptionsExpiry::new("SPY", in_days(2), ExpiryType::Weekly, 2, ExpiryAggregate::default()),
                OptionsExpiry::new("SPY", in_days(30), ExpiryType::Monthly, 30, ExpiryAggregate::default()),
            ])
            .await
            .unwrap();

        let facade = facade(store, Arc::new(FakeProvider::default()), ConfigurationStatus::Live);
        let result = facade
            .get_contracts_at("SPY", None, Some(ExpiryType::Weekly), today())
            .await;

        assert_eq!(result.source, DataSource::Live);
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].contract_ticker, "O:W");
    }

    #[tokio::test]
    async fn test_synthetic_expiries_honor_type_filter() {
        let facade = facade(
            Arc::new(InMemoryChainStore::new()),
            Arc::new(FakeProvider::default()),
            ConfigurationStatus::PlaceholderApiKey,
        );

        let leaps = facade.get_expiries_at("SPY", Some(ExpiryType::Leaps), today()).await;
        assert!(leaps.is_synthetic());
        assert!(leaps.data.iter().all(|e| e.expiry_type == ExpiryType::Leaps));

        let all = facade.get_expiries_at("SPY", None, today()).await;
        assert!(all.data.len() > leaps.data.len());
    }

    #[tokio::test]
    async fn test_synthetic_zero_dte_and_weekly_on_a_wednesday() {
        let facade = facade(
            Arc::new(InMemoryChainStore::new()),
            Arc::new(FakeProvider::default()),
            ConfigurationStatus::MissingApiKey,
        );

        for wanted in [ExpiryType::ZeroDte, ExpiryType::Weekly] {
            let chain = facade.get_contracts_at("SPY", None, Some(wanted), today()).await;
            assert!(chain.is_synthetic());
            assert_eq!(chain.data.len(), 62);
            assert!(chain
                .data
                .iter()
                .all(|c| classify_by_days(days_between(today(), c.expiration_date)) == wanted));

            let expiries = facade.get_expiries_at("SPY", Some(wanted), today()).await;
            assert!(expiries.is_synthetic());
            assert!(!expiries.data.is_empty());
            assert!(expiries.data.iter().all(|e| e.expiry_type == wanted), "{}", wanted);
        }

        let zero = facade.get_contracts_at("SPY", None, Some(ExpiryType::ZeroDte), today()).await;
        assert!(zero.data.iter().all(|c| c.expiration_date == today()));
    }

    #[tokio::test]
    async fn test_empty_store_fallback_honors_type_filter() {
        let facade = facade(
            Arc::new(InMemoryChainStore::new()),
            Arc::new(FakeProvider::default()),
            ConfigurationStatus::Live,
        );

        for wanted in ExpiryType::ALL {
            let expiries = facade.get_expiries_at("QQQ", Some(wanted), today()).await;
            assert!(expiries.is_synthetic());
            assert!(!expiries.data.is_empty());
            assert!(expiries.data.iter().all(|e| e.expiry_type == wanted), "{}", wanted);
        }
    }

    #[tokio::test]
    async fn test_aged_expiry_rows_are_reclassified() {
        let store = Arc::new(InMemoryChainStore::new());
        store
            .upsert_contracts(&[contract("O:SOON", "SPY", ContractType::Call, 550.0, in_days(1))])
            .await
            .unwrap();
        // Synced as Monthly 30 days out; now one day away.
        store
            .upsert_expiries(&[OptionsExpiry::new("SPY", in_days(1), ExpiryType::Monthly, 30, ExpiryAggregate::default())])
            .await
            .unwrap();

        let facade = facade(store, Arc::new(FakeProvider::default()), ConfigurationStatus::Live);

        let all = facade.get_expiries_at("SPY", None, today()).await;
        assert_eq!(all.source, DataSource::Live);
        assert_eq!(all.data[0].days_to_expiry, 1);
        assert_eq!(all.data[0].expiry_type, ExpiryType::Daily);

        let daily = facade.get_contracts_at("SPY", None, Some(ExpiryType::Daily), today()).await;
        assert_eq!(daily.source, DataSource::Live);
        assert_eq!(daily.data[0].contract_ticker, "O:SOON");

        let monthly = facade.get_expiries_at("SPY", Some(ExpiryType::Monthly), today()).await;
        assert!(monthly.is_synthetic());
    }

    #[tokio::test]
    async fn test_stored_expiries_recompute_days() {
        let store = Arc::new(InMemoryChainStore::new());
        store
            .upsert_expiries(&[
                OptionsExpiry::new("SPY", in_days(-2), ExpiryType::Weekly, 5, ExpiryAggregate::default()),
                OptionsExpiry::new("SPY", in_days(10), ExpiryType::Monthly, 17, ExpiryAggregate::default()),
            ])
            .await
            .unwrap();

        let facade = facade(store, Arc::new(FakeProvider::default()), ConfigurationStatus::Live);
        let result = facade.get_expiries_at("SPY", None, today()).await;

        assert_eq!(result.source, DataSource::Live);
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].days_to_expiry, 10);
    }

    #[tokio::test]
    async fn test_price_cache_hit_skips_provider() {
        let store = Arc::new(InMemoryChainStore::new());
        store
            .upsert_tickers(&[LiquidTicker::from_price("SPY", 551.5, Utc::now())])
            .await
            .unwrap();
        let provider = Arc::new(FakeProvider {
            price: Some(600.0),
            ..Default::default()
        });

        let facade = facade(store, provider.clone(), ConfigurationStatus::Live);
        let price = facade.get_underlying_price("SPY").await;

        assert_eq!(price, Sourced::live(551.5));
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_refreshes_from_provider() {
        let store = Arc::new(InMemoryChainStore::new());
        let stale = Utc::now() - chrono::Duration::seconds(3_600);
        store
            .upsert_tickers(&[LiquidTicker::from_price("SPY", 500.0, stale)])
            .await
            .unwrap();
        let provider = Arc::new(FakeProvider {
            price: Some(552.0),
            ..Default::default()
        });

        let facade = facade(store.clone(), provider, ConfigurationStatus::Live);
        assert_eq!(facade.get_underlying_price("spy").await, Sourced::live(552.0));

        let row = store.get_ticker("SPY").await.unwrap().unwrap();
        assert_eq!(row.current_price, 552.0);
        assert!(row.last_update > stale);
    }

    #[tokio::test]
    async fn test_price_fetch_failure_uses_table() {
        let facade = facade(
            Arc::new(InMemoryChainStore::new()),
            Arc::new(FakeProvider::default()),
            ConfigurationStatus::Live,
        );

        assert_eq!(facade.get_underlying_price("QQQ").await, Sourced::synthetic(480.0));
        assert_eq!(facade.get_underlying_price("NOPE").await, Sourced::synthetic(100.0));
    }

    #[tokio::test]
    async fn test_tickers_fall_back_to_table() {
        let store = Arc::new(InMemoryChainStore::new());
        let facade = facade(store.clone(), Arc::new(FakeProvider::default()), ConfigurationStatus::Live);
        assert!(facade.get_tickers().await.is_synthetic());

        store
            .upsert_tickers(&[LiquidTicker::from_price("SPY", 550.0, Utc::now())])
            .await
            .unwrap();
        let tickers = facade.get_tickers().await;
        assert_eq!(tickers.source, DataSource::Live);
        assert_eq!(tickers.data.len(), 1);
    }
}
