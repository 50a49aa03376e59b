//! REST client for the options data provider.
//!
//! Listings are paginated through `next_url`; each listing runs under one
//! deadline and stops at a hard record cap. The strict `list_*` methods
//! return errors, the [`OptionsDataProvider`] impl logs them and degrades to
//! empty results.

use crate::error::MarketDataError;
use crate::provider::OptionsDataProvider;
use crate::types::{ContractDescriptor, IndicatorKind, IndicatorSet, IndicatorValue, SnapshotRecord};
use crate::wire::{
    ContractItem, IndicatorResponse, Page, PreviousCloseResponse, SnapshotItem,
    StocksSnapshotResponse,
};
use crate::MarketDataResult;
use async_trait::async_trait;
use chrono::{Months, NaiveDate, Utc};
use config::ProviderConfig;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONTRACTS_PATH: &str = "/v3/reference/options/contracts";

pub struct RestProvider {
    client: Client,
    base_url: Url,
    /// Only set when the configured key is usable.
    api_key: Option<String>,
    page_limit: u32,
    max_records: usize,
    fetch_deadline: Duration,
    horizon_months: u32,
}

impl RestProvider {
    pub fn new(client: Client, config: &ProviderConfig) -> MarketDataResult<Self> {
        let base_url = Url::parse(&config.rest_base_url).map_err(|e| {
            MarketDataError::Provider(format!("invalid rest_base_url {}: {}", config.rest_base_url, e))
        })?;

        Ok(Self {
            client,
            base_url,
            api_key: config.usable_api_key().map(str::to_string),
            page_limit: config.page_limit,
            max_records: config.max_records,
            fetch_deadline: Duration::from_secs(config.fetch_deadline_seconds),
            horizon_months: config.horizon_months,
        })
    }

    /// Build with a client honouring `request_timeout_seconds`.
    pub fn from_config(config: &ProviderConfig) -> MarketDataResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Self::new(client, config)
    }

    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.fetch_deadline = deadline;
        self
    }

    /// True when requests will actually be sent.
    pub fn is_live(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> MarketDataResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| MarketDataError::Provider("no usable API key configured".to_string()))
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> MarketDataResult<Url> {
        let mut url = self.base_url.clone();
        url.set_path(path);
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("apiKey", self.api_key()?);
        }
        Ok(url)
    }

    /// Resolve a `next_url` against the base and re-attach the key, which the
    /// provider strips from cursors.
    fn normalize_url(&self, next_url: &str) -> MarketDataResult<Url> {
        let mut url = match Url::parse(next_url) {
            Ok(absolute) => absolute,
            Err(_) => self
                .base_url
                .join(next_url)
                .map_err(|e| MarketDataError::Provider(format!("bad next_url {}: {}", next_url, e)))?,
        };

        if !url.query_pairs().any(|(k, _)| k == "apiKey") {
            url.query_pairs_mut().append_pair("apiKey", self.api_key()?);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> MarketDataResult<T> {
        let path = url.path().to_string();
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MarketDataError::Http {
                status: status.as_u16(),
                url: path,
            });
        }

        Ok(response.json::<T>().await?)
    }

    async fn paginate<T, R>(&self, first: Url, convert: fn(T) -> Option<R>) -> MarketDataResult<Vec<R>>
    where
        T: DeserializeOwned,
    {
        let mut collected = Vec::new();
        let mut next = Some(first);
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            let page: Page<T> = self.get_json(url).await?;
            pages += 1;
            collected.extend(page.results.unwrap_or_default().into_iter().filter_map(convert));

            if collected.len() >= self.max_records {
                warn!(
                    cap = self.max_records,
                    pages, "Record cap reached, stopping pagination"
                );
                collected.truncate(self.max_records);
                break;
            }

            next = match page.next_url {
                Some(next_url) => Some(self.normalize_url(&next_url)?),
                None => None,
            };
        }

        debug!(pages, records = collected.len(), "Pagination complete");
        Ok(collected)
    }

    async fn paginate_with_deadline<T, R>(
        &self,
        first: Url,
        convert: fn(T) -> Option<R>,
    ) -> MarketDataResult<Vec<R>>
    where
        T: DeserializeOwned,
    {
        tokio::time::timeout(self.fetch_deadline, self.paginate(first, convert))
            .await
            .map_err(|_| MarketDataError::Timeout(self.fetch_deadline.as_secs()))?
    }

    /// All listed contracts expiring within the horizon from `today`.
    pub async fn list_contracts(
        &self,
        underlying: &str,
        today: NaiveDate,
    ) -> MarketDataResult<Vec<ContractDescriptor>> {
        let horizon = horizon_end(today, self.horizon_months);
        let url = self.endpoint(
            CONTRACTS_PATH,
            &[
                ("underlying_ticker", underlying.to_string()),
                ("expiration_date.lte", horizon.format("%Y-%m-%d").to_string()),
                ("limit", self.page_limit.to_string()),
            ],
        )?;

        let contracts = self
            .paginate_with_deadline(url, ContractItem::into_descriptor)
            .await?;
        Ok(within_horizon(contracts, today, self.horizon_months))
    }

    pub async fn list_snapshot(&self, underlying: &str) -> MarketDataResult<Vec<SnapshotRecord>> {
        let url = self.endpoint(
            &format!("/v3/snapshot/options/{}", underlying),
            &[("limit", self.page_limit.to_string())],
        )?;
        self.paginate_with_deadline(url, SnapshotItem::into_record).await
    }

    pub async fn previous_close(&self, ticker: &str) -> MarketDataResult<Option<f64>> {
        let url = self.endpoint(
            &format!("/v2/aggs/ticker/{}/prev", ticker),
            &[("adjusted", "true".to_string())],
        )?;
        let response: PreviousCloseResponse = self.get_json(url).await?;

        Ok(response
            .results
            .into_iter()
            .find_map(|bar| bar.close)
            .filter(|price| price.is_finite() && *price > 0.0))
    }

    pub async fn last_prices(&self, tickers: &[String]) -> MarketDataResult<HashMap<String, f64>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }

        let url = self.endpoint(
            "/v2/snapshot/locale/us/markets/stocks/tickers",
            &[("tickers", tickers.join(","))],
        )?;
        let response: StocksSnapshotResponse = self.get_json(url).await?;

        Ok(response
            .tickers
            .into_iter()
            .filter_map(|snapshot| snapshot.price().map(|price| (snapshot.ticker, price)))
            .collect())
    }

    pub async fn fetch_indicator(
        &self,
        ticker: &str,
        kind: IndicatorKind,
        window: u32,
    ) -> MarketDataResult<Option<IndicatorValue>> {
        let url = self.endpoint(
            &format!("/v1/indicators/{}/{}", kind.path_segment(), ticker),
            &[
                ("timespan", "day".to_string()),
                ("adjusted", "true".to_string()),
                ("window", window.to_string()),
                ("series_type", "close".to_string()),
                ("order", "desc".to_string()),
                ("limit", "1".to_string()),
            ],
        )?;
        let response: IndicatorResponse = self.get_json(url).await?;
        Ok(response.latest(kind, window))
    }

    /// SMA, EMA and RSI at their default windows, fetched concurrently.
    /// A failed indicator is `None`.
    pub async fn fetch_indicators(&self, ticker: &str) -> IndicatorSet {
        let (sma, ema, rsi) = tokio::join!(
            self.fetch_indicator(ticker, IndicatorKind::Sma, IndicatorKind::Sma.default_window()),
            self.fetch_indicator(ticker, IndicatorKind::Ema, IndicatorKind::Ema.default_window()),
            self.fetch_indicator(ticker, IndicatorKind::Rsi, IndicatorKind::Rsi.default_window()),
        );

        let keep = |kind: IndicatorKind, result: MarketDataResult<Option<IndicatorValue>>| {
            result.unwrap_or_else(|e| {
                warn!(ticker, indicator = kind.path_segment(), error = %e, "Indicator fetch failed");
                None
            })
        };

        IndicatorSet {
            sma: keep(IndicatorKind::Sma, sma),
            ema: keep(IndicatorKind::Ema, ema),
            rsi: keep(IndicatorKind::Rsi, rsi),
        }
    }
}

#[async_trait]
impl OptionsDataProvider for RestProvider {
    async fn fetch_contracts(&self, underlying: &str) -> Vec<ContractDescriptor> {
        if !self.is_live() {
            debug!(underlying, "Provider not configured, skipping contract listing");
            return Vec::new();
        }

        match self.list_contracts(underlying, Utc::now().date_naive()).await {
            Ok(contracts) => {
                info!(underlying, count = contracts.len(), "Fetched contracts");
                contracts
            }
            Err(e) => {
                warn!(underlying, error = %e, "Contract listing failed");
                Vec::new()
            }
        }
    }

    async fn fetch_snapshot(&self, underlying: &str) -> Vec<SnapshotRecord> {
        if !self.is_live() {
            return Vec::new();
        }

        match self.list_snapshot(underlying).await {
            Ok(records) => {
                info!(underlying, count = records.len(), "Fetched snapshot");
                records
            }
            Err(e) => {
                warn!(underlying, error = %e, "Snapshot fetch failed");
                Vec::new()
            }
        }
    }

    async fn fetch_underlying_price(&self, ticker: &str) -> Option<f64> {
        if !self.is_live() {
            return None;
        }

        self.previous_close(ticker).await.unwrap_or_else(|e| {
            warn!(ticker, error = %e, "Underlying price fetch failed");
            None
        })
    }

    async fn fetch_underlying_prices(&self, tickers: &[String]) -> HashMap<String, f64> {
        if !self.is_live() {
            return HashMap::new();
        }

        self.last_prices(tickers).await.unwrap_or_else(|e| {
            warn!(count = tickers.len(), error = %e, "Multi-symbol price fetch failed");
            HashMap::new()
        })
    }
}

/// Last expiry date included in a listing started on `today`.
pub fn horizon_end(today: NaiveDate, months: u32) -> NaiveDate {
    today
        .checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

/// Drop contracts expiring after the horizon.
pub fn within_horizon(
    contracts: Vec<ContractDescriptor>,
    today: NaiveDate,
    months: u32,
) -> Vec<ContractDescriptor> {
    let end = horizon_end(today, months);
    contracts
        .into_iter()
        .filter(|c| c.expiration_date <= end)
        .collect()
}
