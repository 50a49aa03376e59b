//! Expiry classification and per-expiry aggregation.
//!
//! The maturity bucket comes from an injectable [`ExpiryCategorizer`] (a remote
//! rule in production). When it fails or has no answer, the local day-count
//! rule in [`classify_by_days`] decides.

use crate::error::{ChainError, ChainResult};
use crate::store::ChainStore;
use crate::types::{days_between, ExpiryAggregate, ExpiryType, OptionsExpiry};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use config::ClassifierConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Local fallback rule. Monotonic in `days`; anything already expired is 0DTE.
pub fn classify_by_days(days: i64) -> ExpiryType {
    match days {
        d if d <= 0 => ExpiryType::ZeroDte,
        1..=3 => ExpiryType::Daily,
        4..=7 => ExpiryType::Weekly,
        8..=45 => ExpiryType::Monthly,
        46..=120 => ExpiryType::Quarterly,
        _ => ExpiryType::Leaps,
    }
}

/// Remote categorization strategy.
///
/// `Ok(None)` means the rule had no answer for this date.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExpiryCategorizer: Send + Sync {
    async fn categorize(
        &self,
        expiration_date: NaiveDate,
        underlying: &str,
    ) -> ChainResult<Option<ExpiryType>>;
}

#[derive(Debug, Serialize)]
struct CategorizeRequest<'a> {
    expiry_date: NaiveDate,
    underlying_ticker: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CategorizeResponse {
    Label(String),
    Object { expiry_type: Option<String> },
}

/// Decode a categorization response body.
///
/// Accepts a bare JSON string, `{"expiry_type": ...}` or `null`. Unknown
/// labels count as no answer.
pub fn parse_category(body: &str) -> ChainResult<Option<ExpiryType>> {
    let response: Option<CategorizeResponse> = serde_json::from_str(body)
        .map_err(|e| ChainError::Classification(format!("bad categorization response: {}", e)))?;

    let label = match response {
        Some(CategorizeResponse::Label(label)) => Some(label),
        Some(CategorizeResponse::Object { expiry_type }) => expiry_type,
        None => None,
    };

    Ok(label.and_then(|l| ExpiryType::parse(&l)))
}

/// Categorizer backed by an HTTP RPC endpoint.
#[derive(Debug, Clone)]
pub struct HttpExpiryCategorizer {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpExpiryCategorizer {
    pub fn new(client: Client, url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
        }
    }

    /// `None` when no endpoint is configured.
    pub fn from_config(config: &ClassifierConfig) -> ChainResult<Option<Self>> {
        let url = match config.rpc_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => return Ok(None),
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .map_err(|e| ChainError::Config(format!("classifier http client: {}", e)))?;

        Ok(Some(Self::new(client, url, config.rpc_api_key.clone())))
    }
}

#[async_trait]
impl ExpiryCategorizer for HttpExpiryCategorizer {
    async fn categorize(
        &self,
        expiration_date: NaiveDate,
        underlying: &str,
    ) -> ChainResult<Option<ExpiryType>> {
        let mut request = self.client.post(&self.url).json(&CategorizeRequest {
            expiry_date: expiration_date,
            underlying_ticker: underlying,
        });
        if let Some(ref key) = self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChainError::Classification(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Classification(format!(
                "categorization endpoint returned {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChainError::Classification(e.without_url().to_string()))?;
        parse_category(&body)
    }
}

/// Classifies expirations and builds [`OptionsExpiry`] rows.
#[derive(Clone, Default)]
pub struct ExpiryClassifier {
    categorizer: Option<Arc<dyn ExpiryCategorizer>>,
}

impl ExpiryClassifier {
    /// Local rule only.
    pub fn local() -> Self {
        Self::default()
    }

    pub fn with_categorizer(categorizer: Arc<dyn ExpiryCategorizer>) -> Self {
        Self {
            categorizer: Some(categorizer),
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> ChainResult<Self> {
        Ok(match HttpExpiryCategorizer::from_config(config)? {
            Some(http) => Self::with_categorizer(Arc::new(http)),
            None => Self::local(),
        })
    }

    pub fn has_remote(&self) -> bool {
        self.categorizer.is_some()
    }

    pub async fn classify(&self, expiration_date: NaiveDate, underlying: &str) -> ExpiryType {
        self.classify_at(expiration_date, underlying, Utc::now().date_naive())
            .await
    }

    /// Never fails: remote errors and empty answers fall back to the local rule.
    pub async fn classify_at(
        &self,
        expiration_date: NaiveDate,
        underlying: &str,
        today: NaiveDate,
    ) -> ExpiryType {
        let local = classify_by_days(days_between(today, expiration_date));

        let Some(ref categorizer) = self.categorizer else {
            return local;
        };

        match categorizer.categorize(expiration_date, underlying).await {
            Ok(Some(expiry_type)) => expiry_type,
            Ok(None) => {
                debug!(ticker = underlying, %expiration_date, "Remote categorizer had no answer, using local rule");
                local
            }
            Err(e) => {
                warn!(ticker = underlying, %expiration_date, error = %e, "Remote categorization failed, using local rule");
                local
            }
        }
    }

    /// Sum persisted contract activity for one expiry.
    ///
    /// Reads committed contract rows, so contracts must be upserted first.
    pub async fn aggregate(
        &self,
        store: &dyn ChainStore,
        underlying: &str,
        expiration_date: NaiveDate,
    ) -> ChainResult<ExpiryAggregate> {
        store.aggregate_expiry(underlying, expiration_date).await
    }

    /// Aggregate and classify one expiry into a row ready for upsert.
    pub async fn build_expiry(
        &self,
        store: &dyn ChainStore,
        underlying: &str,
        expiration_date: NaiveDate,
        today: NaiveDate,
    ) -> ChainResult<OptionsExpiry> {
        let aggregate = self.aggregate(store, underlying, expiration_date).await?;
        let expiry_type = self.classify_at(expiration_date, underlying, today).await;

        Ok(OptionsExpiry::new(
            underlying,
            expiration_date,
            expiry_type,
            days_between(today, expiration_date),
            aggregate,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::contract;
    use crate::store::InMemoryChainStore;
    use market_data::ContractType;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
    }

    fn in_days(days: i64) -> NaiveDate {
        today() + chrono::Duration::days(days)
    }

    #[test]
    fn test_local_rule_buckets() {
        assert_eq!(classify_by_days(0), ExpiryType::ZeroDte);
        assert_eq!(classify_by_days(2), ExpiryType::Daily);
        assert_eq!(classify_by_days(5), ExpiryType::Weekly);
        assert_eq!(classify_by_days(30), ExpiryType::Monthly);
        assert_eq!(classify_by_days(90), ExpiryType::Quarterly);
        assert_eq!(classify_by_days(200), ExpiryType::Leaps);
    }

    #[test]
    fn test_local_rule_boundaries_and_monotonic() {
        assert_eq!(classify_by_days(-4), ExpiryType::ZeroDte);
        assert_eq!(classify_by_days(3), ExpiryType::Daily);
        assert_eq!(classify_by_days(7), ExpiryType::Weekly);
        assert_eq!(classify_by_days(45), ExpiryType::Monthly);
        assert_eq!(classify_by_days(120), ExpiryType::Quarterly);
        assert_eq!(classify_by_days(121), ExpiryType::Leaps);

        let buckets: Vec<ExpiryType> = (-2..400).map(classify_by_days).collect();
        assert!(buckets.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_parse_category_shapes() {
        assert_eq!(parse_category("\"Weekly\"").unwrap(), Some(ExpiryType::Weekly));
        assert_eq!(
            parse_category(r#"{"expiry_type":"LEAPS"}"#).unwrap(),
            Some(ExpiryType::Leaps)
        );
        assert_eq!(parse_category("null").unwrap(), None);
        assert_eq!(parse_category(r#"{"expiry_type":null}"#).unwrap(), None);
        assert_eq!(parse_category("\"Biweekly\"").unwrap(), None);
        assert!(parse_category("<html>").is_err());
    }

    #[test]
    fn test_from_config_without_url_is_local() {
        let classifier = ExpiryClassifier::from_config(&ClassifierConfig::default()).unwrap();
        assert!(!classifier.has_remote());
    }

    #[tokio::test]
    async fn test_remote_answer_wins() {
        let mut mock = MockExpiryCategorizer::new();
        mock.expect_categorize()
            .times(1)
            .returning(|_, _| Ok(Some(ExpiryType::Monthly)));

        let classifier = ExpiryClassifier::with_categorizer(Arc::new(mock));
        let got = classifier.classify_at(in_days(2), "SPY", today()).await;
        assert_eq!(got, ExpiryType::Monthly);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let mut mock = MockExpiryCategorizer::new();
        mock.expect_categorize()
            .returning(|_, _| Err(ChainError::Classification("503".to_string())));

        let classifier = ExpiryClassifier::with_categorizer(Arc::new(mock));
        assert_eq!(
            classifier.classify_at(in_days(5), "SPY", today()).await,
            ExpiryType::Weekly
        );
    }

    #[tokio::test]
    async fn test_remote_empty_falls_back_to_local() {
        let mut mock = MockExpiryCategorizer::new();
        mock.expect_categorize().returning(|_, _| Ok(None));

        let classifier = ExpiryClassifier::with_categorizer(Arc::new(mock));
        assert_eq!(
            classifier.classify_at(in_days(90), "SPY", today()).await,
            ExpiryType::Quarterly
        );
    }

    #[tokio::test]
    async fn test_build_expiry_reads_persisted_contracts() {
        let store = InMemoryChainStore::new();
        let expiry = in_days(30);
        store
            .upsert_contracts(&[
                contract("O:C", "SPY", ContractType::Call, 550.0, expiry),
                contract("O:P", "SPY", ContractType::Put, 550.0, expiry),
            ])
            .await
            .unwrap();

        let row = ExpiryClassifier::local()
            .build_expiry(&store, "SPY", expiry, today())
            .await
            .unwrap();

        assert_eq!(row.expiry_type, ExpiryType::Monthly);
        assert_eq!(row.days_to_expiry, 30);
        assert_eq!(row.call_volume, 100);
        assert_eq!(row.put_open_interest, 1_000);
    }
}
