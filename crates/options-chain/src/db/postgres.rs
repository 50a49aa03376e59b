//! PostgreSQL implementation of [`ChainStore`].
//!
//! Each call writes one multi-row `INSERT ... ON CONFLICT ... DO UPDATE`.
//! Chunking to at most 500 rows is the gateway's job.

use crate::db::models::{ContractRow, ExpiryRow, TickerRow};
use crate::error::{ChainError, ChainResult};
use crate::store::{ChainStore, ContractQuery};
use crate::types::{ExpiryAggregate, LiquidTicker, LiveOptionsContract, OptionsExpiry};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use std::hash::Hash;
use tracing::{debug, info, instrument};

const CONTRACTS_TABLE: &str = "options_contracts";
const EXPIRIES_TABLE: &str = "options_expiries";
const TICKERS_TABLE: &str = "liquid_tickers";

#[derive(Debug, Clone)]
pub struct PostgresChainStore {
    pool: PgPool,
}

impl PostgresChainStore {
    pub async fn new(database_url: &str, max_connections: u32) -> ChainResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| ChainError::Storage(format!("Failed to connect to database: {}", e)))?;

        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the chain tables if they do not exist.
    pub async fn run_migrations(&self) -> ChainResult<()> {
        let migration_sql = include_str!("../../../../migrations/001_create_chain_tables.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| ChainError::Storage(format!("Migration failed: {}", e)))?;
        info!("Database migrations completed successfully");
        Ok(())
    }
}

/// `INSERT INTO table (cols) VALUES ($1, ..), (..) ON CONFLICT (key) DO UPDATE SET ...`
pub(crate) fn upsert_sql(table: &str, columns: &[&str], conflict: &[&str], rows: usize) -> String {
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table, columns.join(", "));

    let width = columns.len();
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        let params: Vec<String> = (1..=width).map(|i| format!("${}", row * width + i)).collect();
        sql.push('(');
        sql.push_str(&params.join(", "));
        sql.push(')');
    }

    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !conflict.contains(c))
        .map(|c| format!("{} = EXCLUDED.{}", c, c))
        .collect();

    sql.push_str(&format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        conflict.join(", "),
        updates.join(", ")
    ));
    if table != TICKERS_TABLE {
        sql.push_str(", updated_at = NOW()");
    }
    sql
}

// A key may appear only once per ON CONFLICT DO UPDATE statement; the last
// occurrence wins, matching sequential upserts.
fn last_by_key<T, K: Eq + Hash>(rows: &[T], key: impl Fn(&T) -> K) -> Vec<&T> {
    let mut position: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<&T> = Vec::with_capacity(rows.len());
    for row in rows {
        match position.get(&key(row)) {
            Some(&i) => unique[i] = row,
            None => {
                position.insert(key(row), unique.len());
                unique.push(row);
            }
        }
    }
    unique
}

// Conflict keys as the table's unique constraint sees them after
// `from_domain` uppercases the symbol.
fn expiry_key(expiry: &OptionsExpiry) -> (NaiveDate, String) {
    (expiry.expiration_date, expiry.underlying_ticker.to_ascii_uppercase())
}

fn ticker_key(ticker: &LiquidTicker) -> String {
    ticker.ticker.to_ascii_uppercase()
}

#[async_trait]
impl ChainStore for PostgresChainStore {
    #[instrument(skip(self, contracts), fields(rows = contracts.len()))]
    async fn upsert_contracts(&self, contracts: &[LiveOptionsContract]) -> ChainResult<u64> {
        let contracts = last_by_key(contracts, |c| c.contract_ticker.clone());
        if contracts.is_empty() {
            return Ok(0);
        }

        let sql = upsert_sql(CONTRACTS_TABLE, ContractRow::COLUMNS, &["contract_ticker"], contracts.len());
        let mut q = sqlx::query(&sql);
        for contract in contracts {
            let row = ContractRow::from_domain(contract);
            q = q
                .bind(row.contract_ticker)
                .bind(row.underlying_ticker)
                .bind(row.contract_type)
                .bind(row.strike_price)
                .bind(row.expiration_date)
                .bind(row.bid)
                .bind(row.ask)
                .bind(row.last_price)
                .bind(row.mark)
                .bind(row.volume)
                .bind(row.open_interest)
                .bind(row.implied_volatility)
                .bind(row.delta)
                .bind(row.gamma)
                .bind(row.theta)
                .bind(row.vega)
                .bind(row.rho)
                .bind(row.intrinsic_value)
                .bind(row.time_value)
                .bind(row.bid_ask_spread)
                .bind(row.last_trade_timestamp);
        }

        let result = q
            .execute(&self.pool)
            .await
            .map_err(|e| ChainError::Storage(format!("Failed to upsert contracts: {}", e)))?;
        debug!(rows = result.rows_affected(), "Contracts upserted");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, expiries), fields(rows = expiries.len()))]
    async fn upsert_expiries(&self, expiries: &[OptionsExpiry]) -> ChainResult<u64> {
        let expiries = last_by_key(expiries, expiry_key);
        if expiries.is_empty() {
            return Ok(0);
        }

        let sql = upsert_sql(
            EXPIRIES_TABLE,
            ExpiryRow::COLUMNS,
            &["expiration_date", "underlying_ticker"],
            expiries.len(),
        );
        let mut q = sqlx::query(&sql);
        for expiry in expiries {
            let row = ExpiryRow::from_domain(expiry);
            q = q
                .bind(row.expiration_date)
                .bind(row.underlying_ticker)
                .bind(row.expiry_type)
                .bind(row.days_to_expiry)
                .bind(row.call_volume)
                .bind(row.put_volume)
                .bind(row.call_open_interest)
                .bind(row.put_open_interest);
        }

        let result = q
            .execute(&self.pool)
            .await
            .map_err(|e| ChainError::Storage(format!("Failed to upsert expiries: {}", e)))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, tickers), fields(rows = tickers.len()))]
    async fn upsert_tickers(&self, tickers: &[LiquidTicker]) -> ChainResult<u64> {
        let tickers = last_by_key(tickers, ticker_key);
        if tickers.is_empty() {
            return Ok(0);
        }

        let sql = upsert_sql(TICKERS_TABLE, TickerRow::COLUMNS, &["ticker"], tickers.len());
        let mut q = sqlx::query(&sql);
        for ticker in tickers {
            let row = TickerRow::from_domain(ticker);
            q = q
                .bind(row.ticker)
                .bind(row.name)
                .bind(row.sector)
                .bind(row.current_price)
                .bind(row.avg_volume)
                .bind(row.avg_open_interest)
                .bind(row.is_active)
                .bind(row.last_update);
        }

        let result = q
            .execute(&self.pool)
            .await
            .map_err(|e| ChainError::Storage(format!("Failed to upsert tickers: {}", e)))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn list_contracts(&self, query: &ContractQuery) -> ChainResult<Vec<LiveOptionsContract>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM {} WHERE 1=1",
            ContractRow::COLUMNS.join(", "),
            CONTRACTS_TABLE
        ));

        if let Some(ref underlying) = query.underlying {
            qb.push(" AND underlying_ticker = ").push_bind(underlying.to_ascii_uppercase());
        }
        if let Some(contract_type) = query.contract_type {
            qb.push(" AND contract_type = ").push_bind(contract_type.as_db_str());
        }
        if let Some(date) = query.expiration_date {
            qb.push(" AND expiration_date = ").push_bind(date);
        }
        if let Some(from) = query.expiring_from {
            qb.push(" AND expiration_date >= ").push_bind(from);
        }
        if let Some(min) = query.strike_min {
            qb.push(" AND strike_price >= ").push_bind(min);
        }
        if let Some(max) = query.strike_max {
            qb.push(" AND strike_price <= ").push_bind(max);
        }

        qb.push(" ORDER BY expiration_date ASC, strike_price ASC, contract_type ASC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = qb
            .build_query_as::<ContractRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ChainError::Storage(format!("Failed to list contracts: {}", e)))?;

        rows.into_iter().map(ContractRow::to_domain).collect()
    }

    #[instrument(skip(self))]
    async fn list_expiries(&self, underlying: &str) -> ChainResult<Vec<OptionsExpiry>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE underlying_ticker = $1 ORDER BY expiration_date ASC",
            ExpiryRow::COLUMNS.join(", "),
            EXPIRIES_TABLE
        );
        let rows = sqlx::query_as::<_, ExpiryRow>(&sql)
            .bind(underlying.to_ascii_uppercase())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ChainError::Storage(format!("Failed to list expiries: {}", e)))?;

        rows.into_iter().map(ExpiryRow::to_domain).collect()
    }

    #[instrument(skip(self))]
    async fn get_ticker(&self, ticker: &str) -> ChainResult<Option<LiquidTicker>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE ticker = $1",
            TickerRow::COLUMNS.join(", "),
            TICKERS_TABLE
        );
        let row = sqlx::query_as::<_, TickerRow>(&sql)
            .bind(ticker.to_ascii_uppercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ChainError::Storage(format!("Failed to get ticker: {}", e)))?;

        Ok(row.map(TickerRow::to_domain))
    }

    #[instrument(skip(self))]
    async fn list_tickers(&self, active_only: bool) -> ChainResult<Vec<LiquidTicker>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE ($1 = FALSE OR is_active) ORDER BY ticker ASC",
            TickerRow::COLUMNS.join(", "),
            TICKERS_TABLE
        );
        let rows = sqlx::query_as::<_, TickerRow>(&sql)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ChainError::Storage(format!("Failed to list tickers: {}", e)))?;

        Ok(rows.into_iter().map(TickerRow::to_domain).collect())
    }

    #[instrument(skip(self))]
    async fn aggregate_expiry(
        &self,
        underlying: &str,
        expiration_date: NaiveDate,
    ) -> ChainResult<ExpiryAggregate> {
        let sql = format!(
            r#"SELECT
                COALESCE(SUM(volume) FILTER (WHERE contract_type = 'call'), 0)::BIGINT AS call_volume,
                COALESCE(SUM(volume) FILTER (WHERE contract_type = 'put'), 0)::BIGINT AS put_volume,
                COALESCE(SUM(open_interest) FILTER (WHERE contract_type = 'call'), 0)::BIGINT AS call_open_interest,
                COALESCE(SUM(open_interest) FILTER (WHERE contract_type = 'put'), 0)::BIGINT AS put_open_interest
            FROM {}
            WHERE underlying_ticker = $1 AND expiration_date = $2"#,
            CONTRACTS_TABLE
        );

        let row = sqlx::query(&sql)
            .bind(underlying.to_ascii_uppercase())
            .bind(expiration_date)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ChainError::Storage(format!("Failed to aggregate expiry: {}", e)))?;

        let count = |name: &str| -> ChainResult<u64> {
            let value: i64 = row.try_get(name)?;
            Ok(value.max(0) as u64)
        };

        Ok(ExpiryAggregate {
            call_volume: count("call_volume")?,
            put_volume: count("put_volume")?,
            call_open_interest: count("call_open_interest")?,
            put_open_interest: count("put_open_interest")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_sql_placeholders_and_conflict() {
        let sql = upsert_sql("options_expiries", &["expiration_date", "underlying_ticker", "expiry_type"], &["expiration_date", "underlying_ticker"], 2);

        assert!(sql.starts_with("INSERT INTO options_expiries (expiration_date, underlying_ticker, expiry_type) VALUES ($1, $2, $3), ($4, $5, $6)"));
        assert!(sql.contains("ON CONFLICT (expiration_date, underlying_ticker) DO UPDATE SET expiry_type = EXCLUDED.expiry_type, updated_at = NOW()"));
    }

    #[test]
    fn test_ticker_upsert_has_no_updated_at() {
        let sql = upsert_sql(TICKERS_TABLE, TickerRow::COLUMNS, &["ticker"], 1);
        assert!(sql.contains("ON CONFLICT (ticker) DO UPDATE SET name = EXCLUDED.name"));
        assert!(!sql.contains("updated_at"));
    }

    #[test]
    fn test_last_by_key_keeps_latest() {
        let rows = vec![("a", 1), ("b", 2), ("a", 3)];
        let unique = last_by_key(&rows, |r| r.0);
        assert_eq!(unique, vec![&("a", 3), &("b", 2)]);
    }

    #[test]
    fn test_mixed_case_tickers_collapse_to_one_row() {
        let now = chrono::Utc::now();
        let rows = vec![
            LiquidTicker::from_price("spy", 1.0, now),
            LiquidTicker::from_price("QQQ", 480.0, now),
            LiquidTicker::from_price("SPY", 2.0, now),
            LiquidTicker::from_price("Spy", 3.0, now),
        ];

        let unique = last_by_key(&rows, ticker_key);
        assert_eq!(unique.len(), 2);
        // First-seen position is kept, latest value wins.
        assert_eq!(unique[0].current_price, 3.0);
        assert_eq!(unique[0].ticker, "Spy");
        assert_eq!(unique[1].ticker, "QQQ");
    }

    #[test]
    fn test_mixed_case_expiries_collapse_per_date() {
        let june = NaiveDate::from_ymd_opt(2025, 6, 20).unwrap();
        let july = NaiveDate::from_ymd_opt(2025, 7, 18).unwrap();
        let agg = |v| ExpiryAggregate { call_volume: v, ..ExpiryAggregate::default() };
        let rows = vec![
            OptionsExpiry::new("spy", june, crate::types::ExpiryType::Monthly, 30, agg(1)),
            OptionsExpiry::new("SPY", july, crate::types::ExpiryType::Quarterly, 58, agg(2)),
            OptionsExpiry::new("SPY", june, crate::types::ExpiryType::Monthly, 30, agg(3)),
        ];

        let unique = last_by_key(&rows, expiry_key);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].expiration_date, june);
        assert_eq!(unique[0].call_volume, 3);
        assert_eq!(unique[1].expiration_date, july);

        // Statement binds stay aligned with the deduplicated row count.
        let sql = upsert_sql(EXPIRIES_TABLE, ExpiryRow::COLUMNS, &["expiration_date", "underlying_ticker"], unique.len());
        assert!(sql.contains("($9, $10, $11, $12, $13, $14, $15, $16)"));
        assert!(!sql.contains("$17"));
    }
}
