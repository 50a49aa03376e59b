//! Options chain pipeline
//!
//! Turns provider data into a persisted, queryable chain and serves reads
//! that never come back empty.
//!
//! # Core Components
//!
//! - [`normalizer`] - descriptor + snapshot into [`LiveOptionsContract`]
//! - [`classifier`] - expiry buckets with a remote rule and local fallback
//! - [`gateway`] - chunked idempotent upserts
//! - [`store`] - [`ChainStore`] trait and the in-memory backend
//! - [`fallback`] - deterministic synthetic chains, expiries and tickers
//! - [`facade`] - read path with automatic synthetic fallback
//! - [`worker`] - per-ticker sync and the interval worker
//!
//! # Sync order
//!
//! Contracts are upserted before their expiries are aggregated, because the
//! aggregate reads committed contract rows.

pub mod classifier;
pub mod error;
pub mod facade;
pub mod fallback;
pub mod gateway;
pub mod normalizer;
pub mod store;
pub mod types;
pub mod worker;

#[cfg(feature = "postgres")]
pub mod db;

pub use classifier::{classify_by_days, ExpiryCategorizer, ExpiryClassifier, HttpExpiryCategorizer};
pub use error::{ChainError, ChainResult};
pub use facade::{DataAccessFacade, DataSource, Sourced};
pub use fallback::{strike_step, FallbackSynthesizer};
pub use gateway::{PersistenceGateway, UpsertReport};
pub use normalizer::{mark_price, normalize};
pub use store::{ChainStore, ContractQuery, InMemoryChainStore};
pub use types::{ExpiryAggregate, ExpiryType, LiquidTicker, LiveOptionsContract, OptionsExpiry};
pub use worker::{first_error, ChainSyncService, SkipReason, SyncReport, SyncWorker};

#[cfg(feature = "postgres")]
pub use db::PostgresChainStore;
