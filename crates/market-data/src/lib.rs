//! Upstream options market data
//!
//! This crate talks to the options data provider and nothing else.
//!
//! # Core Components
//!
//! - [`rest`] - paginated REST listings, snapshots, underlying prices and indicators
//! - [`realtime`] - WebSocket quote subscriptions with per-symbol dedup
//! - [`backoff`] - jittered exponential backoff for connection attempts
//! - [`black_scholes`] - pricing and Greeks for synthetic chains
//! - [`provider`] - the [`OptionsDataProvider`] seam consumed downstream
//!
//! # Key Invariants
//!
//! - Fetch failures never propagate through [`OptionsDataProvider`]; callers see empty data
//! - No request is sent without a usable API key
//! - One subscribe frame per symbol per connection

pub mod backoff;
pub mod black_scholes;
pub mod error;
pub mod provider;
pub mod realtime;
pub mod rest;
pub mod types;
mod wire;

pub use backoff::ReconnectPolicy;
pub use error::MarketDataError;
pub use provider::{index_by_contract, ChainData, OptionsDataProvider};
pub use realtime::{
    ConnectionState, RealtimeConnector, RealtimeSubscriptionManager, TickHandler,
    TungsteniteConnector,
};
pub use rest::RestProvider;
pub use types::{
    BSInputs, ContractDescriptor, ContractType, Greeks, IndicatorKind, IndicatorSet,
    IndicatorValue, MarketTick, QuoteTick, SnapshotRecord, TradeTick,
};

pub type MarketDataResult<T> = std::result::Result<T, MarketDataError>;
