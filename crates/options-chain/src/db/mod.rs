//! PostgreSQL persistence for the chain tables.

pub mod models;
pub mod postgres;

pub use models::{ContractRow, ExpiryRow, TickerRow};
pub use postgres::PostgresChainStore;
