//! Background chain sync.
//!
//! - [`service::ChainSyncService`] syncs one ticker or a bounded-concurrency batch
//! - [`scheduler::SyncWorker`] repeats the batch on an interval until shutdown

pub mod scheduler;
pub mod service;

pub use scheduler::SyncWorker;
pub use service::{first_error, ChainSyncService, SkipReason, SyncReport};
