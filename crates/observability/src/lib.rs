//! Observability infrastructure for the chain sync pipeline
//!
//! This crate provides:
//! - Structured logging via tracing
//! - Prometheus metrics
//! - Sync and realtime metric helpers
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("chainsync", LogFormat::Pretty)?;
//!
//! // Optional
//! observability::metrics::init_metrics(9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, RealtimeMetrics, SyncMetrics};
