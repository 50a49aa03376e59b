//! Prometheus metrics infrastructure
//!
//! Exporter setup plus the metric sets recorded by the sync pipeline and the
//! realtime subscription manager. Recording is a no-op until an exporter is
//! installed, so tests can construct these freely.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Initialize the Prometheus metrics exporter on `0.0.0.0:<port>/metrics`.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Metrics for chain sync runs.
///
/// * `chain_contracts_fetched_total` - raw contracts returned by the provider
/// * `chain_contracts_persisted_total` - contract rows written
/// * `chain_expiries_persisted_total` - expiry rows written
/// * `chain_batches_failed_total` - upsert batches that failed
/// * `chain_fallbacks_total{reason}` - reads served from synthetic data
/// * `chain_sync_duration_seconds` - wall time of one ticker sync
#[derive(Clone)]
pub struct SyncMetrics {
    contracts_fetched: Counter,
    contracts_persisted: Counter,
    expiries_persisted: Counter,
    batches_failed: Counter,
    sync_duration: Histogram,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            contracts_fetched: counter!("chain_contracts_fetched_total"),
            contracts_persisted: counter!("chain_contracts_persisted_total"),
            expiries_persisted: counter!("chain_expiries_persisted_total"),
            batches_failed: counter!("chain_batches_failed_total"),
            sync_duration: histogram!("chain_sync_duration_seconds"),
        }
    }

    pub fn record_fetched(&self, count: usize) {
        self.contracts_fetched.increment(count as u64);
    }

    pub fn record_contracts_persisted(&self, count: usize) {
        self.contracts_persisted.increment(count as u64);
    }

    pub fn record_expiries_persisted(&self, count: usize) {
        self.expiries_persisted.increment(count as u64);
    }

    pub fn record_failed_batches(&self, count: usize) {
        self.batches_failed.increment(count as u64);
    }

    pub fn record_sync(&self, duration: Duration) {
        self.sync_duration.record(duration.as_secs_f64());
    }

    /// Count a read served from synthetic data, labelled by why.
    pub fn record_fallback(&self, reason: &'static str) {
        counter!("chain_fallbacks_total", "reason" => reason).increment(1);
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for the realtime quote connection.
#[derive(Clone)]
pub struct RealtimeMetrics {
    frames_dropped: Counter,
    events_dropped: Counter,
    subscriptions: Gauge,
}

impl RealtimeMetrics {
    pub fn new() -> Self {
        Self {
            frames_dropped: counter!("realtime_frames_dropped_total"),
            events_dropped: counter!("realtime_events_dropped_total"),
            subscriptions: gauge!("realtime_subscriptions"),
        }
    }

    /// Count one dispatched tick, labelled `quote` or `trade`.
    pub fn record_event(&self, kind: &'static str) {
        counter!("realtime_events_total", "kind" => kind).increment(1);
    }

    pub fn record_dropped_frame(&self) {
        self.frames_dropped.increment(1);
    }

    /// Events skipped inside an otherwise valid frame.
    pub fn record_dropped_events(&self, count: usize) {
        self.events_dropped.increment(count as u64);
    }

    pub fn set_subscriptions(&self, count: usize) {
        self.subscriptions.set(count as f64);
    }
}

impl Default for RealtimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_without_exporter() {
        // Just verify recording without an installed recorder doesn't panic
        let sync = SyncMetrics::new();
        sync.record_fetched(10);
        sync.record_failed_batches(1);
        sync.record_fallback("unconfigured");
        sync.record_sync(Duration::from_millis(50));

        let realtime = RealtimeMetrics::default();
        realtime.record_event("quote");
        realtime.set_subscriptions(3);
    }
}
