// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::server::CloseReason;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Connection metrics
    pub connections_accepted_total: IntCounter,
    pub connections_closed_total: IntCounterVec,
    pub active_connections: IntGauge,
    pub accept_errors_total: IntCounter,

    // Read metrics
    pub reads_total: IntCounter,
    pub bytes_received_total: IntCounter,
    pub read_size_bytes: Histogram,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let connections_accepted_total = IntCounter::new(
            "server_connections_accepted_total",
            "Total number of accepted connections",
        )?;
        registry.register(Box::new(connections_accepted_total.clone()))?;

        let connections_closed_total = IntCounterVec::new(
            Opts::new(
                "server_connections_closed_total",
                "Total number of closed connections",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(connections_closed_total.clone()))?;

        let active_connections = IntGauge::new(
            "server_active_connections",
            "Connections with a running read loop",
        )?;
        registry.register(Box::new(active_connections.clone()))?;

        let accept_errors_total = IntCounter::new(
            "server_accept_errors_total",
            "Total number of failed accept calls",
        )?;
        registry.register(Box::new(accept_errors_total.clone()))?;

        let reads_total = IntCounter::new("server_reads_total", "Total number of non-empty reads")?;
        registry.register(Box::new(reads_total.clone()))?;

        let bytes_received_total = IntCounter::new(
            "server_bytes_received_total",
            "Total number of bytes received",
        )?;
        registry.register(Box::new(bytes_received_total.clone()))?;

        let read_size_bytes = Histogram::with_opts(
            HistogramOpts::new("server_read_size_bytes", "Bytes returned per read")
                .buckets(prometheus::exponential_buckets(16.0, 4.0, 6)?),
        )?;
        registry.register(Box::new(read_size_bytes.clone()))?;

        Ok(Self {
            connections_accepted_total,
            connections_closed_total,
            active_connections,
            accept_errors_total,
            reads_total,
            bytes_received_total,
            read_size_bytes,
        })
    }

    pub fn record_accept(&self) {
        self.connections_accepted_total.inc();
        self.active_connections.inc();
    }

    pub fn record_accept_error(&self) {
        self.accept_errors_total.inc();
    }

    pub fn record_read(&self, bytes: usize) {
        self.reads_total.inc();
        self.bytes_received_total.inc_by(bytes as u64);
        self.read_size_bytes.observe(bytes as f64);
    }

    pub fn record_close(&self, reason: &CloseReason) {
        self.active_connections.dec();
        self.connections_closed_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }
}
