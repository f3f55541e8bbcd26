//! Prometheus counters for the session

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{MarketDataError, Result};

/// Counters for routed frames and topic deliveries
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    frames: IntCounterVec,
    dropped: IntCounterVec,
    resolved: IntCounter,
    rejected: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let frames = IntCounterVec::new(
            Opts::new("ftx_frames_total", "Inbound frames by envelope type"),
            &["type"],
        )?;
        let dropped = IntCounterVec::new(
            Opts::new("ftx_frames_dropped_total", "Inbound frames dropped without effect"),
            &["reason"],
        )?;
        let resolved = IntCounter::new(
            "ftx_topics_resolved_total",
            "Waiters resolved with an update",
        )?;
        let rejected =
            IntCounter::new("ftx_topics_rejected_total", "Waiters failed with an error")?;

        registry.register(Box::new(frames.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(resolved.clone()))?;
        registry.register(Box::new(rejected.clone()))?;

        Ok(Self {
            registry,
            frames,
            dropped,
            resolved,
            rejected,
        })
    }

    pub fn frame(&self, kind: &str) {
        self.frames.with_label_values(&[kind]).inc();
    }

    pub fn dropped(&self, reason: &str) {
        self.dropped.with_label_values(&[reason]).inc();
    }

    pub fn resolved(&self, waiters: usize) {
        self.resolved.inc_by(waiters as u64);
    }

    pub fn rejected(&self, waiters: usize) {
        self.rejected.inc_by(waiters as u64);
    }

    pub fn dropped_count(&self, reason: &str) -> u64 {
        self.dropped.with_label_values(&[reason]).get()
    }

    /// Text exposition of every counter
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(MarketDataError::from)?;
        String::from_utf8(buffer).map_err(|e| MarketDataError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.frame("update");
        metrics.dropped("unknown_market");
        metrics.resolved(2);

        let text = metrics.encode().unwrap();
        assert!(text.contains("ftx_frames_total{type=\"update\"} 1"));
        assert!(text.contains("ftx_topics_resolved_total 2"));
        assert_eq!(metrics.dropped_count("unknown_market"), 1);
    }
}
