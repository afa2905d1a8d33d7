//! Quota statistics published to the node's status handler.

use crate::peer::PeerId;
use crate::quota::{Admission, PeerQuota, QuotaStatusHandler, ReactionSpeed};
use parking_lot::Mutex;
use std::sync::Arc;

/// Metrics sink owned by the node.
pub trait StatusHandler: Send + Sync {
    /// Set a gauge.
    fn set_u64_value(&self, metric: &str, value: u64);
    /// Bump a counter.
    fn increment(&self, metric: &str);
}

/// Status handler that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NilStatusHandler;

impl StatusHandler for NilStatusHandler {
    fn set_u64_value(&self, _metric: &str, _value: u64) {}
    fn increment(&self, _metric: &str) {}
}

/// Suffixes of the metrics published per tier.
pub mod names {
    pub const REJECTED_MESSAGES: &str = "rejected_messages";
    pub const NUM_PEERS: &str = "num_peers";
    pub const NUM_RECEIVED: &str = "num_received_messages";
    pub const SIZE_RECEIVED: &str = "size_received_messages";
    pub const NUM_PROCESSED: &str = "num_processed_messages";
    pub const SIZE_PROCESSED: &str = "size_processed_messages";
    pub const PEAK_NUM_RECEIVED: &str = "peak_num_received_messages";
    pub const PEAK_SIZE_RECEIVED: &str = "peak_size_received_messages";
}

/// Full metric name for a tier, e.g. `fast_reacting.num_peers`.
pub fn metric_name(tier: ReactionSpeed, suffix: &str) -> String {
    format!("{}.{}", tier, suffix)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct IntervalTotals {
    peers: u64,
    num_received: u64,
    size_received: u64,
    num_processed: u64,
    size_processed: u64,
    peak_num_received: u64,
    peak_size_received: u64,
}

/// Aggregates one tier's per-peer totals and publishes them at each reset.
pub struct QuotaMetricsProcessor {
    tier: ReactionSpeed,
    handler: Arc<dyn StatusHandler>,
    totals: Mutex<IntervalTotals>,
    rejected_metric: String,
}

impl QuotaMetricsProcessor {
    /// Create a processor for `tier`.
    pub fn new(tier: ReactionSpeed, handler: Arc<dyn StatusHandler>) -> Self {
        Self {
            tier,
            handler,
            totals: Mutex::new(IntervalTotals::default()),
            rejected_metric: metric_name(tier, names::REJECTED_MESSAGES),
        }
    }

    fn publish(&self, suffix: &str, value: u64) {
        self.handler.set_u64_value(&metric_name(self.tier, suffix), value);
    }
}

impl QuotaStatusHandler for QuotaMetricsProcessor {
    fn on_consume(&self, _peer: &PeerId, _quota: &PeerQuota, admission: &Admission) {
        if !admission.is_admitted() {
            self.handler.increment(&self.rejected_metric);
        }
    }

    fn add_quota(&self, _peer: &PeerId, quota: &PeerQuota) {
        let mut totals = self.totals.lock();
        totals.peers += 1;
        totals.num_received += u64::from(quota.num_received);
        totals.size_received += quota.size_received;
        totals.num_processed += u64::from(quota.num_processed);
        totals.size_processed += quota.size_processed;
        totals.peak_num_received = totals.peak_num_received.max(u64::from(quota.num_received));
        totals.peak_size_received = totals.peak_size_received.max(quota.size_received);
    }

    fn reset_statistics(&self) {
        let totals = std::mem::take(&mut *self.totals.lock());
        self.publish(names::NUM_PEERS, totals.peers);
        self.publish(names::NUM_RECEIVED, totals.num_received);
        self.publish(names::SIZE_RECEIVED, totals.size_received);
        self.publish(names::NUM_PROCESSED, totals.num_processed);
        self.publish(names::SIZE_PROCESSED, totals.size_processed);
        self.publish(names::PEAK_NUM_RECEIVED, totals.peak_num_received);
        self.publish(names::PEAK_SIZE_RECEIVED, totals.peak_size_received);
    }
}
