//! Per-peer quota tiers ("flood preventers").
//!
//! A node runs three independent tiers with different reaction speeds. Each
//! tier counts messages and bytes per peer over a fixed window that the
//! scheduler resets. A peer may legally send up to twice its budget across a
//! window boundary.
//!
//! Validators get the full budget; everyone else is capped at
//! `budget * (1 - reserved_percent / 100)`. A peer whose admitted traffic
//! crosses the increase threshold gets its budget multiplied by the increase
//! factor until the next reset.

use crate::config::{CacheConfig, FloodPreventerConfig, IncreaseFactorConfig};
use crate::error::{AntifloodResult, RejectReason};
use crate::peer::{PeerId, PeerValidatorMapper};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Rough per-peer footprint used to turn `size_in_bytes` into a capacity.
const APPROX_RECORD_SIZE: u64 = 128;

/// Reaction speed of a tier. Also its identifier in errors and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionSpeed {
    /// Short interval, catches bursts.
    Fast,
    /// Long interval, catches sustained abuse.
    Slow,
    /// Catches peers far outside protocol norms.
    OutOfSpecs,
}

impl ReactionSpeed {
    /// Stable identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast_reacting",
            Self::Slow => "slow_reacting",
            Self::OutOfSpecs => "out_of_specs",
        }
    }
}

impl std::fmt::Display for ReactionSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Budget class of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerClass {
    /// Validator, may use the reserved share.
    Reserved,
    /// Everyone else.
    #[default]
    Normal,
}

/// Counters of one peer for the current interval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerQuota {
    /// Messages seen, rejected ones included.
    pub num_received: u32,
    /// Bytes seen, rejected ones included.
    pub size_received: u64,
    /// Messages admitted.
    pub num_processed: u32,
    /// Bytes admitted.
    pub size_processed: u64,
    /// Class used for the last decision.
    pub class: PeerClass,
    /// Budget multiplied by the increase factor for this interval.
    pub increased: bool,
}

impl PeerQuota {
    fn is_idle(&self) -> bool {
        self.num_received == 0
    }

    fn reset(&mut self) {
        self.num_received = 0;
        self.size_received = 0;
        self.num_processed = 0;
        self.size_processed = 0;
        self.increased = false;
    }
}

#[derive(Debug)]
struct PeerQuotaRecord {
    quota: PeerQuota,
}

/// Outcome of a consume attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Message fits the peer budget.
    Admitted,
    /// Message refused.
    Rejected(RejectReason),
}

impl Admission {
    /// True if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Observer of a tier's accounting (metrics sink, blacklist processor).
pub trait QuotaStatusHandler: Send + Sync {
    /// Called after every consume attempt with the peer's updated counters.
    fn on_consume(&self, peer: &PeerId, quota: &PeerQuota, admission: &Admission);

    /// Called at reset, once per active peer, with its final interval counters.
    fn add_quota(&self, _peer: &PeerId, _quota: &PeerQuota) {}

    /// Called at reset after all `add_quota` calls. Closes the interval.
    fn reset_statistics(&self);
}

/// Budget limits applied to one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Messages per interval.
    pub max_messages: u32,
    /// Bytes per interval.
    pub max_size: u64,
}

/// One quota tier.
pub struct QuotaTier {
    speed: ReactionSpeed,
    records: DashMap<PeerId, PeerQuotaRecord>,
    mapper: Arc<dyn PeerValidatorMapper>,
    status_handlers: Vec<Arc<dyn QuotaStatusHandler>>,
    base_max_messages: u32,
    max_total_size: u64,
    /// Share of the budget granted to non-validators, in basis points.
    normal_share_bp: u64,
    increase: IncreaseFactorConfig,
    interval: Duration,
    capacity: usize,
}

impl QuotaTier {
    /// Create a tier.
    pub fn new(
        speed: ReactionSpeed,
        config: &FloodPreventerConfig,
        cache: &CacheConfig,
        mapper: Arc<dyn PeerValidatorMapper>,
        status_handlers: Vec<Arc<dyn QuotaStatusHandler>>,
    ) -> AntifloodResult<Self> {
        config.validate(speed)?;
        cache.validate()?;

        let capacity = if cache.size_in_bytes > 0 {
            let by_size = (cache.size_in_bytes / APPROX_RECORD_SIZE).max(1);
            cache.capacity.min(usize::try_from(by_size).unwrap_or(usize::MAX))
        } else {
            cache.capacity
        };

        Ok(Self {
            speed,
            records: DashMap::with_capacity_and_shard_amount(capacity, cache.shards),
            mapper,
            status_handlers,
            base_max_messages: config.peer_max_input.base_messages_per_interval,
            max_total_size: config.peer_max_input.total_size_per_interval,
            normal_share_bp: ((100.0 - config.reserved_percent) * 100.0).round() as u64,
            increase: config.peer_max_input.increase_factor.clone(),
            interval: config.interval(),
            capacity,
        })
    }

    /// Tier identifier.
    pub fn speed(&self) -> ReactionSpeed {
        self.speed
    }

    /// Reset period configured for this tier.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Budget for a peer class, before or after the adaptive increase.
    pub fn budget(&self, class: PeerClass, increased: bool) -> Budget {
        let share_bp = match class {
            PeerClass::Reserved => 10_000,
            PeerClass::Normal => self.normal_share_bp,
        };
        let factor_milli = if increased {
            (self.increase.factor * 1000.0).round() as u128
        } else {
            1000
        };
        let scale = |value: u64| -> u64 {
            (value as u128)
                .checked_mul(share_bp as u128)
                .and_then(|v| v.checked_mul(factor_milli))
                .map_or(u64::MAX, |v| {
                    u64::try_from(v / 10_000_000).unwrap_or(u64::MAX)
                })
        };
        Budget {
            max_messages: u32::try_from(scale(self.base_max_messages as u64)).unwrap_or(u32::MAX),
            max_size: scale(self.max_total_size),
        }
    }

    /// Account for one message from `peer` and decide on it.
    ///
    /// Counters are updated even when the message is rejected so that the
    /// blacklist processor can measure the excess.
    pub fn try_consume(&self, peer: &PeerId, size: u64) -> Admission {
        let class = if self.mapper.get_peer_info(peer).peer_type.is_validator() {
            PeerClass::Reserved
        } else {
            PeerClass::Normal
        };

        let (quota, admission) = {
            let mut record = self
                .records
                .entry(peer.clone())
                .or_insert_with(|| PeerQuotaRecord {
                    quota: PeerQuota::default(),
                });
            let quota = &mut record.quota;
            quota.class = class;

            if !quota.increased && self.crossed_increase_threshold(quota) {
                quota.increased = true;
                trace!(tier = %self.speed, peer = %peer, "Quota increased for interval");
            }

            quota.num_received = quota.num_received.saturating_add(1);
            quota.size_received = quota.size_received.saturating_add(size);

            let budget = self.budget(class, quota.increased);
            let admission = if size > budget.max_size {
                Admission::Rejected(RejectReason::MessageTooLarge {
                    size,
                    max: budget.max_size,
                })
            } else if quota.num_received > budget.max_messages {
                Admission::Rejected(RejectReason::TooManyMessages {
                    count: quota.num_received,
                    max: budget.max_messages,
                })
            } else if quota.size_received > budget.max_size {
                Admission::Rejected(RejectReason::TotalSizeExceeded {
                    size: quota.size_received,
                    max: budget.max_size,
                })
            } else {
                quota.num_processed = quota.num_processed.saturating_add(1);
                quota.size_processed = quota.size_processed.saturating_add(size);
                Admission::Admitted
            };
            (quota.clone(), admission)
        };

        for handler in &self.status_handlers {
            handler.on_consume(peer, &quota, &admission);
        }
        admission
    }

    /// Threshold is evaluated on admitted traffic before the current message,
    /// so a single oversized message never unlocks the increase.
    fn crossed_increase_threshold(&self, quota: &PeerQuota) -> bool {
        if !self.increase.is_active() {
            return false;
        }
        let budget = self.budget(quota.class, false);
        let threshold = self.increase.threshold;
        quota.num_processed as f64 >= threshold * budget.max_messages as f64
            || quota.size_processed as f64 >= threshold * budget.max_size as f64
    }

    /// Zero every counter and drop the per-interval increases.
    ///
    /// Records are reused. Records idle for the whole interval are dropped
    /// only while the map is above capacity.
    pub fn reset(&self) {
        let over_capacity = self.records.len() > self.capacity;
        let mut active = Vec::new();
        let mut pruned = 0usize;

        self.records.retain(|peer, record| {
            let idle = record.quota.is_idle();
            if !idle {
                active.push((peer.clone(), record.quota.clone()));
            }
            record.quota.reset();
            if idle && over_capacity {
                pruned += 1;
                return false;
            }
            true
        });

        for (peer, quota) in &active {
            for handler in &self.status_handlers {
                handler.add_quota(peer, quota);
            }
        }
        for handler in &self.status_handlers {
            handler.reset_statistics();
        }

        debug!(
            tier = %self.speed,
            active = active.len(),
            pruned,
            tracked = self.records.len(),
            "Reset quota tier"
        );
    }

    /// Current counters of a peer.
    pub fn peer_quota(&self, peer: &PeerId) -> Option<PeerQuota> {
        self.records.get(peer).map(|r| r.quota.clone())
    }

    /// Number of tracked peers.
    pub fn tracked_peers(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlackListConfig, PeerMaxInputConfig};
    use crate::peer::{PeerInfo, PeerType};
    use parking_lot::Mutex;
    use std::collections::HashSet;

    struct ValidatorSet(HashSet<PeerId>);

    impl PeerValidatorMapper for ValidatorSet {
        fn get_peer_info(&self, peer: &PeerId) -> PeerInfo {
            let peer_type = if self.0.contains(peer) {
                PeerType::EligibleValidator
            } else {
                PeerType::Observer
            };
            PeerInfo {
                peer_type,
                ..Default::default()
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        consumed: Mutex<Vec<(PeerId, bool)>>,
        added: Mutex<Vec<(PeerId, PeerQuota)>>,
        resets: Mutex<u32>,
    }

    impl QuotaStatusHandler for Recorder {
        fn on_consume(&self, peer: &PeerId, _quota: &PeerQuota, admission: &Admission) {
            self.consumed.lock().push((peer.clone(), admission.is_admitted()));
        }

        fn add_quota(&self, peer: &PeerId, quota: &PeerQuota) {
            self.added.lock().push((peer.clone(), quota.clone()));
        }

        fn reset_statistics(&self) {
            *self.resets.lock() += 1;
        }
    }

    fn tier_config(base: u32, size: u64, reserved: f64) -> FloodPreventerConfig {
        FloodPreventerConfig {
            interval_in_seconds: 1,
            reserved_percent: reserved,
            peer_max_input: PeerMaxInputConfig {
                base_messages_per_interval: base,
                total_size_per_interval: size,
                increase_factor: IncreaseFactorConfig::default(),
            },
            black_list: BlackListConfig {
                threshold_num_messages_per_interval: base,
                threshold_size_per_interval: size,
                num_flooding_rounds: 3,
                peer_ban_duration_in_seconds: 60,
            },
        }
    }

    fn tier(config: FloodPreventerConfig, validators: &[&str]) -> QuotaTier {
        let set = validators.iter().map(|v| PeerId::from(*v)).collect();
        QuotaTier::new(
            ReactionSpeed::Fast,
            &config,
            &CacheConfig::default(),
            Arc::new(ValidatorSet(set)),
            Vec::new(),
        )
        .unwrap()
    }

    fn admitted_count(tier: &QuotaTier, peer: &PeerId, attempts: u32, size: u64) -> u32 {
        (0..attempts)
            .filter(|_| tier.try_consume(peer, size).is_admitted())
            .count() as u32
    }

    #[test]
    fn test_quota_enforcement() {
        let tier = tier(tier_config(5, 1_000_000, 0.0), &[]);
        let peer = PeerId::from("peer");

        for _ in 0..5 {
            assert!(tier.try_consume(&peer, 10).is_admitted());
        }
        assert_eq!(
            tier.try_consume(&peer, 10),
            Admission::Rejected(RejectReason::TooManyMessages { count: 6, max: 5 })
        );

        let quota = tier.peer_quota(&peer).unwrap();
        assert_eq!(quota.num_received, 6);
        assert_eq!(quota.num_processed, 5);
        assert_eq!(quota.size_received, 60);
    }

    #[test]
    fn test_reset_restores_capacity() {
        let tier = tier(tier_config(5, 1_000_000, 0.0), &[]);
        let peer = PeerId::from("peer");

        assert_eq!(admitted_count(&tier, &peer, 8, 1), 5);
        tier.reset();
        assert_eq!(tier.peer_quota(&peer).unwrap(), PeerQuota {
            class: PeerClass::Normal,
            ..Default::default()
        });
        assert_eq!(admitted_count(&tier, &peer, 8, 1), 5);
    }

    #[test]
    fn test_reserved_capacity() {
        let tier = tier(tier_config(10, 1_000_000, 20.0), &["validator"]);

        let validator = PeerId::from("validator");
        let observer = PeerId::from("observer");

        assert_eq!(admitted_count(&tier, &observer, 20, 1), 8);
        assert_eq!(admitted_count(&tier, &validator, 20, 1), 10);
        assert_eq!(tier.peer_quota(&validator).unwrap().class, PeerClass::Reserved);
    }

    #[test]
    fn test_size_budget() {
        let tier = tier(tier_config(100, 1000, 0.0), &[]);
        let peer = PeerId::from("peer");

        assert!(tier.try_consume(&peer, 600).is_admitted());
        assert_eq!(
            tier.try_consume(&peer, 600),
            Admission::Rejected(RejectReason::TotalSizeExceeded { size: 1200, max: 1000 })
        );
        // Rejected bytes count against the interval too
        assert!(!tier.try_consume(&peer, 10).is_admitted());
    }

    #[test]
    fn test_oversized_message_rejected_outright() {
        let mut config = tier_config(100, 1000, 0.0);
        config.peer_max_input.increase_factor = IncreaseFactorConfig {
            threshold: 0.1,
            factor: 4.0,
        };
        let tier = tier(config, &[]);
        let peer = PeerId::from("peer");

        assert_eq!(
            tier.try_consume(&peer, 1001),
            Admission::Rejected(RejectReason::MessageTooLarge { size: 1001, max: 1000 })
        );
        assert_eq!(tier.peer_quota(&peer).unwrap().num_processed, 0);
    }

    #[test]
    fn test_adaptive_increase() {
        let mut config = tier_config(10, 1_000_000, 0.0);
        config.peer_max_input.increase_factor = IncreaseFactorConfig {
            threshold: 0.5,
            factor: 2.0,
        };
        let tier = tier(config, &[]);
        let peer = PeerId::from("peer");

        assert_eq!(admitted_count(&tier, &peer, 50, 1), 20);
        assert!(tier.peer_quota(&peer).unwrap().increased);

        // The increase does not survive the reset
        tier.reset();
        assert!(!tier.peer_quota(&peer).unwrap().increased);
        assert_eq!(tier.budget(PeerClass::Normal, false).max_messages, 10);
    }

    #[test]
    fn test_budget_computation() {
        let mut config = tier_config(140, 4_000_000, 20.0);
        config.peer_max_input.increase_factor = IncreaseFactorConfig {
            threshold: 0.9,
            factor: 1.5,
        };
        let tier = tier(config, &[]);

        assert_eq!(
            tier.budget(PeerClass::Reserved, false),
            Budget { max_messages: 140, max_size: 4_000_000 }
        );
        assert_eq!(
            tier.budget(PeerClass::Normal, false),
            Budget { max_messages: 112, max_size: 3_200_000 }
        );
        assert_eq!(
            tier.budget(PeerClass::Normal, true),
            Budget { max_messages: 168, max_size: 4_800_000 }
        );
    }

    #[test]
    fn test_budget_saturates_at_bounds() {
        let mut config = tier_config(u32::MAX, u64::MAX, 0.0);
        config.peer_max_input.increase_factor = IncreaseFactorConfig {
            threshold: 0.1,
            factor: crate::config::MAX_INCREASE_FACTOR,
        };
        let tier = tier(config, &[]);

        assert_eq!(
            tier.budget(PeerClass::Normal, true),
            Budget { max_messages: u32::MAX, max_size: u64::MAX }
        );
        let peer = PeerId::from("peer");
        assert_eq!(admitted_count(&tier, &peer, 50, 10), 50);
    }

    #[test]
    fn test_unbounded_increase_factor_rejected() {
        let mut config = tier_config(10, 1000, 0.0);
        config.peer_max_input.increase_factor = IncreaseFactorConfig {
            threshold: 0.1,
            factor: 1e30,
        };
        let result = QuotaTier::new(
            ReactionSpeed::Fast,
            &config,
            &CacheConfig::default(),
            Arc::new(ValidatorSet(HashSet::new())),
            Vec::new(),
        );
        assert!(matches!(result, Err(crate::error::AntifloodError::InvalidConfig(_))));
    }

    #[test]
    fn test_status_handlers_notified() {
        let recorder = Arc::new(Recorder::default());
        let tier = QuotaTier::new(
            ReactionSpeed::Slow,
            &tier_config(1, 1000, 0.0),
            &CacheConfig::default(),
            Arc::new(ValidatorSet(HashSet::new())),
            vec![recorder.clone() as Arc<dyn QuotaStatusHandler>],
        )
        .unwrap();

        let peer = PeerId::from("peer");
        tier.try_consume(&peer, 1);
        tier.try_consume(&peer, 1);
        assert_eq!(
            *recorder.consumed.lock(),
            vec![(peer.clone(), true), (peer.clone(), false)]
        );

        tier.reset();
        let added = recorder.added.lock();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].1.num_received, 2);
        assert_eq!(*recorder.resets.lock(), 1);
    }

    #[test]
    fn test_idle_records_pruned_over_capacity() {
        let cache = CacheConfig {
            capacity: 2,
            size_in_bytes: 0,
            shards: 4,
        };
        let tier = QuotaTier::new(
            ReactionSpeed::Fast,
            &tier_config(5, 1000, 0.0),
            &cache,
            Arc::new(ValidatorSet(HashSet::new())),
            Vec::new(),
        )
        .unwrap();

        for name in ["a", "b", "c"] {
            tier.try_consume(&PeerId::from(name), 1);
        }
        tier.reset();
        assert_eq!(tier.tracked_peers(), 3);

        tier.try_consume(&PeerId::from("a"), 1);
        tier.reset();
        assert_eq!(tier.tracked_peers(), 1);
        assert!(tier.peer_quota(&PeerId::from("a")).is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = QuotaTier::new(
            ReactionSpeed::Fast,
            &tier_config(0, 1000, 0.0),
            &CacheConfig::default(),
            Arc::new(ValidatorSet(HashSet::new())),
            Vec::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_concurrent_consume_same_peer() {
        let tier = Arc::new(tier(tier_config(100, 1_000_000, 0.0), &[]));
        let peer = PeerId::from("peer");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tier = Arc::clone(&tier);
                let peer = peer.clone();
                std::thread::spawn(move || admitted_count(&tier, &peer, 50, 1))
            })
            .collect();
        let admitted: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 100);
        assert_eq!(tier.peer_quota(&peer).unwrap().num_received, 400);
    }
}
