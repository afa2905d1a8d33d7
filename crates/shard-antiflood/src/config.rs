//! Antiflood configuration.

use crate::error::{AntifloodError, AntifloodResult};
use crate::quota::ReactionSpeed;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest reset or print interval a config may ask for (one day).
pub const MAX_INTERVAL_IN_SECONDS: u64 = 24 * 60 * 60;

/// Longest configured ban (one year). External bans may still be longer.
pub const MAX_BAN_DURATION_IN_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Largest adaptive budget multiplier.
pub const MAX_INCREASE_FACTOR: f64 = 1000.0;

/// Complete antiflood configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntifloodConfig {
    /// Disabled means every message is admitted and no loops run.
    pub enabled: bool,
    /// Sizing of the per-tier quota maps.
    pub cache: CacheConfig,
    /// Short-interval tier catching bursts.
    pub fast_reacting: FloodPreventerConfig,
    /// Long-interval tier catching sustained abuse.
    pub slow_reacting: FloodPreventerConfig,
    /// Tier catching peers far outside protocol norms.
    pub out_of_specs: FloodPreventerConfig,
    /// Per-topic rate limits.
    pub topic: TopicAntifloodConfig,
}

impl Default for AntifloodConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache: CacheConfig::default(),
            fast_reacting: FloodPreventerConfig {
                interval_in_seconds: 1,
                reserved_percent: 20.0,
                peer_max_input: PeerMaxInputConfig {
                    base_messages_per_interval: 140,
                    total_size_per_interval: 4 * 1024 * 1024,
                    increase_factor: IncreaseFactorConfig {
                        threshold: 0.9,
                        factor: 1.5,
                    },
                },
                black_list: BlackListConfig {
                    threshold_num_messages_per_interval: 1000,
                    threshold_size_per_interval: 8 * 1024 * 1024,
                    num_flooding_rounds: 10,
                    peer_ban_duration_in_seconds: 300,
                },
            },
            slow_reacting: FloodPreventerConfig {
                interval_in_seconds: 30,
                reserved_percent: 20.0,
                peer_max_input: PeerMaxInputConfig {
                    base_messages_per_interval: 6000,
                    total_size_per_interval: 36 * 1024 * 1024,
                    increase_factor: IncreaseFactorConfig::default(),
                },
                black_list: BlackListConfig {
                    threshold_num_messages_per_interval: 10_000,
                    threshold_size_per_interval: 64 * 1024 * 1024,
                    num_flooding_rounds: 2,
                    peer_ban_duration_in_seconds: 3600,
                },
            },
            out_of_specs: FloodPreventerConfig {
                interval_in_seconds: 1,
                reserved_percent: 0.0,
                peer_max_input: PeerMaxInputConfig {
                    base_messages_per_interval: 2000,
                    total_size_per_interval: 10 * 1024 * 1024,
                    increase_factor: IncreaseFactorConfig::default(),
                },
                black_list: BlackListConfig {
                    threshold_num_messages_per_interval: 3600,
                    threshold_size_per_interval: 12 * 1024 * 1024,
                    num_flooding_rounds: 2,
                    peer_ban_duration_in_seconds: 3600,
                },
            },
            topic: TopicAntifloodConfig::default(),
        }
    }
}

impl AntifloodConfig {
    /// The three tiers in evaluation order.
    pub fn tiers(&self) -> [(ReactionSpeed, &FloodPreventerConfig); 3] {
        [
            (ReactionSpeed::Fast, &self.fast_reacting),
            (ReactionSpeed::Slow, &self.slow_reacting),
            (ReactionSpeed::OutOfSpecs, &self.out_of_specs),
        ]
    }

    /// Check the whole configuration. A disabled config is always valid.
    pub fn validate(&self) -> AntifloodResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.cache.validate()?;
        for (speed, tier) in self.tiers() {
            tier.validate(speed)?;
        }
        self.topic.validate()
    }
}

/// Quota map sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Peers tracked per tier before idle records get pruned.
    pub capacity: usize,
    /// Approximate memory bound for a tier's map (0 = no bound).
    pub size_in_bytes: u64,
    /// Lock shards per map. Must be a power of two.
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 7000,
            size_in_bytes: 0,
            shards: 16,
        }
    }
}

impl CacheConfig {
    pub(crate) fn validate(&self) -> AntifloodResult<()> {
        if self.capacity == 0 {
            return Err(invalid("cache.capacity must be > 0"));
        }
        if self.shards < 2 || !self.shards.is_power_of_two() {
            return Err(invalid("cache.shards must be a power of two > 1"));
        }
        Ok(())
    }
}

/// One quota tier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FloodPreventerConfig {
    /// Reset period of the tier counters.
    pub interval_in_seconds: u64,
    /// Share of the budget only validators may use (0..=100).
    pub reserved_percent: f64,
    /// Per-peer budget.
    pub peer_max_input: PeerMaxInputConfig,
    /// Ban policy fed by this tier.
    pub black_list: BlackListConfig,
}

impl FloodPreventerConfig {
    /// Reset period.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_in_seconds)
    }

    pub(crate) fn validate(&self, speed: ReactionSpeed) -> AntifloodResult<()> {
        if self.interval_in_seconds == 0 || self.interval_in_seconds > MAX_INTERVAL_IN_SECONDS {
            return Err(invalid(format!(
                "{speed}: interval_in_seconds {} outside 1..={MAX_INTERVAL_IN_SECONDS}",
                self.interval_in_seconds
            )));
        }
        if !(0.0..=100.0).contains(&self.reserved_percent) {
            return Err(invalid(format!(
                "{speed}: reserved_percent {} outside 0..=100",
                self.reserved_percent
            )));
        }
        let input = &self.peer_max_input;
        if input.base_messages_per_interval == 0 {
            return Err(invalid(format!(
                "{speed}: base_messages_per_interval must be > 0"
            )));
        }
        if input.total_size_per_interval == 0 {
            return Err(invalid(format!(
                "{speed}: total_size_per_interval must be > 0"
            )));
        }
        if !(0.0..=1.0).contains(&input.increase_factor.threshold) {
            return Err(invalid(format!(
                "{speed}: increase_factor.threshold {} outside 0..=1",
                input.increase_factor.threshold
            )));
        }
        if !(1.0..=MAX_INCREASE_FACTOR).contains(&input.increase_factor.factor) {
            return Err(invalid(format!(
                "{speed}: increase_factor.factor {} outside 1..={MAX_INCREASE_FACTOR}",
                input.increase_factor.factor
            )));
        }
        let black_list = &self.black_list;
        if black_list.threshold_num_messages_per_interval == 0 {
            return Err(invalid(format!(
                "{speed}: black_list.threshold_num_messages_per_interval must be > 0"
            )));
        }
        if black_list.threshold_size_per_interval == 0 {
            return Err(invalid(format!(
                "{speed}: black_list.threshold_size_per_interval must be > 0"
            )));
        }
        if black_list.num_flooding_rounds == 0 {
            return Err(invalid(format!(
                "{speed}: black_list.num_flooding_rounds must be > 0"
            )));
        }
        if black_list.peer_ban_duration_in_seconds == 0
            || black_list.peer_ban_duration_in_seconds > MAX_BAN_DURATION_IN_SECONDS
        {
            return Err(invalid(format!(
                "{speed}: black_list.peer_ban_duration_in_seconds {} outside 1..={MAX_BAN_DURATION_IN_SECONDS}",
                black_list.peer_ban_duration_in_seconds
            )));
        }
        Ok(())
    }
}

/// Per-peer budget of a tier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PeerMaxInputConfig {
    /// Messages per interval for a validator.
    pub base_messages_per_interval: u32,
    /// Bytes per interval for a validator.
    pub total_size_per_interval: u64,
    /// Burst allowance.
    pub increase_factor: IncreaseFactorConfig,
}

/// Adaptive increase of a peer budget within one interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncreaseFactorConfig {
    /// Fraction of the budget (0..=1) that triggers the increase. 0 disables.
    pub threshold: f64,
    /// Budget multiplier. 1 disables.
    pub factor: f64,
}

impl Default for IncreaseFactorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            factor: 1.0,
        }
    }
}

impl IncreaseFactorConfig {
    /// True when the increase can ever apply.
    pub fn is_active(&self) -> bool {
        self.threshold > 0.0 && self.factor > 1.0
    }
}

/// Ban policy of a tier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlackListConfig {
    /// Messages per interval counting as a flooding round.
    pub threshold_num_messages_per_interval: u32,
    /// Bytes per interval counting as a flooding round.
    pub threshold_size_per_interval: u64,
    /// Consecutive flooding rounds before a ban.
    pub num_flooding_rounds: u32,
    /// Ban length.
    pub peer_ban_duration_in_seconds: u64,
}

impl BlackListConfig {
    /// Ban length.
    pub fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.peer_ban_duration_in_seconds)
    }
}

/// Topic rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicAntifloodConfig {
    /// Limit for topics without an override.
    pub default_max_messages_per_sec: u32,
    /// Per-topic overrides.
    pub max_messages: Vec<TopicMaxMessagesConfig>,
}

impl Default for TopicAntifloodConfig {
    fn default() -> Self {
        Self {
            default_max_messages_per_sec: 15_000,
            max_messages: vec![
                TopicMaxMessagesConfig::new("heartbeat", 30),
                TopicMaxMessagesConfig::new("shardBlocks", 30),
                TopicMaxMessagesConfig::new("metachainBlocks", 30),
                TopicMaxMessagesConfig::new("validatorTrieNodes", 5000),
            ],
        }
    }
}

impl TopicAntifloodConfig {
    pub(crate) fn validate(&self) -> AntifloodResult<()> {
        if self.default_max_messages_per_sec == 0 {
            return Err(invalid("topic.default_max_messages_per_sec must be > 0"));
        }
        for entry in &self.max_messages {
            if entry.topic.is_empty() {
                return Err(invalid("topic.max_messages contains an empty topic"));
            }
        }
        Ok(())
    }
}

/// Override for one topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicMaxMessagesConfig {
    /// Topic name.
    pub topic: String,
    /// Messages per second.
    pub num_messages_per_sec: u32,
}

impl TopicMaxMessagesConfig {
    /// Create an override.
    pub fn new(topic: impl Into<String>, num_messages_per_sec: u32) -> Self {
        Self {
            topic: topic.into(),
            num_messages_per_sec,
        }
    }
}

/// Debug section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DebugConfig {
    /// Antiflood decision logging.
    pub antiflood: AntifloodDebugConfig,
}

/// Antiflood debugger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntifloodDebugConfig {
    /// Attach a debugger at construction.
    pub enabled: bool,
    /// Maximum (peer, topic) pairs aggregated between two prints.
    pub cache_size: usize,
    /// Print period.
    pub interval_auto_print_in_seconds: u64,
}

impl Default for AntifloodDebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_size: 10_000,
            interval_auto_print_in_seconds: 5,
        }
    }
}

impl AntifloodDebugConfig {
    /// Check the debugger settings. A disabled debugger is always valid.
    pub fn validate(&self) -> AntifloodResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.cache_size == 0 {
            return Err(invalid("debug.antiflood.cache_size must be > 0"));
        }
        if self.interval_auto_print_in_seconds == 0
            || self.interval_auto_print_in_seconds > MAX_INTERVAL_IN_SECONDS
        {
            return Err(invalid(format!(
                "debug.antiflood.interval_auto_print_in_seconds {} outside 1..={MAX_INTERVAL_IN_SECONDS}",
                self.interval_auto_print_in_seconds
            )));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> AntifloodError {
    AntifloodError::InvalidConfig(msg.into())
}
