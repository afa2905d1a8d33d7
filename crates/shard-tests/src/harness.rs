//! Test harness for integration tests.
//!
//! Provides recording collaborators, config builders and a wrapper around
//! the full antiflood component stack.

use parking_lot::{Mutex, RwLock};
use shard_antiflood::{
    new_antiflood_components, AdmitChecker, AntifloodComponents, AntifloodConfig,
    AntifloodDebugConfig, AntifloodError, AntifloodResult, BlackListConfig, CacheConfig,
    DebugEvent, Debugger, FloodPreventerConfig, IncreaseFactorConfig, PeerId, PeerInfo,
    PeerMaxInputConfig, PeerType, PeerValidatorMapper, StatusHandler, TopicAntifloodConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Peer classification backed by a fixed table. Unknown peers are observers.
#[derive(Default)]
pub struct StaticValidatorMapper {
    peers: RwLock<HashMap<PeerId, PeerInfo>>,
}

impl StaticValidatorMapper {
    /// Create an empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an eligible validator with its public key.
    pub fn add_validator(&self, peer: &PeerId, public_key: &[u8]) {
        self.peers.write().insert(
            peer.clone(),
            PeerInfo {
                peer_type: PeerType::EligibleValidator,
                public_key: Some(public_key.to_vec()),
                shard_id: Some(0),
            },
        );
    }
}

impl PeerValidatorMapper for StaticValidatorMapper {
    fn get_peer_info(&self, peer: &PeerId) -> PeerInfo {
        self.peers.read().get(peer).cloned().unwrap_or(PeerInfo {
            peer_type: PeerType::Observer,
            public_key: None,
            shard_id: None,
        })
    }
}

/// Status handler keeping the last value of every gauge and counter.
#[derive(Default)]
pub struct RecordingStatusHandler {
    values: Mutex<HashMap<String, u64>>,
    counters: Mutex<HashMap<String, u64>>,
}

impl RecordingStatusHandler {
    /// Last published value of a gauge.
    pub fn value(&self, metric: &str) -> Option<u64> {
        self.values.lock().get(metric).copied()
    }

    /// Number of increments of a counter.
    pub fn count(&self, metric: &str) -> u64 {
        self.counters.lock().get(metric).copied().unwrap_or(0)
    }
}

impl StatusHandler for RecordingStatusHandler {
    fn set_u64_value(&self, metric: &str, value: u64) {
        self.values.lock().insert(metric.to_string(), value);
    }

    fn increment(&self, metric: &str) {
        *self.counters.lock().entry(metric.to_string()).or_default() += 1;
    }
}

/// Owned copy of a [`DebugEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub peer: PeerId,
    pub topic: String,
    pub num_messages: u32,
    pub size: u64,
    pub outcome: Result<(), AntifloodError>,
}

/// Debugger keeping every decision in order.
#[derive(Default)]
pub struct RecordingDebugger {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingDebugger {
    /// Recorded decisions so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }
}

impl Debugger for RecordingDebugger {
    fn add_event(&self, event: &DebugEvent<'_>) {
        self.events.lock().push(RecordedEvent {
            peer: event.peer.clone(),
            topic: event.topic.to_string(),
            num_messages: event.num_messages,
            size: event.size,
            outcome: event.outcome.clone(),
        });
    }
}

/// Tier with the given budget, no reserved share, no adaptive increase and
/// a blacklist that bans after `num_flooding_rounds` rejecting intervals.
pub fn tier_config(
    interval_in_seconds: u64,
    base_messages_per_interval: u32,
    total_size_per_interval: u64,
) -> FloodPreventerConfig {
    FloodPreventerConfig {
        interval_in_seconds,
        reserved_percent: 0.0,
        peer_max_input: PeerMaxInputConfig {
            base_messages_per_interval,
            total_size_per_interval,
            increase_factor: IncreaseFactorConfig::default(),
        },
        black_list: BlackListConfig {
            threshold_num_messages_per_interval: u32::MAX,
            threshold_size_per_interval: u64::MAX,
            num_flooding_rounds: 3,
            peer_ban_duration_in_seconds: 300,
        },
    }
}

/// Config whose slow and out-of-specs tiers never reject, so the fast tier
/// alone drives admission.
pub fn test_config(fast_reacting: FloodPreventerConfig) -> AntifloodConfig {
    AntifloodConfig {
        enabled: true,
        cache: CacheConfig::default(),
        fast_reacting,
        slow_reacting: tier_config(30, 1_000_000, u64::MAX / 4),
        out_of_specs: tier_config(1, 1_000_000, u64::MAX / 4),
        topic: TopicAntifloodConfig {
            default_max_messages_per_sec: 1_000_000,
            max_messages: Vec::new(),
        },
    }
}

/// Outcome of a burst of messages.
#[derive(Debug, Default, Clone)]
pub struct Burst {
    pub admitted: u32,
    pub rejected: u32,
    pub last_error: Option<AntifloodError>,
}

/// Full antiflood stack with recording collaborators.
pub struct TestAntiflood {
    pub components: AntifloodComponents,
    pub status: Arc<RecordingStatusHandler>,
    pub mapper: Arc<StaticValidatorMapper>,
    pub cancel: CancellationToken,
}

impl TestAntiflood {
    /// Build the stack. Needs a tokio runtime when `config.enabled`.
    pub fn start(config: &AntifloodConfig) -> AntifloodResult<Self> {
        Self::start_with(config, &AntifloodDebugConfig::default(), StaticValidatorMapper::new())
    }

    /// Build the stack with a debugger config and a prepared mapper.
    pub fn start_with(
        config: &AntifloodConfig,
        debug: &AntifloodDebugConfig,
        mapper: StaticValidatorMapper,
    ) -> AntifloodResult<Self> {
        let status = Arc::new(RecordingStatusHandler::default());
        let mapper = Arc::new(mapper);
        let cancel = CancellationToken::new();
        let components = new_antiflood_components(
            config,
            debug,
            status.clone(),
            mapper.clone(),
            cancel.clone(),
        )?;
        Ok(Self {
            components,
            status,
            mapper,
            cancel,
        })
    }

    /// Admission entry point.
    pub fn antiflood(&self) -> &Arc<dyn AdmitChecker> {
        &self.components.antiflood
    }

    /// Send `count` messages of `size` bytes from `peer` on `topic`.
    pub fn send(&self, peer: &PeerId, topic: &str, count: u32, size: u64) -> Burst {
        let mut burst = Burst::default();
        for _ in 0..count {
            match self.antiflood().can_process_message(peer, topic, size) {
                Ok(()) => burst.admitted += 1,
                Err(e) => {
                    burst.rejected += 1;
                    burst.last_error = Some(e);
                }
            }
        }
        burst
    }

    /// Let the scheduler close the current fast interval.
    ///
    /// With paused tokio time this advances just past the next tick of every
    /// 1 second loop.
    pub async fn next_interval(&self) {
        tokio::time::sleep(Duration::from_millis(1010)).await;
    }

    /// Stop the maintenance loops.
    pub async fn shutdown(self) {
        self.components.shutdown().await;
    }
}
