//! # shard-antiflood
//!
//! Peer admission control and flood protection for the P2P layer.
//!
//! This crate provides:
//! - Per-peer quota tiers with different reaction speeds
//! - Per-topic message limits
//! - Escalation from repeated flooding to timed peer bans
//! - Background maintenance (counter resets, ban expiry)
//! - An optional decision debugger and quota metrics

mod antiflood;
mod blacklist;
mod blacklist_cache;
pub mod config;
mod debugger;
mod disabled;
mod error;
mod factory;
pub mod metrics;
mod peer;
mod quota;
mod scheduler;
mod time_cache;
mod topic;

pub use antiflood::{AdmitChecker, P2PAntiflood};
pub use blacklist::{BlacklistProcessor, FloodState, FloodingRounds};
pub use blacklist_cache::{
    BanEntry, PeerBlacklistCache, PeerDenialEvaluator, PublicKeyCache, EXTERNAL_ORIGIN,
};
pub use config::{
    AntifloodConfig, AntifloodDebugConfig, BlackListConfig, CacheConfig, DebugConfig,
    FloodPreventerConfig, IncreaseFactorConfig, PeerMaxInputConfig, TopicAntifloodConfig,
    TopicMaxMessagesConfig,
};
pub use debugger::{AntifloodDebugger, DebugEvent, Debugger, EventStats};
pub use disabled::DisabledAntiflood;
pub use error::{AntifloodError, AntifloodResult, RejectReason};
pub use factory::{new_antiflood_components, AntifloodComponents};
pub use metrics::{NilStatusHandler, QuotaMetricsProcessor, StatusHandler};
pub use peer::{DisabledPeerValidatorMapper, PeerId, PeerInfo, PeerType, PeerValidatorMapper};
pub use quota::{
    Admission, Budget, PeerClass, PeerQuota, QuotaStatusHandler, QuotaTier, ReactionSpeed,
};
pub use scheduler::{MaintenanceTargets, Scheduler, SWEEP_INTERVAL, TOPIC_RESET_INTERVAL};
pub use time_cache::{Sweeper, TimeCache};
pub use topic::TopicFloodPreventer;
