//! Per-topic message rate limiting.
//!
//! Counts aggregate traffic per topic regardless of the sending peer. Limits
//! are per second; the scheduler resets the counters every second.

use crate::config::TopicAntifloodConfig;
use crate::error::{AntifloodError, AntifloodResult};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TopicQuotaRecord {
    num_messages: u32,
    total_size: u64,
}

/// Topic flood preventer.
pub struct TopicFloodPreventer {
    /// Counters for the current second.
    counters: DashMap<String, TopicQuotaRecord>,
    /// Registered per-topic limits.
    overrides: RwLock<HashMap<String, u32>>,
    /// Limit for unregistered topics.
    default_max_per_sec: u32,
}

impl TopicFloodPreventer {
    /// Create a preventer with the configured overrides registered.
    pub fn new(config: &TopicAntifloodConfig) -> AntifloodResult<Self> {
        config.validate()?;
        let overrides = config
            .max_messages
            .iter()
            .map(|entry| (entry.topic.clone(), entry.num_messages_per_sec))
            .collect();
        Ok(Self {
            counters: DashMap::new(),
            overrides: RwLock::new(overrides),
            default_max_per_sec: config.default_max_messages_per_sec,
        })
    }

    /// Register or override a topic limit. Counters already accumulated in
    /// the current second are kept.
    pub fn set_max_messages_for_topic(&self, topic: &str, max_per_sec: u32) {
        self.overrides.write().insert(topic.to_string(), max_per_sec);
        info!(topic, max_per_sec, "Set topic message limit");
    }

    /// True if the topic has its own limit.
    pub fn is_registered(&self, topic: &str) -> bool {
        self.overrides.read().contains_key(topic)
    }

    /// Limit applying to a topic.
    pub fn max_messages_for_topic(&self, topic: &str) -> u32 {
        self.overrides
            .read()
            .get(topic)
            .copied()
            .unwrap_or(self.default_max_per_sec)
    }

    /// Add `num_messages` to the topic counter if they fit this second.
    ///
    /// A refused batch is not counted.
    pub fn increase_load(&self, topic: &str, num_messages: u32, size: u64) -> AntifloodResult<()> {
        let max = self.max_messages_for_topic(topic);
        let mut record = self.counters.entry(topic.to_string()).or_default();
        let next = record.num_messages.saturating_add(num_messages);
        if next > max {
            debug!(topic, current = record.num_messages, max, "Topic flood");
            return Err(AntifloodError::TopicFlood {
                topic: topic.to_string(),
                max,
            });
        }
        record.num_messages = next;
        record.total_size = record.total_size.saturating_add(size);
        Ok(())
    }

    /// Messages counted on a topic this second.
    pub fn current_load(&self, topic: &str) -> u32 {
        self.counters
            .get(topic)
            .map(|r| r.num_messages)
            .unwrap_or(0)
    }

    /// Bytes counted on a topic this second.
    pub fn current_size(&self, topic: &str) -> u64 {
        self.counters.get(topic).map(|r| r.total_size).unwrap_or(0)
    }

    /// Zero one topic.
    pub fn reset_for_topic(&self, topic: &str) {
        if let Some(mut record) = self.counters.get_mut(topic) {
            *record = TopicQuotaRecord::default();
        }
    }

    /// Zero every registered topic.
    pub fn reset(&self) {
        let registered = self.registered_topics();
        for topic in &registered {
            self.reset_for_topic(topic);
        }
    }

    /// Drop the counters of every unregistered topic.
    pub fn reset_for_not_registered_topics(&self) {
        let registered = self.registered_topics();
        self.counters.retain(|topic, _| registered.contains(topic));
    }

    fn registered_topics(&self) -> HashSet<String> {
        self.overrides.read().keys().cloned().collect()
    }
}
