//! Optional observer of antiflood decisions.

use crate::config::AntifloodDebugConfig;
use crate::error::{AntifloodError, AntifloodResult};
use crate::peer::PeerId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// One admission decision.
#[derive(Debug, Clone, Copy)]
pub struct DebugEvent<'a> {
    /// Sending peer.
    pub peer: &'a PeerId,
    /// Topic of the message.
    pub topic: &'a str,
    /// Messages in the decision (1 except for batch checks).
    pub num_messages: u32,
    /// Bytes in the decision.
    pub size: u64,
    /// Decision.
    pub outcome: &'a AntifloodResult<()>,
}

impl DebugEvent<'_> {
    /// Tier that rejected the message, if a quota tier did.
    pub fn tier(&self) -> Option<&str> {
        match self.outcome {
            Err(AntifloodError::PeerFlood { tier, .. }) => Some(tier),
            _ => None,
        }
    }

    /// True if the message was admitted.
    pub fn is_admitted(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Observer of antiflood decisions. Must not block.
pub trait Debugger: Send + Sync {
    /// Record a decision.
    fn add_event(&self, event: &DebugEvent<'_>);
}

/// Aggregated decisions of one (peer, topic) pair.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventStats {
    /// Messages let through.
    pub num_admitted: u64,
    /// Bytes let through.
    pub size_admitted: u64,
    /// Messages refused for any reason.
    pub num_rejected: u64,
    /// Bytes refused for any reason.
    pub size_rejected: u64,
    /// Set once a rejection came from the blacklist.
    pub blacklisted: bool,
    /// Rendered reason of the latest refusal.
    pub last_rejection: Option<String>,
}

/// Debugger aggregating decisions per (peer, topic) and logging them on
/// every print tick.
pub struct AntifloodDebugger {
    events: DashMap<(PeerId, String), EventStats>,
    cache_size: usize,
    interval: Duration,
    dropped: AtomicU64,
}

impl AntifloodDebugger {
    /// Create a debugger from its config section.
    pub fn new(config: &AntifloodDebugConfig) -> AntifloodResult<Self> {
        let mut config = config.clone();
        config.enabled = true;
        config.validate()?;
        Ok(Self {
            events: DashMap::new(),
            cache_size: config.cache_size,
            interval: Duration::from_secs(config.interval_auto_print_in_seconds),
            dropped: AtomicU64::new(0),
        })
    }

    /// Print period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Aggregated stats of a pair.
    pub fn stats(&self, peer: &PeerId, topic: &str) -> Option<EventStats> {
        self.events
            .get(&(peer.clone(), topic.to_string()))
            .map(|r| r.clone())
    }

    /// Log and clear everything aggregated since the last print.
    pub fn print_and_clear(&self) -> usize {
        let mut drained = Vec::new();
        self.events.retain(|key, stats| {
            drained.push((key.clone(), std::mem::take(stats)));
            false
        });
        drained.sort_by(|a, b| b.1.num_rejected.cmp(&a.1.num_rejected));

        for ((peer, topic), stats) in &drained {
            info!(
                peer = %peer,
                topic = %topic,
                admitted = stats.num_admitted,
                admitted_size = stats.size_admitted,
                rejected = stats.num_rejected,
                rejected_size = stats.size_rejected,
                blacklisted = stats.blacklisted,
                last_rejection = stats.last_rejection.as_deref().unwrap_or("-"),
                "Antiflood debug"
            );
        }
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            info!(dropped, "Antiflood debug events dropped, cache full");
        }
        drained.len()
    }
}

impl Debugger for AntifloodDebugger {
    fn add_event(&self, event: &DebugEvent<'_>) {
        let key = (event.peer.clone(), event.topic.to_string());
        if !self.events.contains_key(&key) && self.events.len() >= self.cache_size {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut stats = self.events.entry(key).or_default();
        match event.outcome {
            Ok(()) => {
                stats.num_admitted += u64::from(event.num_messages);
                stats.size_admitted += event.size;
            }
            Err(err) => {
                stats.num_rejected += u64::from(event.num_messages);
                stats.size_rejected += event.size;
                stats.blacklisted |= err.is_blacklisted();
                stats.last_rejection = Some(err.to_string());
            }
        }
    }
}
