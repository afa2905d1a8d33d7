//! Admission façade over the blacklist, topic and quota checks.

use crate::blacklist_cache::{BanEntry, PeerBlacklistCache, EXTERNAL_ORIGIN};
use crate::debugger::{DebugEvent, Debugger};
use crate::error::{AntifloodError, AntifloodResult};
use crate::peer::PeerId;
use crate::quota::{Admission, QuotaTier};
use crate::topic::TopicFloodPreventer;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Admission decision for inbound P2P messages.
///
/// Selected once at construction: [`P2PAntiflood`] when the feature is on,
/// [`crate::DisabledAntiflood`] otherwise.
pub trait AdmitChecker: Send + Sync {
    /// Decide on one message. Called before any deserialization.
    fn can_process_message(&self, peer: &PeerId, topic: &str, size: u64) -> AntifloodResult<()>;

    /// Decide on a batch of `num_messages` carried by one message.
    /// Only the blacklist and the topic limit are consulted.
    fn can_process_messages_on_topic(
        &self,
        peer: &PeerId,
        topic: &str,
        num_messages: u32,
        total_size: u64,
    ) -> AntifloodResult<()>;

    /// Ban a peer outside the quota path (e.g. bad signature).
    fn blacklist_peer(&self, peer: &PeerId, reason: &str, duration: Duration);

    /// Attach or detach the decision observer.
    fn set_debugger(&self, debugger: Option<Arc<dyn Debugger>>);

    /// Zero a topic counter.
    fn reset_for_topic(&self, topic: &str);

    /// Register or override a topic limit.
    fn set_max_messages_for_topic(&self, topic: &str, max_per_sec: u32);

    /// False for the no-op implementation.
    fn is_enabled(&self) -> bool;
}

/// Antiflood façade.
///
/// Checks run in order and the first rejection wins:
/// 1. blacklist (no counters touched),
/// 2. topic limit,
/// 3. each quota tier in turn; tiers before the rejecting one keep the
///    message counted, tiers after it never see it.
pub struct P2PAntiflood {
    blacklist: Arc<PeerBlacklistCache>,
    topics: Arc<TopicFloodPreventer>,
    tiers: Vec<Arc<QuotaTier>>,
    debugger: RwLock<Option<Arc<dyn Debugger>>>,
}

impl P2PAntiflood {
    /// Create the façade. Tiers are consulted in the given order.
    pub fn new(
        blacklist: Arc<PeerBlacklistCache>,
        topics: Arc<TopicFloodPreventer>,
        tiers: Vec<Arc<QuotaTier>>,
    ) -> AntifloodResult<Self> {
        if tiers.is_empty() {
            return Err(AntifloodError::InvalidConfig(
                "antiflood needs at least one quota tier".to_string(),
            ));
        }
        Ok(Self {
            blacklist,
            topics,
            tiers,
            debugger: RwLock::new(None),
        })
    }

    /// Quota tiers in evaluation order.
    pub fn tiers(&self) -> &[Arc<QuotaTier>] {
        &self.tiers
    }

    /// Shared topic preventer.
    pub fn topics(&self) -> &Arc<TopicFloodPreventer> {
        &self.topics
    }

    /// Shared blacklist.
    pub fn blacklist(&self) -> &Arc<PeerBlacklistCache> {
        &self.blacklist
    }

    fn check_blacklist(&self, peer: &PeerId) -> AntifloodResult<()> {
        if !self.blacklist.has(peer) {
            return Ok(());
        }
        let reason = self
            .blacklist
            .ban_entry(peer)
            .map(|entry| entry.reason)
            .unwrap_or_default();
        Err(AntifloodError::PeerBlacklisted {
            peer: peer.to_string(),
            reason,
        })
    }

    fn check_message(&self, peer: &PeerId, topic: &str, size: u64) -> AntifloodResult<()> {
        self.check_blacklist(peer)?;
        self.topics.increase_load(topic, 1, size)?;
        for tier in &self.tiers {
            if let Admission::Rejected(reason) = tier.try_consume(peer, size) {
                debug!(peer = %peer, topic, tier = %tier.speed(), %reason, "Peer flood");
                return Err(AntifloodError::PeerFlood {
                    tier: tier.speed().to_string(),
                    reason,
                });
            }
        }
        Ok(())
    }

    fn notify(&self, event: DebugEvent<'_>) {
        if let Some(debugger) = self.debugger.read().as_ref() {
            debugger.add_event(&event);
        }
    }
}

impl AdmitChecker for P2PAntiflood {
    fn can_process_message(&self, peer: &PeerId, topic: &str, size: u64) -> AntifloodResult<()> {
        let outcome = self.check_message(peer, topic, size);
        self.notify(DebugEvent {
            peer,
            topic,
            num_messages: 1,
            size,
            outcome: &outcome,
        });
        outcome
    }

    fn can_process_messages_on_topic(
        &self,
        peer: &PeerId,
        topic: &str,
        num_messages: u32,
        total_size: u64,
    ) -> AntifloodResult<()> {
        let outcome = self
            .check_blacklist(peer)
            .and_then(|()| self.topics.increase_load(topic, num_messages, total_size));
        self.notify(DebugEvent {
            peer,
            topic,
            num_messages,
            size: total_size,
            outcome: &outcome,
        });
        outcome
    }

    fn blacklist_peer(&self, peer: &PeerId, reason: &str, duration: Duration) {
        if peer.is_empty() {
            debug!(reason, "Ignoring blacklist request for empty peer id");
            return;
        }
        let entry = BanEntry {
            reason: reason.to_string(),
            origin: EXTERNAL_ORIGIN.to_string(),
        };
        self.blacklist.upsert(peer, entry, duration);
        warn!(peer = %peer, reason, ?duration, "Blacklisted peer");
    }

    fn set_debugger(&self, debugger: Option<Arc<dyn Debugger>>) {
        *self.debugger.write() = debugger;
    }

    fn reset_for_topic(&self, topic: &str) {
        self.topics.reset_for_topic(topic);
    }

    fn set_max_messages_for_topic(&self, topic: &str, max_per_sec: u32) {
        self.topics.set_max_messages_for_topic(topic, max_per_sec);
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
