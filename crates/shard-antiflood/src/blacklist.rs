//! Promotion of persistently flooding peers into the blacklist.
//!
//! One processor observes one quota tier. Per peer it walks
//! `Clean -> Flagged(n) -> Banned`:
//!
//! - the first flooding report of an interval increments `n`;
//! - an interval closing without any flooding report drops the peer back to
//!   `Clean`, so only consecutive rounds count;
//! - reaching `num_flooding_rounds` bans the peer for the configured
//!   duration and resets `n`.
//!
//! A ban ends when the blacklist sweep removes the expired entry.

use crate::blacklist_cache::{BanEntry, PeerBlacklistCache};
use crate::config::{BlackListConfig, MAX_BAN_DURATION_IN_SECONDS};
use crate::error::{AntifloodError, AntifloodResult};
use crate::peer::PeerId;
use crate::quota::{Admission, PeerQuota, QuotaStatusHandler, ReactionSpeed};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Flooding history of one peer on one tier.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FloodingRounds {
    /// Consecutive flooding intervals, the current one included.
    pub consecutive: u32,
    /// Messages above the threshold, summed over the streak.
    pub excess_messages: u64,
    /// Bytes above the threshold, summed over the streak.
    pub excess_size: u64,
    /// A flooding report was already counted in the current interval.
    flagged: bool,
}

/// Externally visible state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodState {
    /// No current streak.
    Clean,
    /// Flooded in this many consecutive intervals.
    Flagged(u32),
    /// In the blacklist.
    Banned,
}

/// Blacklist processor for one tier.
pub struct BlacklistProcessor {
    origin: ReactionSpeed,
    rounds: DashMap<PeerId, FloodingRounds>,
    blacklist: Arc<PeerBlacklistCache>,
    threshold_num_messages: u32,
    threshold_size: u64,
    num_flooding_rounds: u32,
    ban_duration: Duration,
}

impl BlacklistProcessor {
    /// Create a processor writing into `blacklist`.
    pub fn new(
        origin: ReactionSpeed,
        config: &BlackListConfig,
        blacklist: Arc<PeerBlacklistCache>,
    ) -> AntifloodResult<Self> {
        if config.threshold_num_messages_per_interval == 0
            || config.threshold_size_per_interval == 0
        {
            return Err(AntifloodError::InvalidConfig(format!(
                "{origin}: black list thresholds must be > 0"
            )));
        }
        if config.num_flooding_rounds == 0 {
            return Err(AntifloodError::InvalidConfig(format!(
                "{origin}: num_flooding_rounds must be > 0"
            )));
        }
        if config.peer_ban_duration_in_seconds == 0
            || config.peer_ban_duration_in_seconds > MAX_BAN_DURATION_IN_SECONDS
        {
            return Err(AntifloodError::InvalidConfig(format!(
                "{origin}: peer_ban_duration_in_seconds must be in 1..={MAX_BAN_DURATION_IN_SECONDS}"
            )));
        }

        Ok(Self {
            origin,
            rounds: DashMap::new(),
            blacklist,
            threshold_num_messages: config.threshold_num_messages_per_interval,
            threshold_size: config.threshold_size_per_interval,
            num_flooding_rounds: config.num_flooding_rounds,
            ban_duration: config.ban_duration(),
        })
    }

    /// Current state of a peer.
    pub fn state(&self, peer: &PeerId) -> FloodState {
        if self.blacklist.has(peer) {
            return FloodState::Banned;
        }
        match self.rounds.get(peer) {
            Some(rounds) if rounds.consecutive > 0 => FloodState::Flagged(rounds.consecutive),
            _ => FloodState::Clean,
        }
    }

    /// Flooding history of a peer.
    pub fn flooding_rounds(&self, peer: &PeerId) -> Option<FloodingRounds> {
        self.rounds.get(peer).map(|r| r.clone())
    }

    fn is_flooding(&self, quota: &PeerQuota, admission: &Admission) -> bool {
        !admission.is_admitted()
            || quota.num_received >= self.threshold_num_messages
            || quota.size_received >= self.threshold_size
    }

    fn ban(&self, peer: &PeerId, rounds: u32) {
        let entry = BanEntry {
            reason: format!("flooding for {rounds} consecutive rounds"),
            origin: self.origin.to_string(),
        };
        self.blacklist.upsert(peer, entry, self.ban_duration);
        warn!(
            peer = %peer,
            tier = %self.origin,
            rounds,
            duration = ?self.ban_duration,
            "Banning flooding peer"
        );
    }
}

impl QuotaStatusHandler for BlacklistProcessor {
    fn on_consume(&self, peer: &PeerId, quota: &PeerQuota, admission: &Admission) {
        if peer.is_empty() {
            debug!(tier = %self.origin, "Ignoring quota report for empty peer id");
            return;
        }
        if !self.is_flooding(quota, admission) || self.blacklist.has(peer) {
            return;
        }

        let banned_after = {
            let mut rounds = self.rounds.entry(peer.clone()).or_default();
            if rounds.flagged {
                return;
            }
            rounds.flagged = true;
            rounds.consecutive += 1;
            debug!(
                peer = %peer,
                tier = %self.origin,
                rounds = rounds.consecutive,
                "Flooding round"
            );
            if rounds.consecutive >= self.num_flooding_rounds {
                let total = rounds.consecutive;
                rounds.consecutive = 0;
                rounds.excess_messages = 0;
                rounds.excess_size = 0;
                Some(total)
            } else {
                None
            }
        };

        if let Some(total) = banned_after {
            self.ban(peer, total);
        }
    }

    fn add_quota(&self, peer: &PeerId, quota: &PeerQuota) {
        if let Some(mut rounds) = self.rounds.get_mut(peer) {
            if rounds.flagged && rounds.consecutive > 0 {
                rounds.excess_messages += u64::from(
                    quota.num_received.saturating_sub(self.threshold_num_messages),
                );
                rounds.excess_size += quota.size_received.saturating_sub(self.threshold_size);
            }
        }
    }

    fn reset_statistics(&self) {
        self.rounds.retain(|_, rounds| {
            if rounds.flagged {
                rounds.flagged = false;
                return true;
            }
            false
        });
    }
}
