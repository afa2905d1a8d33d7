//! Banned peers and public keys.

use crate::peer::{PeerId, PeerValidatorMapper};
use crate::time_cache::{Sweeper, TimeCache};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Origin recorded for bans issued outside the quota tiers.
pub const EXTERNAL_ORIGIN: &str = "external";

/// Diagnostic data attached to a ban.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanEntry {
    /// Why the peer was banned.
    pub reason: String,
    /// Tier identifier, or [`EXTERNAL_ORIGIN`].
    pub origin: String,
}

/// Time-limited blacklist of peers.
///
/// Shared by the antiflood façade, the blacklist processors and the
/// transport. Entries disappear only when a sweep observes their expiry.
#[derive(Default)]
pub struct PeerBlacklistCache {
    cache: TimeCache<PeerId, BanEntry>,
}

impl PeerBlacklistCache {
    /// Create an empty blacklist.
    pub fn new() -> Self {
        Self {
            cache: TimeCache::new(),
        }
    }

    /// Ban a peer for `duration`. Re-banning keeps the longer duration.
    pub fn upsert(&self, peer: &PeerId, entry: BanEntry, duration: Duration) {
        if peer.is_empty() {
            debug!(reason = %entry.reason, "Ignoring ban of empty peer id");
            return;
        }
        self.cache.upsert(peer.clone(), entry, duration);
    }

    /// Is the peer banned?
    pub fn has(&self, peer: &PeerId) -> bool {
        self.cache.has(peer)
    }

    /// Diagnostic data of an active ban.
    pub fn ban_entry(&self, peer: &PeerId) -> Option<BanEntry> {
        self.cache.get(peer)
    }

    /// Time left on a ban.
    pub fn remaining(&self, peer: &PeerId) -> Option<Duration> {
        self.cache.remaining(peer)
    }

    /// Lift a ban.
    pub fn remove(&self, peer: &PeerId) {
        self.cache.remove(peer);
    }

    /// Banned peers, expired-but-unswept included.
    pub fn banned_peers(&self) -> Vec<PeerId> {
        self.cache.keys()
    }

    /// Get the number of bans.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if nobody is banned.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Sweeper for PeerBlacklistCache {
    fn sweep(&self) -> usize {
        let removed = self.cache.sweep();
        if removed > 0 {
            debug!(removed, remaining = self.cache.len(), "Swept peer blacklist");
        }
        removed
    }
}

/// Validator public keys denied before signature verification.
pub type PublicKeyCache = TimeCache<Vec<u8>>;

/// Connection-level deny check over both blacklists.
pub struct PeerDenialEvaluator {
    peers: Arc<PeerBlacklistCache>,
    public_keys: Arc<PublicKeyCache>,
    mapper: Arc<dyn PeerValidatorMapper>,
}

impl PeerDenialEvaluator {
    /// Create an evaluator over shared caches.
    pub fn new(
        peers: Arc<PeerBlacklistCache>,
        public_keys: Arc<PublicKeyCache>,
        mapper: Arc<dyn PeerValidatorMapper>,
    ) -> Self {
        Self {
            peers,
            public_keys,
            mapper,
        }
    }

    /// True if the peer or its validator key is banned.
    pub fn is_denied(&self, peer: &PeerId) -> bool {
        if self.peers.has(peer) {
            return true;
        }
        match self.mapper.get_peer_info(peer).public_key {
            Some(pk) => self.public_keys.has(&pk),
            None => false,
        }
    }

    /// Ban a peer and, when the mapper knows it, its public key.
    pub fn upsert_peer(&self, peer: &PeerId, reason: &str, duration: Duration) {
        if peer.is_empty() {
            debug!(reason, "Ignoring denial of empty peer id");
            return;
        }
        self.peers.upsert(
            peer,
            BanEntry {
                reason: reason.to_string(),
                origin: EXTERNAL_ORIGIN.to_string(),
            },
            duration,
        );
        if let Some(pk) = self.mapper.get_peer_info(peer).public_key {
            self.public_keys.add(pk, duration);
        }
        warn!(peer = %peer, reason, ?duration, "Denied peer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{PeerInfo, PeerType};

    struct KeyedMapper;

    impl PeerValidatorMapper for KeyedMapper {
        fn get_peer_info(&self, peer: &PeerId) -> PeerInfo {
            PeerInfo {
                peer_type: PeerType::EligibleValidator,
                public_key: Some(peer.as_bytes().iter().rev().copied().collect()),
                shard_id: Some(0),
            }
        }
    }

    fn entry(reason: &str) -> BanEntry {
        BanEntry {
            reason: reason.to_string(),
            origin: "fast".to_string(),
        }
    }

    #[test]
    fn test_ban_and_lookup() {
        let cache = PeerBlacklistCache::new();
        let peer = PeerId::from("peer1");

        cache.upsert(&peer, entry("flooding"), Duration::from_secs(60));
        assert!(cache.has(&peer));
        assert_eq!(cache.ban_entry(&peer).unwrap().reason, "flooding");
        assert_eq!(cache.banned_peers(), vec![peer.clone()]);

        cache.remove(&peer);
        assert!(!cache.has(&peer));
    }

    #[test]
    fn test_empty_peer_is_ignored() {
        let cache = PeerBlacklistCache::new();
        cache.upsert(&PeerId::from(""), entry("x"), Duration::from_secs(60));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_lifts_expired_ban() {
        let cache = PeerBlacklistCache::new();
        let peer = PeerId::from("peer1");
        cache.upsert(&peer, entry("flooding"), Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.has(&peer));

        assert_eq!(Sweeper::sweep(&cache), 1);
        assert!(!cache.has(&peer));
    }

    #[test]
    fn test_denial_by_public_key() {
        let peers = Arc::new(PeerBlacklistCache::new());
        let keys = Arc::new(PublicKeyCache::new());
        let evaluator = PeerDenialEvaluator::new(peers.clone(), keys.clone(), Arc::new(KeyedMapper));

        let peer = PeerId::from("ab");
        assert!(!evaluator.is_denied(&peer));

        // Key banned on its own, e.g. after a bad signature under a new peer id
        keys.add(b"ba".to_vec(), Duration::from_secs(60));
        assert!(evaluator.is_denied(&peer));
        assert!(!peers.has(&peer));
    }

    #[test]
    fn test_upsert_peer_bans_both() {
        let peers = Arc::new(PeerBlacklistCache::new());
        let keys = Arc::new(PublicKeyCache::new());
        let evaluator = PeerDenialEvaluator::new(peers.clone(), keys.clone(), Arc::new(KeyedMapper));

        let peer = PeerId::from("ab");
        evaluator.upsert_peer(&peer, "invalid signature", Duration::from_secs(60));

        assert!(peers.has(&peer));
        assert!(keys.has(&b"ba".to_vec()));
        assert_eq!(peers.ban_entry(&peer).unwrap().origin, EXTERNAL_ORIGIN);
    }
}
