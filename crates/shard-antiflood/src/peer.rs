//! Peer identity and validator classification.

/// Opaque, already-authenticated peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub Vec<u8>);

impl PeerId {
    /// Create from bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True for the zero-length identifier.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Role of a peer in the validator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerType {
    /// Validator in the current consensus group.
    EligibleValidator,
    /// Validator waiting to become eligible.
    WaitingValidator,
    /// Known non-validator.
    Observer,
    /// No information.
    #[default]
    Unknown,
}

impl PeerType {
    /// Validators get the reserved share of every quota tier.
    pub fn is_validator(&self) -> bool {
        matches!(self, Self::EligibleValidator | Self::WaitingValidator)
    }
}

impl std::fmt::Display for PeerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EligibleValidator => write!(f, "eligible"),
            Self::WaitingValidator => write!(f, "waiting"),
            Self::Observer => write!(f, "observer"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// What the node knows about a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    /// Validator role.
    pub peer_type: PeerType,
    /// Validator public key, when the peer is a known validator.
    pub public_key: Option<Vec<u8>>,
    /// Shard the peer belongs to.
    pub shard_id: Option<u32>,
}

/// Peer-to-validator mapping, owned by the node's sharding layer.
pub trait PeerValidatorMapper: Send + Sync {
    /// Look up a peer. Unknown peers map to [`PeerInfo::default`].
    fn get_peer_info(&self, peer: &PeerId) -> PeerInfo;
}

/// Mapper that classifies every peer as unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPeerValidatorMapper;

impl PeerValidatorMapper for DisabledPeerValidatorMapper {
    fn get_peer_info(&self, _peer: &PeerId) -> PeerInfo {
        PeerInfo::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_display_is_hex() {
        let id = PeerId::from("ab");
        assert_eq!(id.to_string(), "6162");
        assert!(!id.is_empty());
        assert!(PeerId::from_bytes(Vec::new()).is_empty());
    }

    #[test]
    fn test_validator_classification() {
        assert!(PeerType::EligibleValidator.is_validator());
        assert!(PeerType::WaitingValidator.is_validator());
        assert!(!PeerType::Observer.is_validator());
        assert!(!PeerType::Unknown.is_validator());

        let info = DisabledPeerValidatorMapper.get_peer_info(&PeerId::from("x"));
        assert_eq!(info.peer_type, PeerType::Unknown);
        assert!(info.public_key.is_none());
    }
}
