//! Antiflood error types.

use thiserror::Error;

/// Why a quota tier refused a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Per-interval message count exhausted.
    #[error("too many messages: {count}, max {max}")]
    TooManyMessages { count: u32, max: u32 },

    /// Per-interval byte budget exhausted.
    #[error("total size exceeded: {size} bytes, max {max} bytes")]
    TotalSizeExceeded { size: u64, max: u64 },

    /// A single message larger than the whole interval budget.
    #[error("message too large: {size} bytes, max {max} bytes")]
    MessageTooLarge { size: u64, max: u64 },
}

/// Antiflood errors.
///
/// Everything except [`AntifloodError::InvalidConfig`] and
/// [`AntifloodError::NoRuntime`] is an expected admission signal: the
/// caller drops the message and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AntifloodError {
    /// Peer is in the blacklist cache.
    #[error("Peer blacklisted: {peer} ({reason})")]
    PeerBlacklisted { peer: String, reason: String },

    /// Topic exhausted its per-second allowance.
    #[error("Topic flood on {topic}: max {max} messages per second")]
    TopicFlood { topic: String, max: u32 },

    /// Peer exhausted its quota on one tier.
    #[error("Peer flood at tier {tier}: {reason}")]
    PeerFlood { tier: String, reason: RejectReason },

    /// Construction-time configuration error.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Maintenance loops were requested outside a tokio runtime.
    #[error("Antiflood scheduler needs a running tokio runtime")]
    NoRuntime,
}

impl AntifloodError {
    /// True for topic and peer quota rejections.
    pub fn is_flood(&self) -> bool {
        matches!(self, Self::TopicFlood { .. } | Self::PeerFlood { .. })
    }

    /// True if the peer was rejected because it is banned.
    pub fn is_blacklisted(&self) -> bool {
        matches!(self, Self::PeerBlacklisted { .. })
    }
}

/// Result type for antiflood operations.
pub type AntifloodResult<T> = Result<T, AntifloodError>;
