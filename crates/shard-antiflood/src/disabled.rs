//! No-op admission used when antiflood is turned off.

use crate::antiflood::AdmitChecker;
use crate::debugger::Debugger;
use crate::error::AntifloodResult;
use crate::peer::PeerId;
use std::sync::Arc;
use std::time::Duration;

/// Admits everything and keeps no state.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAntiflood;

impl AdmitChecker for DisabledAntiflood {
    fn can_process_message(&self, _peer: &PeerId, _topic: &str, _size: u64) -> AntifloodResult<()> {
        Ok(())
    }

    fn can_process_messages_on_topic(
        &self,
        _peer: &PeerId,
        _topic: &str,
        _num_messages: u32,
        _total_size: u64,
    ) -> AntifloodResult<()> {
        Ok(())
    }

    fn blacklist_peer(&self, _peer: &PeerId, _reason: &str, _duration: Duration) {}

    fn set_debugger(&self, _debugger: Option<Arc<dyn Debugger>>) {}

    fn reset_for_topic(&self, _topic: &str) {}

    fn set_max_messages_for_topic(&self, _topic: &str, _max_per_sec: u32) {}

    fn is_enabled(&self) -> bool {
        false
    }
}
