//! Controller tunables.
//!
//! Every value has a default matching the usual learning switch and firewall behaviour.
//! The console binary fills these in from its command line and `OFW_*` variables.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::openflow0x01::{OFP_DEFAULT_PRIORITY, OFP_MAX_PRIORITY};

/// What a registry-wide rule addition does when an instance already holds the rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BroadcastPolicy {
    /// Leave that instance alone and keep going.
    SkipDuplicates,
    /// Stop the fan-out at the first duplicate; later instances are not updated.
    StopAtDuplicate,
}

impl FromStr for BroadcastPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<BroadcastPolicy> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" | "skip-duplicates" => Ok(BroadcastPolicy::SkipDuplicates),
            "stop" | "stop-at-duplicate" => Ok(BroadcastPolicy::StopAtDuplicate),
            other => Err(Error::Config(format!("unknown broadcast policy {:?}", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Seconds of inactivity before a learned forwarding flow expires.
    pub idle_timeout: u16,
    /// Absolute lifetime in seconds of a learned forwarding flow.
    pub hard_timeout: u16,
    pub forward_priority: u16,
    pub block_priority: u16,
    pub broadcast_policy: BroadcastPolicy,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            idle_timeout: 10,
            hard_timeout: 30,
            forward_priority: OFP_DEFAULT_PRIORITY,
            block_priority: OFP_MAX_PRIORITY,
            broadcast_policy: BroadcastPolicy::SkipDuplicates,
        }
    }
}

impl ControllerConfig {
    pub fn with_timeouts(mut self, idle: u16, hard: u16) -> ControllerConfig {
        self.idle_timeout = idle;
        self.hard_timeout = hard;
        self
    }

    pub fn with_broadcast_policy(mut self, policy: BroadcastPolicy) -> ControllerConfig {
        self.broadcast_policy = policy;
        self
    }
}
