use crate::firewall::FirewallRule;

/// Failures surfaced by the controller. None of these are fatal: handlers log them and
/// keep processing events for every other connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ignoring incomplete packet: {0}")]
    UnparsedPacket(String),

    #[error("unsupported ethertype {0:#06x}")]
    UnsupportedEthertype(u16),

    #[error("duplicate rule {0}")]
    DuplicateRule(FirewallRule),

    #[error("rule {0} not found")]
    RuleNotFound(FirewallRule),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("no firewall at index {0}")]
    UnknownFirewall(usize),

    #[error("no switch with dpid {0:016x}")]
    UnknownSwitch(u64),

    #[error("command error: {0}")]
    Command(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
