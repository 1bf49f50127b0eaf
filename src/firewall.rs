//! Per-switch stateful firewall.
//!
//! The firewall allows everything by default; each rule blocks traffic towards one address.
//! Rules are pushed to the datapath as highest-priority flows without actions, so they take
//! precedence over anything the learning switch installs, and are recorded in the firewall's
//! rule set so they can be listed and removed later.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::ptr;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use eui48::MacAddress;

use crate::config::{BroadcastPolicy, ControllerConfig};
use crate::error::{Error, Result};
use crate::ofp_controller::SwitchConnection;
use crate::openflow0x01::message::{add_flow, delete_flow, Message};
use crate::openflow0x01::Pattern;
use crate::packet::{EthTyp, Nw, Packet};

/// Protocol blocked when a rule does not name one (ICMP).
pub const DEFAULT_PROTOCOL: u8 = 1;

/// A block rule.
///
/// `protocol` is matched against the OpenFlow `nw_proto` field: the IP protocol number for
/// IPv4 rules and the low byte of the opcode for ARP rules.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FirewallRule {
    /// Block IPv4 traffic of `protocol` destined to `address`.
    Ipv4 { address: Ipv4Addr, protocol: u8 },
    /// Block ARP frames with opcode `protocol` destined to `address`.
    ///
    /// `address` is compared with the Ethernet destination, not the ARP target hardware
    /// address. ARP requests are normally sent to the broadcast address, so a rule with the
    /// default protocol (1, request) only catches requests unicast to `address`; use
    /// `ff:ff:ff:ff:ff:ff` to block broadcast requests.
    Arp { address: MacAddress, protocol: u8 },
}

impl FirewallRule {
    /// Build a rule from an operator-supplied address and ethertype. Only IPv4 (`0x0800`) and
    /// ARP (`0x0806`) rules exist.
    pub fn new(address: &str, dl_type: u16, nw_proto: u8) -> Result<FirewallRule> {
        let address = address.trim();
        match dl_type {
            t if t == (EthTyp::EthTypIP as u16) => {
                let address = Ipv4Addr::from_str(address)
                    .map_err(|_| Error::InvalidAddress(address.to_string()))?;
                Ok(FirewallRule::Ipv4 { address, protocol: nw_proto })
            }
            t if t == (EthTyp::EthTypARP as u16) => {
                let address = MacAddress::parse_str(address)
                    .map_err(|_| Error::InvalidAddress(address.to_string()))?;
                Ok(FirewallRule::Arp { address, protocol: nw_proto })
            }
            t => Err(Error::UnsupportedEthertype(t)),
        }
    }

    pub fn dl_type(&self) -> u16 {
        match *self {
            FirewallRule::Ipv4 { .. } => EthTyp::EthTypIP as u16,
            FirewallRule::Arp { .. } => EthTyp::EthTypARP as u16,
        }
    }

    pub fn protocol(&self) -> u8 {
        match *self {
            FirewallRule::Ipv4 { protocol, .. } |
            FirewallRule::Arp { protocol, .. } => protocol,
        }
    }

    /// The flow match blocking this rule's traffic.
    pub fn pattern(&self) -> Pattern {
        let mut pat = Pattern::match_all();
        pat.dl_typ = Some(self.dl_type());
        pat.nw_proto = Some(self.protocol());
        match *self {
            FirewallRule::Ipv4 { address, .. } => pat.nw_dst = Some(address),
            FirewallRule::Arp { address, .. } => pat.dl_dst = Some(address),
        }
        pat
    }

    /// Whether the flow installed for this rule would drop `pk`.
    pub fn matches(&self, pk: &Packet) -> bool {
        match (*self, &pk.nw) {
            (FirewallRule::Ipv4 { address, protocol }, &Nw::Ip(ref ip)) => {
                ip.dst == address && ip.proto == protocol
            }
            (FirewallRule::Arp { address, protocol }, &Nw::Arp(ref arp)) => {
                pk.dl_dst == address && (arp.oper & 0xff) as u8 == protocol
            }
            _ => false,
        }
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FirewallRule::Ipv4 { address, protocol } => {
                write!(f, "{} -> {:#06x}, {}", address, self.dl_type(), protocol)
            }
            FirewallRule::Arp { address, protocol } => {
                write!(f, "{} -> {:#06x}, {}", address.to_hex_string(), self.dl_type(), protocol)
            }
        }
    }
}

/// Which datapaths a rule change touched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleReport {
    /// Firewalls whose rule set changed and that were sent a flow command.
    pub applied: Vec<u64>,
    /// Firewalls left as they were: duplicates on add, missing rules on delete.
    pub unchanged: Vec<u64>,
}

/// One switch's firewall.
pub struct Firewall {
    conn: Arc<dyn SwitchConnection>,
    rules: Mutex<HashSet<FirewallRule>>,
    priority: u16,
    policy: BroadcastPolicy,
}

impl Firewall {
    pub fn new(conn: Arc<dyn SwitchConnection>, cfg: &ControllerConfig) -> Firewall {
        info!("[{:016x}] Firewall activated", conn.dpid());
        Firewall {
            conn,
            rules: Mutex::new(HashSet::new()),
            priority: cfg.block_priority,
            policy: cfg.broadcast_policy,
        }
    }

    pub fn dpid(&self) -> u64 {
        self.conn.dpid()
    }

    fn rules(&self) -> MutexGuard<HashSet<FirewallRule>> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `rule` and push its block flow. Already present rules are left alone.
    fn insert(&self, rule: FirewallRule) -> Result<()> {
        if !self.rules().insert(rule) {
            return Err(Error::DuplicateRule(rule));
        }
        self.send_block(rule);
        Ok(())
    }

    /// Forget `rule` and delete its block flow.
    fn remove(&self, rule: FirewallRule) -> Result<()> {
        if !self.rules().remove(&rule) {
            return Err(Error::RuleNotFound(rule));
        }
        let flow = delete_flow(self.priority, rule.pattern());
        self.conn.send_message(0, Message::FlowMod(flow));
        Ok(())
    }

    fn send_block(&self, rule: FirewallRule) {
        let flow = add_flow(self.priority, rule.pattern(), vec![]);
        self.conn.send_message(0, Message::FlowMod(flow));
    }

    /// Block traffic to `address` on this switch, or on every registered switch when
    /// `to_all` is set.
    ///
    /// Adding a rule a firewall already holds changes nothing and sends nothing. During a
    /// registry-wide add, the configured `BroadcastPolicy` decides whether such a duplicate
    /// skips just that firewall or ends the fan-out.
    pub fn add_rule(&self,
                    registry: &FirewallRegistry,
                    address: &str,
                    to_all: bool,
                    dl_type: u16,
                    nw_proto: u8)
                    -> Result<RuleReport> {
        let rule = FirewallRule::new(address, dl_type, nw_proto)?;
        let mut report = RuleReport::default();
        if !to_all {
            match self.insert(rule) {
                Ok(()) => report.applied.push(self.dpid()),
                Err(e) => {
                    debug!("[{:016x}] {}", self.dpid(), e);
                    report.unchanged.push(self.dpid());
                }
            }
        } else {
            for fw in registry.firewalls() {
                match fw.insert(rule) {
                    Ok(()) => report.applied.push(fw.dpid()),
                    Err(e) => {
                        debug!("[{:016x}] {}", fw.dpid(), e);
                        report.unchanged.push(fw.dpid());
                        if self.policy == BroadcastPolicy::StopAtDuplicate {
                            break;
                        }
                    }
                }
            }
        }
        debug!("Adding the following rule: {} on {:x?}", rule, report.applied);
        Ok(report)
    }

    /// Stop blocking traffic to `address` on this switch, or on every registered switch when
    /// `to_all` is set. Firewalls without the rule are skipped and sent nothing.
    pub fn del_rule(&self,
                    registry: &FirewallRegistry,
                    address: &str,
                    to_all: bool,
                    dl_type: u16,
                    nw_proto: u8)
                    -> Result<RuleReport> {
        let rule = FirewallRule::new(address, dl_type, nw_proto)?;
        let mut report = RuleReport::default();
        let mut del = |fw: &Firewall| match fw.remove(rule) {
            Ok(()) => report.applied.push(fw.dpid()),
            Err(e) => {
                debug!("[{:016x}] {}", fw.dpid(), e);
                report.unchanged.push(fw.dpid());
            }
        };
        if to_all {
            for fw in registry.firewalls() {
                del(fw.as_ref());
            }
        } else {
            del(self);
        }
        debug!("Removed rule {} from block list of {:x?}", rule, report.applied);
        Ok(report)
    }

    /// Snapshot of the rules this firewall enforces.
    pub fn list_rules(&self) -> Vec<FirewallRule> {
        self.rules().iter().cloned().collect()
    }

    /// Whether this firewall holds `rule`.
    pub fn has_rule(&self, rule: &FirewallRule) -> bool {
        self.rules().contains(rule)
    }

    /// Push a block flow for `address` to every other registered switch without recording
    /// it in their rule sets. Returns the datapaths notified.
    pub fn broadcast_except(&self,
                            registry: &FirewallRegistry,
                            address: &str,
                            dl_type: u16,
                            nw_proto: u8)
                            -> Result<Vec<u64>> {
        let rule = FirewallRule::new(address, dl_type, nw_proto)?;
        let mut notified = vec![];
        for fw in registry.firewalls() {
            if !ptr::eq(self, &*fw) {
                fw.send_block(rule);
                notified.push(fw.dpid());
            }
        }
        debug!("[{:016x}] Sent {} to peers {:x?}", self.dpid(), rule, notified);
        Ok(notified)
    }

    /// The first rule that blocks `pk`, if any.
    pub fn blocks(&self, pk: &Packet) -> Option<FirewallRule> {
        self.rules().iter().find(|rule| rule.matches(pk)).cloned()
    }
}

/// Every firewall created so far, in creation order.
///
/// Cloning the registry clones the handle; all clones see the same firewalls.
#[derive(Clone, Default)]
pub struct FirewallRegistry {
    firewalls: Arc<RwLock<Vec<Arc<Firewall>>>>,
}

impl FirewallRegistry {
    pub fn new() -> FirewallRegistry {
        FirewallRegistry::default()
    }

    /// Append `fw`, returning its index.
    pub fn register(&self, fw: Arc<Firewall>) -> usize {
        let mut firewalls = self.firewalls.write().unwrap_or_else(PoisonError::into_inner);
        firewalls.push(fw);
        firewalls.len() - 1
    }

    /// Drop the firewall of datapath `dpid`.
    pub fn unregister(&self, dpid: u64) -> Option<Arc<Firewall>> {
        let mut firewalls = self.firewalls.write().unwrap_or_else(PoisonError::into_inner);
        let idx = firewalls.iter().position(|fw| fw.dpid() == dpid)?;
        Some(firewalls.remove(idx))
    }

    /// Snapshot of the registered firewalls, in creation order.
    pub fn firewalls(&self) -> Vec<Arc<Firewall>> {
        self.firewalls.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get(&self, index: usize) -> Result<Arc<Firewall>> {
        self.firewalls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
            .ok_or(Error::UnknownFirewall(index))
    }

    pub fn len(&self) -> usize {
        self.firewalls.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
