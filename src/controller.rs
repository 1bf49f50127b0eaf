use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::firewall::{Firewall, FirewallRegistry};
use crate::learning_switch::{Forwarding, LearningSwitch};
use crate::ofp_controller::{OfpController, SwitchConnection};
use crate::openflow0x01::PacketIn;
use crate::packet::Packet;

/// The controller-side objects bound to one switch connection.
pub struct SwitchInstance {
    pub switch: LearningSwitch,
    pub firewall: Arc<Firewall>,
}

/// Binds every connecting switch to a learning switch and a firewall, and routes packet-ins
/// through the firewall before the learning switch sees them.
pub struct Controller {
    cfg: ControllerConfig,
    registry: FirewallRegistry,
    switches: HashMap<u64, SwitchInstance>,
    order: Vec<u64>,
}

impl Controller {
    pub fn new(cfg: ControllerConfig, registry: FirewallRegistry) -> Controller {
        Controller {
            cfg,
            registry,
            switches: HashMap::new(),
            order: vec![],
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &FirewallRegistry {
        &self.registry
    }

    /// Datapath ids of the connected switches, oldest connection first.
    pub fn dpids(&self) -> &[u64] {
        &self.order
    }

    pub fn instance(&self, sw: u64) -> Result<&SwitchInstance> {
        self.switches.get(&sw).ok_or(Error::UnknownSwitch(sw))
    }

    pub fn switch(&self, sw: u64) -> Result<&LearningSwitch> {
        self.instance(sw).map(|inst| &inst.switch)
    }

    /// The firewall at `index` in the registry.
    pub fn firewall(&self, index: usize) -> Result<Arc<Firewall>> {
        self.registry.get(index)
    }

    /// Run a packet-in from switch `sw` through its firewall and learning switch.
    ///
    /// Returns `Ok(None)` when a firewall rule blocks the packet; nothing is sent and nothing
    /// is learned in that case.
    pub fn handle_packet_in(&mut self, sw: u64, xid: u32, pkt: PacketIn) -> Result<Option<Forwarding>> {
        let inst = self.switches.get_mut(&sw).ok_or(Error::UnknownSwitch(sw))?;
        let pk = Packet::parse(pkt.input_payload.bytes())?;
        if let Some(rule) = inst.firewall.blocks(&pk) {
            debug!("[{:016x}] Dropping packet blocked by {}", sw, rule);
            return Ok(None);
        }
        Ok(Some(inst.switch.handle_packet(xid, &pk, pkt)))
    }
}

impl OfpController for Controller {
    fn switch_connected(&mut self, conn: Arc<dyn SwitchConnection>) {
        let sw = conn.dpid();
        debug!("Controlling {:016x}", sw);
        if self.switches.contains_key(&sw) {
            warn!("[{:016x}] Switch reconnected; replacing its state", sw);
            self.switch_disconnected(sw);
        }
        let firewall = Arc::new(Firewall::new(conn.clone(), &self.cfg));
        let index = self.registry.register(firewall.clone());
        debug!("[{:016x}] Registered as fw[{}]", sw, index);
        let switch = LearningSwitch::new(conn, &self.cfg);
        self.switches.insert(sw, SwitchInstance { switch, firewall });
        self.order.push(sw);
    }

    fn switch_disconnected(&mut self, sw: u64) {
        if self.switches.remove(&sw).is_some() {
            self.registry.unregister(sw);
            self.order.retain(|&d| d != sw);
            info!("[{:016x}] Switch disconnected", sw);
        }
    }

    fn packet_in(&mut self, sw: u64, xid: u32, pkt: PacketIn) {
        if let Err(e) = self.handle_packet_in(sw, xid, pkt) {
            warn!("[{:016x}] {}", sw, e);
        }
    }
}
