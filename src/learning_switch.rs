use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use eui48::MacAddress;

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::ofp_controller::SwitchConnection;
use crate::openflow0x01::message::{add_flow, Message};
use crate::openflow0x01::{Action, FlowMod, PacketIn, PacketOut, Payload, Pattern, PseudoPort, Timeout};
use crate::packet::{arp_opcode_name, ethernet_frame, ip_proto_name, ipv4_datagram, EthTyp, Nw, Packet};

/// What the switch did with a packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Forwarding {
    /// Destination unknown; resent out of every port but the ingress port.
    Flood,
    /// Destination learned; flow installed and packet resent out of this port.
    Forward(u16),
}

/// Read-only summary of a packet's network layer, logged as packets arrive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    Ip { proto: u8, src: Ipv4Addr, dst: Ipv4Addr },
    Arp { oper: u16, src: MacAddress, dst: MacAddress },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Diagnostic::Ip { proto, src, dst } => {
                write!(f, "IP packet, protocol {}, {} -> {}", ip_proto_name(proto), src, dst)
            }
            Diagnostic::Arp { oper, src, dst } => {
                write!(f,
                       "ARP packet, opcode {}, {} -> {}",
                       arp_opcode_name(oper),
                       src.to_hex_string(),
                       dst.to_hex_string())
            }
        }
    }
}

/// Summarize the IPv4 or ARP layer of `pk`, if it has one.
pub fn diagnose(pk: &Packet) -> Option<Diagnostic> {
    match pk.nw {
        Nw::Ip(ref ip) => {
            Some(Diagnostic::Ip {
                proto: ip.proto,
                src: ip.src,
                dst: ip.dst,
            })
        }
        Nw::Arp(ref arp) => {
            Some(Diagnostic::Arp {
                oper: arp.oper,
                src: arp.sha,
                dst: arp.tha,
            })
        }
        Nw::Unparsable(..) => None,
    }
}

/// Implements L2 learning switch functionality for one datapath.
///
/// Every packet-in teaches the switch which port its source MAC lives on. If the destination
/// MAC is already known, a flow matching the packet is installed with idle and hard timeouts
/// so stale routes age out in the datapath, and the packet is resent out of the learned port.
/// Otherwise the packet is flooded.
pub struct LearningSwitch {
    conn: Arc<dyn SwitchConnection>,
    known_hosts: HashMap<MacAddress, u16>,
    idle_timeout: Timeout,
    hard_timeout: Timeout,
    priority: u16,
}

impl LearningSwitch {
    pub fn new(conn: Arc<dyn SwitchConnection>, cfg: &ControllerConfig) -> LearningSwitch {
        info!("[{:016x}] Switch active", conn.dpid());
        LearningSwitch {
            conn,
            known_hosts: HashMap::new(),
            idle_timeout: Timeout::of_int(cfg.idle_timeout),
            hard_timeout: Timeout::of_int(cfg.hard_timeout),
            priority: cfg.forward_priority,
        }
    }

    pub fn dpid(&self) -> u64 {
        self.conn.dpid()
    }

    /// Port `mac` was last seen on.
    pub fn port_of(&self, mac: &MacAddress) -> Option<u16> {
        self.known_hosts.get(mac).cloned()
    }

    /// Snapshot of the MAC-to-port table.
    pub fn mac_table(&self) -> Vec<(MacAddress, u16)> {
        let mut table: Vec<(MacAddress, u16)> =
            self.known_hosts.iter().map(|(mac, port)| (*mac, *port)).collect();
        table.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
        table
    }

    /// Decode and handle a packet-in. Frames that cannot be decoded are dropped without
    /// learning anything or sending any message.
    pub fn packet_in(&mut self, xid: u32, pkt: PacketIn) -> Result<Forwarding> {
        let pk = Packet::parse(pkt.input_payload.bytes()).map_err(|e| {
            warn!("[{:016x}] {}", self.dpid(), e);
            e
        })?;
        Ok(self.handle_packet(xid, &pk, pkt))
    }

    /// Handle a packet-in whose frame has already been decoded into `pk`.
    pub fn handle_packet(&mut self, xid: u32, pk: &Packet, pkt: PacketIn) -> Forwarding {
        if let Some(diag) = diagnose(pk) {
            info!("[{:016x}] {}", self.dpid(), diag);
        }
        self.learning_packet_in(pk, pkt.port);
        self.routing_packet_in(xid, pk, pkt)
    }

    /// Originate an IPv4 datagram from `src` to `dst` with no payload and send it out of
    /// every port. Link addresses are left zeroed; nothing is learned.
    pub fn send_ip_packet(&self, src: Ipv4Addr, dst: Ipv4Addr) {
        let ip = ipv4_datagram(src, dst, 0, &[]);
        let frame = ethernet_frame(MacAddress::nil(), MacAddress::nil(), EthTyp::EthTypIP as u16, &ip);
        debug!("[{:016x}] Sending IP packet {} -> {}", self.dpid(), src, dst);
        let pkt_out = PacketOut {
            output_payload: Payload::NotBuffered(frame),
            port_id: None,
            apply_actions: vec![Action::Output(PseudoPort::AllPorts)],
        };
        self.conn.send_message(0, Message::PacketOut(pkt_out));
    }

    fn learning_packet_in(&mut self, pk: &Packet, port: u16) {
        self.known_hosts.insert(pk.dl_src, port);
    }

    fn routing_packet_in(&mut self, xid: u32, pk: &Packet, pkt: PacketIn) -> Forwarding {
        let src_port = pkt.port;
        match self.known_hosts.get(&pk.dl_dst).cloned() {
            Some(p) => {
                debug!("[{:016x}] Installing {}.{} -> {}.{}",
                       self.dpid(),
                       pk.dl_src.to_hex_string(),
                       src_port,
                       pk.dl_dst.to_hex_string(),
                       p);
                let actions = vec![Action::Output(PseudoPort::PhysicalPort(p))];
                let mut flow = add_flow(self.priority, Pattern::of_packet(pk, src_port), actions);
                flow.idle_timeout = self.idle_timeout;
                flow.hard_timeout = self.hard_timeout;
                self.send_flow_mod(xid, flow);
                self.resend_packet(xid, pkt, PseudoPort::PhysicalPort(p));
                Forwarding::Forward(p)
            }
            None => {
                debug!("[{:016x}] Flooding to {}", self.dpid(), pk.dl_dst.to_hex_string());
                self.resend_packet(xid, pkt, PseudoPort::AllPorts);
                Forwarding::Flood
            }
        }
    }

    fn resend_packet(&self, xid: u32, pkt: PacketIn, out: PseudoPort) {
        let pkt_out = PacketOut {
            output_payload: pkt.input_payload,
            port_id: Some(pkt.port),
            apply_actions: vec![Action::Output(out)],
        };
        self.conn.send_message(xid, Message::PacketOut(pkt_out));
    }

    fn send_flow_mod(&self, xid: u32, flow: FlowMod) {
        self.conn.send_message(xid, Message::FlowMod(flow));
    }
}
