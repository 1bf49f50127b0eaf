//! OpenFlow 1.0 commands and events exchanged with switches.
//!
//! These are the typed forms the controller logic produces and consumes. Encoding them onto
//! the wire is the job of the runtime that owns the switch connections.

use std::net::Ipv4Addr;

use eui48::MacAddress;

use crate::packet::{Nw, Packet, Tp};

/// Highest flow priority; used by firewall block rules so they pre-empt forwarding rules.
pub const OFP_MAX_PRIORITY: u16 = 0xffff;
/// Priority assigned to flows that do not ask for one.
pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

/// Fields to match against flows. `None` fields are wildcarded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub dl_src: Option<MacAddress>,
    pub dl_dst: Option<MacAddress>,
    pub dl_typ: Option<u16>,
    pub dl_vlan: Option<Option<u16>>,
    pub dl_vlan_pcp: Option<u8>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub nw_proto: Option<u8>,
    pub nw_tos: Option<u8>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
    pub in_port: Option<u16>,
}

impl Pattern {
    /// A pattern with every field wildcarded.
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// The exact-match pattern for `pk` arriving on `in_port`.
    ///
    /// ARP frames match on sender/target protocol addresses and carry their opcode in
    /// `nw_proto`, as OpenFlow 1.0 specifies.
    pub fn of_packet(pk: &Packet, in_port: u16) -> Pattern {
        let mut pat = Pattern {
            dl_src: Some(pk.dl_src),
            dl_dst: Some(pk.dl_dst),
            dl_typ: Some(pk.dl_typ()),
            dl_vlan: Some(pk.dl_vlan),
            dl_vlan_pcp: Some(pk.dl_vlan_pcp),
            in_port: Some(in_port),
            ..Pattern::match_all()
        };
        match pk.nw {
            Nw::Ip(ref ip) => {
                pat.nw_src = Some(ip.src);
                pat.nw_dst = Some(ip.dst);
                pat.nw_proto = Some(ip.proto);
                pat.nw_tos = Some(ip.tos);
                match ip.tp {
                    Tp::Tcp(ref tcp) => {
                        pat.tp_src = Some(tcp.src);
                        pat.tp_dst = Some(tcp.dst);
                    }
                    Tp::Udp(ref udp) => {
                        pat.tp_src = Some(udp.src);
                        pat.tp_dst = Some(udp.dst);
                    }
                    Tp::Icmp(ref icmp) => {
                        pat.tp_src = Some(icmp.typ as u16);
                        pat.tp_dst = Some(icmp.code as u16);
                    }
                    Tp::Unparsable(..) => (),
                }
            }
            Nw::Arp(ref arp) => {
                pat.nw_src = Some(arp.spa);
                pat.nw_dst = Some(arp.tpa);
                pat.nw_proto = Some((arp.oper & 0xff) as u8);
            }
            Nw::Unparsable(..) => (),
        }
        pat
    }
}

/// Where an output action sends a packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u16),
    /// Every port except the ingress port.
    AllPorts,
}

/// Actions associated with flows and packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
}

/// How long before a flow entry expires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    /// Zero seconds means the flow never expires.
    pub fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    pub fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Type of modification to perform on a flow table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    DeleteFlow,
}

/// Represents modifications to a flow table from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
}

/// The data associated with a packet received by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    /// The frame bytes, buffered at the switch or not.
    pub fn bytes(&self) -> &[u8] {
        match *self {
            Payload::Buffered(_, ref buf) |
            Payload::NotBuffered(ref buf) => buf,
        }
    }
}

/// Represents packets received by the datapath and sent to the controller after a
/// flow-table miss.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    /// Length of the frame on the wire, saturating at `u16::MAX`.
    pub total_len: u16,
    pub port: u16,
}

impl PacketIn {
    /// A table-miss packet-in for an unbuffered frame.
    pub fn no_match(port: u16, frame: Vec<u8>) -> PacketIn {
        PacketIn {
            total_len: u16::try_from(frame.len()).unwrap_or(u16::MAX),
            input_payload: Payload::NotBuffered(frame),
            port,
        }
    }
}

/// Send a packet out of the datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

/// Encapsulates the messages the controller sends to switches.
pub mod message {
    use super::*;

    /// Controller-to-switch commands.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Message {
        FlowMod(FlowMod),
        PacketOut(PacketOut),
    }

    fn flow(command: FlowModCmd, prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            command,
            pattern,
            priority: prio,
            actions,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// and `actions`.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        flow(FlowModCmd::AddFlow, prio, pattern, actions)
    }

    /// Return a `FlowMod` deleting every flow matching `pattern`.
    pub fn delete_flow(prio: u16, pattern: Pattern) -> FlowMod {
        flow(FlowModCmd::DeleteFlow, prio, pattern, vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{arp_body, ethernet_frame, ipv4_datagram, EthTyp};

    #[test]
    fn timeouts_round_trip_zero_as_permanent() {
        assert_eq!(Timeout::of_int(0), Timeout::Permanent);
        assert_eq!(Timeout::to_int(Timeout::of_int(30)), 30);
    }

    #[test]
    fn pattern_of_ipv4_packet_covers_flow_fields() {
        let src = MacAddress::new([0, 0, 0, 0, 0, 1]);
        let dst = MacAddress::new([0, 0, 0, 0, 0, 2]);
        let ip = ipv4_datagram(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 1, &[0, 0, 0, 0]);
        let pk = Packet::parse(&ethernet_frame(dst, src, EthTyp::EthTypIP as u16, &ip)).unwrap();
        let pat = Pattern::of_packet(&pk, 3);
        assert_eq!(pat.in_port, Some(3));
        assert_eq!(pat.dl_src, Some(src));
        assert_eq!(pat.dl_dst, Some(dst));
        assert_eq!(pat.dl_typ, Some(0x0800));
        assert_eq!(pat.dl_vlan, Some(None));
        assert_eq!(pat.nw_dst, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(pat.nw_proto, Some(1));
        assert_eq!(pat.tp_src, Some(0));
    }

    #[test]
    fn pattern_of_arp_packet_uses_opcode_as_proto() {
        let src = MacAddress::new([0, 0, 0, 0, 0, 1]);
        let body = arp_body(2, src, Ipv4Addr::new(10, 0, 0, 1), MacAddress::nil(), Ipv4Addr::new(10, 0, 0, 2));
        let pk = Packet::parse(&ethernet_frame(MacAddress::broadcast(), src, EthTyp::EthTypARP as u16, &body))
            .unwrap();
        let pat = Pattern::of_packet(&pk, 1);
        assert_eq!(pat.nw_proto, Some(2));
        assert_eq!(pat.nw_src, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(pat.tp_dst, None);
    }

    #[test]
    fn oversized_frames_saturate_total_len() {
        assert_eq!(PacketIn::no_match(1, vec![0; 60]).total_len, 60);
        assert_eq!(PacketIn::no_match(1, vec![0; 70000]).total_len, u16::MAX);
    }

    #[test]
    fn delete_flow_has_no_actions() {
        let fm = message::delete_flow(OFP_MAX_PRIORITY, Pattern::match_all());
        assert_eq!(fm.command, FlowModCmd::DeleteFlow);
        assert!(fm.actions.is_empty());
    }
}
