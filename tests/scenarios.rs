use std::net::Ipv4Addr;
use std::sync::Arc;

use eui48::MacAddress;

use rust_ofp_firewall::config::{BroadcastPolicy, ControllerConfig};
use rust_ofp_firewall::controller::Controller;
use rust_ofp_firewall::firewall::{FirewallRegistry, FirewallRule};
use rust_ofp_firewall::learning_switch::Forwarding;
use rust_ofp_firewall::ofp_controller::{LoggingConnection, OfpController};
use rust_ofp_firewall::openflow0x01::message::Message;
use rust_ofp_firewall::openflow0x01::{Action, FlowMod, FlowModCmd, PacketIn, PacketOut, PseudoPort,
                                      Timeout};
use rust_ofp_firewall::packet::{ethernet_frame, ipv4_datagram, EthTyp};

fn mac(last: u8) -> MacAddress {
    MacAddress::new([0, 0, 0, 0, 0, last])
}

fn icmp_frame(src: u8, dst: u8) -> Vec<u8> {
    let ip = ipv4_datagram(Ipv4Addr::new(10, 0, 0, src),
                           Ipv4Addr::new(10, 0, 0, dst),
                           1,
                           &[8, 0, 0, 0, 0, 1, 0, 1]);
    ethernet_frame(mac(dst), mac(src), EthTyp::EthTypIP as u16, &ip)
}

struct Network {
    ctl: Controller,
    conns: Vec<Arc<LoggingConnection>>,
}

impl Network {
    fn new(n: u64, cfg: ControllerConfig) -> Network {
        let mut ctl = Controller::new(cfg, FirewallRegistry::new());
        let mut conns = vec![];
        for dpid in 1..=n {
            let conn = Arc::new(LoggingConnection::new(dpid));
            ctl.switch_connected(conn.clone());
            conns.push(conn);
        }
        Network { ctl, conns }
    }

    fn packet_in(&mut self, sw: u64, port: u16, frame: Vec<u8>) -> Option<Forwarding> {
        self.ctl.handle_packet_in(sw, 0, PacketIn::no_match(port, frame)).unwrap()
    }
}

fn flow_mod(msg: &Message) -> &FlowMod {
    match *msg {
        Message::FlowMod(ref fm) => fm,
        ref m => panic!("expected a flow mod, got {:?}", m),
    }
}

fn packet_out(msg: &Message) -> &PacketOut {
    match *msg {
        Message::PacketOut(ref po) => po,
        ref m => panic!("expected a packet out, got {:?}", m),
    }
}

#[test]
fn first_frame_to_unknown_host_is_flooded_without_flow() {
    let mut net = Network::new(1, ControllerConfig::default());
    assert_eq!(net.packet_in(1, 3, icmp_frame(1, 2)), Some(Forwarding::Flood));
    let sent = net.conns[0].take();
    assert_eq!(sent.len(), 1);
    let po = packet_out(&sent[0]);
    assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::AllPorts)]);
    assert_eq!(po.port_id, Some(3));
}

#[test]
fn end_to_end_learning_installs_timed_flow() {
    let mut net = Network::new(1, ControllerConfig::default());
    net.packet_in(1, 1, icmp_frame(1, 9));
    assert_eq!(net.ctl.switch(1).unwrap().mac_table(), vec![(mac(1), 1)]);
    net.conns[0].take();

    assert_eq!(net.packet_in(1, 2, icmp_frame(2, 1)), Some(Forwarding::Forward(1)));
    let sent = net.conns[0].take();
    assert_eq!(sent.len(), 2);
    let fm = flow_mod(&sent[0]);
    assert_eq!(fm.command, FlowModCmd::AddFlow);
    assert_eq!(fm.pattern.dl_src, Some(mac(2)));
    assert_eq!(fm.pattern.dl_dst, Some(mac(1)));
    assert_eq!(fm.idle_timeout, Timeout::ExpiresAfter(10));
    assert_eq!(fm.hard_timeout, Timeout::ExpiresAfter(30));
    assert_eq!(fm.actions, vec![Action::Output(PseudoPort::PhysicalPort(1))]);
    assert_eq!(packet_out(&sent[1]).apply_actions,
               vec![Action::Output(PseudoPort::PhysicalPort(1))]);
}

#[test]
fn learning_converges_in_both_directions() {
    let mut net = Network::new(2, ControllerConfig::default());
    for sw in 1..3 {
        assert_eq!(net.packet_in(sw, 1, icmp_frame(1, 2)), Some(Forwarding::Flood));
        assert_eq!(net.packet_in(sw, 2, icmp_frame(2, 1)), Some(Forwarding::Forward(1)));
        assert_eq!(net.packet_in(sw, 1, icmp_frame(1, 2)), Some(Forwarding::Forward(2)));
        assert_eq!(net.packet_in(sw, 2, icmp_frame(2, 1)), Some(Forwarding::Forward(1)));
    }
}

#[test]
fn unparsed_packets_have_no_side_effects() {
    let mut net = Network::new(1, ControllerConfig::default());
    net.ctl.packet_in(1, 0, PacketIn::no_match(1, vec![0xff; 9]));
    assert!(net.conns[0].sent().is_empty());
    assert!(net.ctl.switch(1).unwrap().mac_table().is_empty());
}

#[test]
fn ipv4_block_rule_takes_precedence() {
    let mut net = Network::new(1, ControllerConfig::default());
    let fw = net.ctl.firewall(0).unwrap();
    fw.add_rule(net.ctl.registry(), "10.0.0.5", false, 0x0800, 1).unwrap();
    assert!(fw.has_rule(&FirewallRule::Ipv4 {
        address: Ipv4Addr::new(10, 0, 0, 5),
        protocol: 1,
    }));
    let sent = net.conns[0].take();
    let fm = flow_mod(&sent[0]);
    assert_eq!(fm.priority, 65535);
    assert_eq!(fm.pattern.dl_typ, Some(0x0800));
    assert_eq!(fm.pattern.nw_dst, Some(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(fm.pattern.nw_proto, Some(1));
    assert!(fm.actions.is_empty());

    net.packet_in(1, 5, icmp_frame(5, 1));
    net.conns[0].take();
    assert_eq!(net.packet_in(1, 1, icmp_frame(1, 5)), None);
    assert!(net.conns[0].sent().is_empty());
}

#[test]
fn broadcast_reaches_every_firewall() {
    let net = Network::new(3, ControllerConfig::default());
    let report = net.ctl
        .firewall(1)
        .unwrap()
        .add_rule(net.ctl.registry(), "10.0.0.5", true, 0x0800, 6)
        .unwrap();
    assert_eq!(report.applied, vec![1, 2, 3]);
    let rule = FirewallRule::Ipv4 {
        address: Ipv4Addr::new(10, 0, 0, 5),
        protocol: 6,
    };
    for (i, conn) in net.conns.iter().enumerate() {
        assert!(net.ctl.firewall(i).unwrap().has_rule(&rule));
        let sent = conn.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(flow_mod(&sent[0]).command, FlowModCmd::AddFlow);
    }
}

#[test]
fn broadcast_skips_duplicates_by_default() {
    let net = Network::new(3, ControllerConfig::default());
    let registry = net.ctl.registry();
    net.ctl.firewall(0).unwrap().add_rule(registry, "10.0.0.5", false, 0x0800, 6).unwrap();
    net.conns[0].take();
    let report = net.ctl.firewall(1).unwrap().add_rule(registry, "10.0.0.5", true, 0x0800, 6).unwrap();
    assert_eq!(report.applied, vec![2, 3]);
    assert_eq!(report.unchanged, vec![1]);
    assert!(net.conns[0].sent().is_empty());
    for i in 0..3 {
        assert_eq!(net.ctl.firewall(i).unwrap().list_rules().len(), 1);
    }
}

#[test]
fn broadcast_can_stop_at_first_duplicate() {
    let cfg = ControllerConfig::default().with_broadcast_policy(BroadcastPolicy::StopAtDuplicate);
    let net = Network::new(3, cfg);
    let registry = net.ctl.registry();
    net.ctl.firewall(0).unwrap().add_rule(registry, "10.0.0.5", false, 0x0800, 6).unwrap();
    net.conns.iter().for_each(|c| {
        c.take();
    });
    let report = net.ctl.firewall(1).unwrap().add_rule(registry, "10.0.0.5", true, 0x0800, 6).unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.unchanged, vec![1]);
    assert!(net.ctl.firewall(1).unwrap().list_rules().is_empty());
    assert!(net.ctl.firewall(2).unwrap().list_rules().is_empty());
    assert!(net.conns.iter().all(|c| c.sent().is_empty()));
}

#[test]
fn disconnected_switches_leave_the_registry() {
    let mut net = Network::new(3, ControllerConfig::default());
    net.ctl.switch_disconnected(2);
    let report = net.ctl
        .firewall(0)
        .unwrap()
        .add_rule(net.ctl.registry(), "00:00:00:00:00:07", true, 0x0806, 1)
        .unwrap();
    assert_eq!(report.applied, vec![1, 3]);
    assert!(net.conns[1].sent().is_empty());
}

#[test]
fn custom_timeouts_reach_installed_flows() {
    let mut net = Network::new(1, ControllerConfig::default().with_timeouts(5, 0));
    net.packet_in(1, 1, icmp_frame(1, 2));
    net.packet_in(1, 2, icmp_frame(2, 1));
    let sent = net.conns[0].take();
    let fm = flow_mod(&sent[1]);
    assert_eq!(fm.idle_timeout, Timeout::ExpiresAfter(5));
    assert_eq!(fm.hard_timeout, Timeout::Permanent);
}
