//! Operator console.
//!
//! Firewalls are addressed by their registry index and switches by connection order, using
//! call syntax:
//!
//! ```text
//! fw
//! fw[0].addRule("10.0.0.5", true, 0x800, 1)
//! fw[0].delRule(00:00:00:00:00:02, false, 0x806)
//! fw[1].listRules()
//! fw[1].returnDPID()
//! fw[2].sendToAllExcept(10.0.0.7)
//! switch[0].macTable()
//! switch[0].returnDPID()
//! switch[1].sendIPPacket(10.0.0.1, 10.0.0.2)
//! packetIn(0, 1, 00:00:00:00:00:01, 00:00:00:00:00:02, 10.0.0.1, 10.0.0.2)
//! ```

use std::net::Ipv4Addr;
use std::str::FromStr;

use eui48::MacAddress;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{all_consuming, map, map_res, opt};
use nom::multi::separated_list0;
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;

use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::firewall::{RuleReport, DEFAULT_PROTOCOL};
use crate::learning_switch::Forwarding;
use crate::ofp_controller::dpid_to_str;
use crate::openflow0x01::PacketIn;
use crate::packet::{ethernet_frame, ipv4_datagram, EthTyp, IpProto};

/// Ethertype of the filler frames `packetIn` injects when no IP addresses are given
/// (IEEE local experimental).
const EXPERIMENTAL_ETHERTYPE: u16 = 0x88b5;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Target {
    Global,
    Firewall(usize),
    Switch(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Call {
    target: Target,
    method: String,
    args: Vec<String>,
}

fn index(i: &str) -> IResult<&str, usize> {
    delimited(char('['),
              map_res(digit1, |s: &str| s.parse::<usize>()),
              char(']'))(i)
}

fn quoted(i: &str) -> IResult<&str, &str> {
    alt((delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
         delimited(char('\''), take_while(|c: char| c != '\''), char('\''))))(i)
}

fn bare(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '.' || c == ':' || c == '-' || c == '_')(i)
}

fn arg(i: &str) -> IResult<&str, String> {
    map(delimited(multispace0, alt((quoted, bare)), multispace0), String::from)(i)
}

fn args(i: &str) -> IResult<&str, Vec<String>> {
    delimited(char('('),
              separated_list0(char(','), arg),
              preceded(multispace0, char(')')))(i)
}

fn ident(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphabetic())(i)
}

fn method_call(i: &str) -> IResult<&str, Call> {
    map(tuple((alt((tag("fw"), tag("switch"))), index, char('.'), ident, args)),
        |(obj, idx, _, method, args)| {
            Call {
                target: if obj == "fw" {
                    Target::Firewall(idx)
                } else {
                    Target::Switch(idx)
                },
                method: method.to_string(),
                args,
            }
        })(i)
}

fn global_call(i: &str) -> IResult<&str, Call> {
    map(tuple((ident, multispace0, opt(args))),
        |(method, _, args)| {
            Call {
                target: Target::Global,
                method: method.to_string(),
                args: args.unwrap_or_default(),
            }
        })(i)
}

fn parse_call(i: &str) -> IResult<&str, Call> {
    all_consuming(delimited(multispace0, alt((method_call, global_call)), multispace0))(i)
}

/// A parsed console command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    ListFirewalls,
    AddRule {
        fw: usize,
        address: String,
        to_all: bool,
        dl_type: u16,
        nw_proto: u8,
    },
    DelRule {
        fw: usize,
        address: String,
        to_all: bool,
        dl_type: u16,
        nw_proto: u8,
    },
    ListRules(usize),
    ReturnDpid(usize),
    SendToAllExcept {
        fw: usize,
        address: String,
        dl_type: u16,
        nw_proto: u8,
    },
    MacTable(usize),
    SwitchDpid(usize),
    SendIpPacket {
        switch: usize,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    },
    PacketIn {
        switch: usize,
        port: u16,
        src: MacAddress,
        dst: MacAddress,
        ips: Option<(Ipv4Addr, Ipv4Addr)>,
    },
}

fn parse_bool(s: &str) -> Result<bool> {
    match s {
        "true" | "True" | "1" => Ok(true),
        "false" | "False" | "0" => Ok(false),
        _ => Err(Error::Command(format!("expected a boolean, got {:?}", s))),
    }
}

/// Ethertypes are accepted in hex (`0x800`), decimal, or by name.
fn parse_dl_type(s: &str) -> Result<u16> {
    let parsed = match s.to_ascii_lowercase().as_str() {
        "ip" | "ipv4" => Ok(EthTyp::EthTypIP as u16),
        "arp" => Ok(EthTyp::EthTypARP as u16),
        hex if hex.starts_with("0x") => u16::from_str_radix(&hex[2..], 16),
        dec => dec.parse(),
    };
    parsed.map_err(|_| Error::Command(format!("expected an ethertype, got {:?}", s)))
}

fn parse_num<T: FromStr>(s: &str, what: &str) -> Result<T> {
    s.parse().map_err(|_| Error::Command(format!("expected {}, got {:?}", what, s)))
}

fn parse_mac(s: &str) -> Result<MacAddress> {
    MacAddress::parse_str(s).map_err(|_| Error::InvalidAddress(s.to_string()))
}

fn parse_ip(s: &str) -> Result<Ipv4Addr> {
    Ipv4Addr::from_str(s).map_err(|_| Error::InvalidAddress(s.to_string()))
}

fn arity(call: &Call, min: usize, max: usize) -> Result<()> {
    if call.args.len() < min || call.args.len() > max {
        return Err(Error::Command(format!("{} takes {} to {} arguments, got {}",
                                          call.method,
                                          min,
                                          max,
                                          call.args.len())));
    }
    Ok(())
}

/// `(address[, toAll[, ethertype[, proto]]])`, with IPv4/ICMP defaults.
fn rule_args(call: &Call) -> Result<(String, bool, u16, u8)> {
    arity(call, 1, 4)?;
    let a = &call.args;
    let to_all = a.get(1).map(|s| parse_bool(s)).unwrap_or(Ok(false))?;
    let dl_type = a.get(2).map(|s| parse_dl_type(s)).unwrap_or(Ok(EthTyp::EthTypIP as u16))?;
    let nw_proto = a.get(3).map(|s| parse_num(s, "a protocol number")).unwrap_or(Ok(DEFAULT_PROTOCOL))?;
    Ok((a[0].clone(), to_all, dl_type, nw_proto))
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Command> {
        let (_, call) = parse_call(line).map_err(|e| Error::Command(format!("cannot parse {:?}: {}", line, e)))?;
        match (call.target.clone(), call.method.as_str()) {
            (Target::Global, "help") => Ok(Command::Help),
            (Target::Global, "fw") => Ok(Command::ListFirewalls),
            (Target::Global, "packetIn") => {
                if call.args.len() != 4 && call.args.len() != 6 {
                    return Err(Error::Command("packetIn takes 4 or 6 arguments".to_string()));
                }
                let a = &call.args;
                let ips = if a.len() == 6 {
                    Some((parse_ip(&a[4])?, parse_ip(&a[5])?))
                } else {
                    None
                };
                Ok(Command::PacketIn {
                    switch: parse_num(&a[0], "a switch index")?,
                    port: parse_num(&a[1], "a port number")?,
                    src: parse_mac(&a[2])?,
                    dst: parse_mac(&a[3])?,
                    ips,
                })
            }
            (Target::Firewall(fw), "addRule") => {
                let (address, to_all, dl_type, nw_proto) = rule_args(&call)?;
                Ok(Command::AddRule { fw, address, to_all, dl_type, nw_proto })
            }
            (Target::Firewall(fw), "delRule") => {
                let (address, to_all, dl_type, nw_proto) = rule_args(&call)?;
                Ok(Command::DelRule { fw, address, to_all, dl_type, nw_proto })
            }
            (Target::Firewall(fw), "listRules") |
            (Target::Firewall(fw), "showRules") => {
                arity(&call, 0, 0)?;
                Ok(Command::ListRules(fw))
            }
            (Target::Firewall(fw), "returnDPID") => {
                arity(&call, 0, 0)?;
                Ok(Command::ReturnDpid(fw))
            }
            (Target::Firewall(fw), "sendToAllExcept") => {
                arity(&call, 1, 3)?;
                let a = &call.args;
                let dl_type = a.get(1).map(|s| parse_dl_type(s)).unwrap_or(Ok(EthTyp::EthTypIP as u16))?;
                let nw_proto = a.get(2).map(|s| parse_num(s, "a protocol number")).unwrap_or(Ok(DEFAULT_PROTOCOL))?;
                Ok(Command::SendToAllExcept { fw, address: a[0].clone(), dl_type, nw_proto })
            }
            (Target::Switch(sw), "macTable") => {
                arity(&call, 0, 0)?;
                Ok(Command::MacTable(sw))
            }
            (Target::Switch(sw), "returnDPID") => {
                arity(&call, 0, 0)?;
                Ok(Command::SwitchDpid(sw))
            }
            (Target::Switch(switch), "sendIPPacket") => {
                arity(&call, 2, 2)?;
                Ok(Command::SendIpPacket {
                    switch,
                    src: parse_ip(&call.args[0])?,
                    dst: parse_ip(&call.args[1])?,
                })
            }
            (_, method) => Err(Error::Command(format!("unknown command {:?}", method))),
        }
    }
}

const HELP: &str = "\
fw                                              list firewalls
fw[i].addRule(addr[, toAll[, ethertype[, proto]]])
fw[i].delRule(addr[, toAll[, ethertype[, proto]]])
fw[i].listRules()                               also showRules()
fw[i].returnDPID()
fw[i].sendToAllExcept(addr[, ethertype[, proto]])
switch[i].macTable()
switch[i].returnDPID()
switch[i].sendIPPacket(src_ip, dst_ip)
packetIn(i, port, src_mac, dst_mac[, src_ip, dst_ip])";

fn report(verb: &str, r: &RuleReport) -> String {
    let names = |dpids: &[u64]| dpids.iter().map(|&d| dpid_to_str(d)).collect::<Vec<_>>().join(" ");
    format!("{} on [{}], unchanged on [{}]", verb, names(&r.applied), names(&r.unchanged))
}

/// Run one command against `ctl`, returning the text to show the operator.
pub fn execute(ctl: &mut Controller, cmd: Command) -> Result<String> {
    match cmd {
        Command::Help => Ok(HELP.to_string()),
        Command::ListFirewalls => {
            let lines: Vec<String> = ctl.registry()
                .firewalls()
                .iter()
                .enumerate()
                .map(|(i, fw)| format!("fw[{}] {} ({} rules)", i, dpid_to_str(fw.dpid()), fw.list_rules().len()))
                .collect();
            Ok(lines.join("\n"))
        }
        Command::AddRule { fw, address, to_all, dl_type, nw_proto } => {
            let r = ctl.firewall(fw)?.add_rule(ctl.registry(), &address, to_all, dl_type, nw_proto)?;
            Ok(report("added", &r))
        }
        Command::DelRule { fw, address, to_all, dl_type, nw_proto } => {
            let r = ctl.firewall(fw)?.del_rule(ctl.registry(), &address, to_all, dl_type, nw_proto)?;
            Ok(report("removed", &r))
        }
        Command::ListRules(fw) => {
            let mut out = String::from("Active Blocking Rules:");
            for rule in ctl.firewall(fw)?.list_rules() {
                out.push_str(&format!("\nRule: {}", rule));
            }
            Ok(out)
        }
        Command::ReturnDpid(fw) => Ok(format!("DPID: {}", dpid_to_str(ctl.firewall(fw)?.dpid()))),
        Command::SendToAllExcept { fw, address, dl_type, nw_proto } => {
            let notified = ctl.firewall(fw)?.broadcast_except(ctl.registry(), &address, dl_type, nw_proto)?;
            Ok(report("sent", &RuleReport { applied: notified, unchanged: vec![] }))
        }
        Command::MacTable(sw) => {
            let dpid = switch_dpid(ctl, sw)?;
            let lines: Vec<String> = ctl.switch(dpid)?
                .mac_table()
                .iter()
                .map(|&(mac, port)| format!("{} -> port {}", mac.to_hex_string(), port))
                .collect();
            Ok(lines.join("\n"))
        }
        Command::SwitchDpid(sw) => {
            let dpid = switch_dpid(ctl, sw)?;
            Ok(format!("DPID: {}", dpid_to_str(dpid)))
        }
        Command::SendIpPacket { switch, src, dst } => {
            let dpid = switch_dpid(ctl, switch)?;
            ctl.switch(dpid)?.send_ip_packet(src, dst);
            Ok(format!("sent {} -> {} to all ports of {}", src, dst, dpid_to_str(dpid)))
        }
        Command::PacketIn { switch, port, src, dst, ips } => {
            let dpid = switch_dpid(ctl, switch)?;
            let frame = match ips {
                Some((src_ip, dst_ip)) => {
                    let icmp_echo: [u8; 8] = [8, 0, 0, 0, 0, 0, 0, 0];
                    let ip = ipv4_datagram(src_ip, dst_ip, IpProto::IpICMP as u8, &icmp_echo);
                    ethernet_frame(dst, src, EthTyp::EthTypIP as u16, &ip)
                }
                None => ethernet_frame(dst, src, EXPERIMENTAL_ETHERTYPE, &[0; 46]),
            };
            Ok(match ctl.handle_packet_in(dpid, 0, PacketIn::no_match(port, frame))? {
                None => "blocked".to_string(),
                Some(Forwarding::Flood) => "flooded".to_string(),
                Some(Forwarding::Forward(p)) => format!("forwarded to port {}", p),
            })
        }
    }
}

fn switch_dpid(ctl: &Controller, index: usize) -> Result<u64> {
    ctl.dpids().get(index).cloned().ok_or_else(|| Error::Command(format!("no switch at index {}", index)))
}

/// Parse and run one console line.
pub fn run_line(ctl: &mut Controller, line: &str) -> Result<String> {
    let cmd = line.parse::<Command>()?;
    execute(ctl, cmd)
}
