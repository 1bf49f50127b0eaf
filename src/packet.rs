//! Decoding of the Ethernet frames carried by packet-in messages.
//!
//! Only the headers the controller acts on are decoded: link-layer addresses and VLAN tag,
//! IPv4 with its TCP/UDP/ICMP transport header, and ARP. Any other ethertype is kept as raw
//! bytes so it can still be switched.

use std::io::{self, BufRead, Cursor, Read};
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use eui48::MacAddress;

use crate::error::{Error, Result};

/// Ethertypes understood by the decoder.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EthTyp {
    EthTypIP = 0x0800,
    EthTypARP = 0x0806,
    EthTypVLAN = 0x8100,
}

/// IPv4 protocol numbers with a decoded transport header.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IpProto {
    IpICMP = 0x01,
    IpTCP = 0x06,
    IpUDP = 0x11,
}

/// Human readable name of an IPv4 protocol number.
pub fn ip_proto_name(proto: u8) -> &'static str {
    match proto {
        1 => "ICMP",
        2 => "IGMP",
        4 => "IPv4",
        6 => "TCP",
        17 => "UDP",
        _ => "UNKNOWN",
    }
}

/// Human readable name of an ARP opcode.
pub fn arp_opcode_name(oper: u16) -> &'static str {
    match oper {
        1 => "REQUEST",
        2 => "REPLY",
        3 => "REV_REQUEST",
        4 => "REV_REPLY",
        _ => "UNKNOWN",
    }
}

fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

fn read_mac(bytes: &mut Cursor<&[u8]>) -> io::Result<MacAddress> {
    let mut arr = [0; 6];
    bytes.read_exact(&mut arr)?;
    Ok(MacAddress::new(arr))
}

fn read_ip(bytes: &mut Cursor<&[u8]>) -> io::Result<Ipv4Addr> {
    Ok(Ipv4Addr::from(bytes.read_u32::<BigEndian>()?))
}

fn rest(bytes: &mut Cursor<&[u8]>) -> Vec<u8> {
    let pos = (bytes.position() as usize).min(bytes.get_ref().len());
    bytes.get_ref()[pos..].to_vec()
}

/// TCP frame of a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tcp {
    pub src: u16,
    pub dst: u16,
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
}

impl Tcp {
    const SIZE: usize = 20;

    fn parse(bytes: &mut Cursor<&[u8]>) -> io::Result<Tcp> {
        if remaining(bytes) < Self::SIZE {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let src = bytes.read_u16::<BigEndian>()?;
        let dst = bytes.read_u16::<BigEndian>()?;
        let seq = bytes.read_u32::<BigEndian>()?;
        let ack = bytes.read_u32::<BigEndian>()?;
        bytes.consume(2);
        let window = bytes.read_u16::<BigEndian>()?;
        Ok(Tcp { src, dst, seq, ack, window })
    }
}

/// UDP frame of a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Udp {
    pub src: u16,
    pub dst: u16,
}

impl Udp {
    const SIZE: usize = 8;

    fn parse(bytes: &mut Cursor<&[u8]>) -> io::Result<Udp> {
        if remaining(bytes) < Self::SIZE {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let src = bytes.read_u16::<BigEndian>()?;
        let dst = bytes.read_u16::<BigEndian>()?;
        Ok(Udp { src, dst })
    }
}

/// ICMP frame of a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Icmp {
    pub typ: u8,
    pub code: u8,
}

impl Icmp {
    const SIZE: usize = 4;

    fn parse(bytes: &mut Cursor<&[u8]>) -> io::Result<Icmp> {
        if remaining(bytes) < Self::SIZE {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let typ = bytes.read_u8()?;
        let code = bytes.read_u8()?;
        Ok(Icmp { typ, code })
    }
}

/// Transport header encapsulated within an IPv4 payload. Protocols other than TCP, UDP, and
/// ICMP, or truncated headers, keep the protocol number and raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tp {
    Tcp(Tcp),
    Udp(Udp),
    Icmp(Icmp),
    Unparsable(u8, Vec<u8>),
}

/// IPv4 frame of a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ip {
    pub tos: u8,
    pub ident: u16,
    pub ttl: u8,
    pub proto: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub tp: Tp,
}

impl Ip {
    const MIN_SIZE: usize = 20;

    fn parse(bytes: &mut Cursor<&[u8]>) -> io::Result<Ip> {
        if remaining(bytes) < Self::MIN_SIZE {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let vhl = bytes.read_u8()?;
        if (vhl >> 4) != 4 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not an IPv4 header"));
        }
        let ihl = (vhl & 0x0f) as usize * 4;
        if ihl < Self::MIN_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad IPv4 header length"));
        }
        let tos = bytes.read_u8()?;
        bytes.consume(2);
        let ident = bytes.read_u16::<BigEndian>()?;
        bytes.consume(2);
        let ttl = bytes.read_u8()?;
        let proto = bytes.read_u8()?;
        bytes.consume(2);
        let src = read_ip(bytes)?;
        let dst = read_ip(bytes)?;
        let options_len = ihl - Self::MIN_SIZE;
        if remaining(bytes) < options_len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        bytes.consume(options_len);
        let start = bytes.position();
        let parsed = match proto {
            t if t == (IpProto::IpICMP as u8) => Icmp::parse(bytes).map(Tp::Icmp),
            t if t == (IpProto::IpTCP as u8) => Tcp::parse(bytes).map(Tp::Tcp),
            t if t == (IpProto::IpUDP as u8) => Udp::parse(bytes).map(Tp::Udp),
            _ => Err(io::ErrorKind::InvalidData.into()),
        };
        let tp = parsed.unwrap_or_else(|_| {
            bytes.set_position(start);
            Tp::Unparsable(proto, rest(bytes))
        });
        Ok(Ip { tos, ident, ttl, proto, src, dst, tp })
    }
}

/// Address resolution protocol (ARP) packet payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arp {
    pub oper: u16,
    pub sha: MacAddress,
    pub spa: Ipv4Addr,
    pub tha: MacAddress,
    pub tpa: Ipv4Addr,
}

impl Arp {
    const SIZE: usize = 28;

    fn parse(bytes: &mut Cursor<&[u8]>) -> io::Result<Arp> {
        if remaining(bytes) < Self::SIZE {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        bytes.consume(6);
        let oper = bytes.read_u16::<BigEndian>()?;
        let sha = read_mac(bytes)?;
        let spa = read_ip(bytes)?;
        let tha = read_mac(bytes)?;
        let tpa = read_ip(bytes)?;
        Ok(Arp { oper, sha, spa, tha, tpa })
    }
}

/// Represents a packet at the network protocol level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Nw {
    Ip(Ip),
    Arp(Arp),
    Unparsable(u16, Vec<u8>),
}

/// Represents a packet at the ethernet protocol level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub dl_src: MacAddress,
    pub dl_dst: MacAddress,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_dei: bool,
    pub dl_vlan_pcp: u8,
    pub nw: Nw,
}

impl Packet {
    const ETH_HEADER_SIZE: usize = 14;

    /// Decode an Ethernet frame. Truncated link-layer headers, or IPv4 and ARP bodies that
    /// cannot be decoded, are reported as `Error::UnparsedPacket`.
    pub fn parse(buf: &[u8]) -> Result<Packet> {
        if buf.len() < Self::ETH_HEADER_SIZE {
            return Err(Error::UnparsedPacket(format!("frame of {} bytes is too short", buf.len())));
        }
        let mut bytes = Cursor::new(buf);
        Self::parse_frame(&mut bytes).map_err(|e| Error::UnparsedPacket(e.to_string()))
    }

    fn parse_frame(bytes: &mut Cursor<&[u8]>) -> io::Result<Packet> {
        let dst = read_mac(bytes)?;
        let src = read_mac(bytes)?;
        let typ = bytes.read_u16::<BigEndian>()?;
        let (tag, dei, pcp, typ) = match typ {
            t if t == (EthTyp::EthTypVLAN as u16) => {
                let tag_and_pcp = bytes.read_u16::<BigEndian>()?;
                let tag = tag_and_pcp & 0xfff;
                let dei = (tag_and_pcp & 0x1000) > 0;
                let pcp = tag_and_pcp >> 13;
                let typ = bytes.read_u16::<BigEndian>()?;
                (Some(tag), dei, pcp as u8, typ)
            }
            _ => (None, false, 0x0, typ),
        };
        let nw = match typ {
            t if t == (EthTyp::EthTypIP as u16) => Nw::Ip(Ip::parse(bytes)?),
            t if t == (EthTyp::EthTypARP as u16) => Nw::Arp(Arp::parse(bytes)?),
            _ => Nw::Unparsable(typ, rest(bytes)),
        };
        Ok(Packet {
            dl_src: src,
            dl_dst: dst,
            dl_vlan: tag,
            dl_vlan_dei: dei,
            dl_vlan_pcp: pcp,
            nw,
        })
    }

    /// The ethertype of the encapsulated network layer, after any VLAN tag.
    pub fn dl_typ(&self) -> u16 {
        match self.nw {
            Nw::Ip(_) => EthTyp::EthTypIP as u16,
            Nw::Arp(_) => EthTyp::EthTypARP as u16,
            Nw::Unparsable(typ, _) => typ,
        }
    }
}

/// Build an untagged Ethernet frame around `payload`.
pub fn ethernet_frame(dst: MacAddress, src: MacAddress, typ: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(Packet::ETH_HEADER_SIZE + payload.len());
    buf.extend_from_slice(dst.as_bytes());
    buf.extend_from_slice(src.as_bytes());
    let mut typ_bytes = [0; 2];
    BigEndian::write_u16(&mut typ_bytes, typ);
    buf.extend_from_slice(&typ_bytes);
    buf.extend_from_slice(payload);
    buf
}

/// Build a minimal IPv4 datagram (no options, zero checksum) carrying `payload`.
pub fn ipv4_datagram(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, payload: &[u8]) -> Vec<u8> {
    let mut hdr = [0u8; Ip::MIN_SIZE];
    hdr[0] = 0x45;
    BigEndian::write_u16(&mut hdr[2..4], (Ip::MIN_SIZE + payload.len()) as u16);
    hdr[8] = 64;
    hdr[9] = proto;
    hdr[12..16].copy_from_slice(&src.octets());
    hdr[16..20].copy_from_slice(&dst.octets());
    let mut buf = hdr.to_vec();
    buf.extend_from_slice(payload);
    buf
}

/// Build an Ethernet/IPv4 ARP body.
pub fn arp_body(oper: u16, sha: MacAddress, spa: Ipv4Addr, tha: MacAddress, tpa: Ipv4Addr) -> Vec<u8> {
    let mut buf = [0u8; Arp::SIZE];
    BigEndian::write_u16(&mut buf[0..2], 1);
    BigEndian::write_u16(&mut buf[2..4], EthTyp::EthTypIP as u16);
    buf[4] = 6;
    buf[5] = 4;
    BigEndian::write_u16(&mut buf[6..8], oper);
    buf[8..14].copy_from_slice(sha.as_bytes());
    buf[14..18].copy_from_slice(&spa.octets());
    buf[18..24].copy_from_slice(tha.as_bytes());
    buf[24..28].copy_from_slice(&tpa.octets());
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn parses_icmp_over_ipv4() {
        let ip = ipv4_datagram(Ipv4Addr::new(10, 0, 0, 1),
                               Ipv4Addr::new(10, 0, 0, 5),
                               IpProto::IpICMP as u8,
                               &[8, 0, 0, 0, 1, 2]);
        let frame = ethernet_frame(mac(5), mac(1), EthTyp::EthTypIP as u16, &ip);
        let pk = Packet::parse(&frame).unwrap();
        assert_eq!(pk.dl_src, mac(1));
        assert_eq!(pk.dl_dst, mac(5));
        assert_eq!(pk.dl_typ(), 0x0800);
        match pk.nw {
            Nw::Ip(ref ip) => {
                assert_eq!(ip.dst, Ipv4Addr::new(10, 0, 0, 5));
                assert_eq!(ip.proto, 1);
                assert_eq!(ip.tp, Tp::Icmp(Icmp { typ: 8, code: 0 }));
            }
            _ => panic!("expected an IPv4 packet"),
        }
    }

    #[test]
    fn parses_tcp_ports() {
        let mut seg = vec![0u8; 20];
        BigEndian::write_u16(&mut seg[0..2], 40000);
        BigEndian::write_u16(&mut seg[2..4], 80);
        let ip = ipv4_datagram(Ipv4Addr::new(10, 0, 0, 1),
                               Ipv4Addr::new(10, 0, 0, 2),
                               IpProto::IpTCP as u8,
                               &seg);
        let frame = ethernet_frame(mac(2), mac(1), EthTyp::EthTypIP as u16, &ip);
        match Packet::parse(&frame).unwrap().nw {
            Nw::Ip(Ip { tp: Tp::Tcp(ref tcp), .. }) => {
                assert_eq!(tcp.src, 40000);
                assert_eq!(tcp.dst, 80);
            }
            _ => panic!("expected a TCP segment"),
        }
    }

    #[test]
    fn truncated_transport_is_kept_raw() {
        let ip = ipv4_datagram(Ipv4Addr::new(10, 0, 0, 1),
                               Ipv4Addr::new(10, 0, 0, 2),
                               IpProto::IpUDP as u8,
                               &[0, 53]);
        let frame = ethernet_frame(mac(2), mac(1), EthTyp::EthTypIP as u16, &ip);
        match Packet::parse(&frame).unwrap().nw {
            Nw::Ip(ref ip) => assert_eq!(ip.tp, Tp::Unparsable(17, vec![0, 53])),
            _ => panic!("expected an IPv4 packet"),
        }
    }

    #[test]
    fn parses_arp_request() {
        let body = arp_body(1, mac(1), Ipv4Addr::new(10, 0, 0, 1), mac(0), Ipv4Addr::new(10, 0, 0, 2));
        let frame = ethernet_frame(MacAddress::broadcast(), mac(1), EthTyp::EthTypARP as u16, &body);
        let pk = Packet::parse(&frame).unwrap();
        assert_eq!(pk.dl_typ(), 0x0806);
        match pk.nw {
            Nw::Arp(ref arp) => {
                assert_eq!(arp.oper, 1);
                assert_eq!(arp.sha, mac(1));
                assert_eq!(arp.tpa, Ipv4Addr::new(10, 0, 0, 2));
            }
            _ => panic!("expected an ARP packet"),
        }
    }

    #[test]
    fn parses_vlan_tag() {
        let mut frame = vec![0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 1, 0x81, 0x00, 0xa0, 0x0a, 0x88, 0xcc];
        frame.extend_from_slice(&[1, 2, 3]);
        let pk = Packet::parse(&frame).unwrap();
        assert_eq!(pk.dl_vlan, Some(10));
        assert_eq!(pk.dl_vlan_pcp, 5);
        assert_eq!(pk.nw, Nw::Unparsable(0x88cc, vec![1, 2, 3]));
    }

    #[test]
    fn rejects_short_frames() {
        match Packet::parse(&[0; 10]) {
            Err(Error::UnparsedPacket(_)) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn rejects_truncated_arp() {
        let frame = ethernet_frame(mac(2), mac(1), EthTyp::EthTypARP as u16, &[0, 1, 8, 0]);
        assert!(Packet::parse(&frame).is_err());
    }
}
