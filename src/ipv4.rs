// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

//! IPv4 interfaces and header handling.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::thiserror;

use thiserror::Error;

use crate::log;
use crate::net::{NetDeviceInfo, NetProtocolError, NetProtocolType, NetStack};
use crate::utils::checksum16;

pub const IPV4_VERSION: u8 = 4;
pub const IPV4_HEADER_MIN_SIZE: usize = 20;
pub const IPV4_HEADER_MAX_SIZE: usize = 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Ipv4Error {
  #[error("invalid CIDR address: {0}")]
  InvalidCidr(String),

  #[error("packet too short: {0} bytes")]
  TooShort(usize),

  #[error("not an IPv4 packet: version {0}")]
  BadVersion(u8),

  #[error("bad header length: {0} bytes")]
  BadHeaderLength(usize),

  #[error("bad total length: {0} bytes")]
  BadTotalLength(usize),

  #[error("checksum mismatch: {0:#06x}")]
  BadChecksum(u16),
}

/// Address assignment of a device: unicast address plus its subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Interface {
  pub unicast: Ipv4Addr,
  pub netmask: Ipv4Addr,
  pub broadcast: Ipv4Addr,
}

impl Ipv4Interface {
  pub fn new(unicast: Ipv4Addr, prefix_len: u8) -> Result<Self, Ipv4Error> {
    if prefix_len > 32 {
      return Err(Ipv4Error::InvalidCidr(format!("{}/{}", unicast, prefix_len)));
    }
    let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
    let broadcast = u32::from(unicast) | !mask;
    Ok(Ipv4Interface {
      unicast,
      netmask: Ipv4Addr::from(mask),
      broadcast: Ipv4Addr::from(broadcast),
    })
  }

  pub fn prefix_len(&self) -> u8 {
    u32::from(self.netmask).leading_ones() as u8
  }

  /// True if a packet to `dst` is meant for this interface.
  pub fn accepts(&self, dst: Ipv4Addr) -> bool {
    dst == self.unicast || dst == self.broadcast || dst == Ipv4Addr::BROADCAST
  }
}

impl FromStr for Ipv4Interface {
  type Err = Ipv4Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || Ipv4Error::InvalidCidr(s.to_string());
    let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    Ipv4Interface::new(addr, prefix).map_err(|_| invalid())
  }
}

impl fmt::Display for Ipv4Interface {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.unicast, self.prefix_len())
  }
}

/// Fixed part of an IPv4 header. Options are kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
  pub dscp_ecn: u8,
  pub total_length: u16,
  pub id: u16,
  pub flags_fragment_offset: u16,
  pub ttl: u8,
  pub protocol: u8,
  pub checksum: u16,
  pub src: Ipv4Addr,
  pub dst: Ipv4Addr,
  pub options: Vec<u8>,
}

impl Ipv4Header {
  /// Header length on the wire, with options padded to a 32-bit boundary.
  pub fn header_length(&self) -> usize {
    IPV4_HEADER_MIN_SIZE + (self.options.len() + 3) / 4 * 4
  }

  /// Validate `packet` and split it into header and payload.
  pub fn parse(packet: &[u8]) -> Result<(Ipv4Header, &[u8]), Ipv4Error> {
    if packet.len() < IPV4_HEADER_MIN_SIZE {
      return Err(Ipv4Error::TooShort(packet.len()));
    }
    let version = packet[0] >> 4;
    if version != IPV4_VERSION {
      return Err(Ipv4Error::BadVersion(version));
    }
    let header_length = ((packet[0] & 0x0f) as usize) * 4;
    if header_length < IPV4_HEADER_MIN_SIZE || header_length > packet.len() {
      return Err(Ipv4Error::BadHeaderLength(header_length));
    }
    let total_length = u16::from_be_bytes([packet[2], packet[3]]) as usize;
    if total_length < header_length || total_length > packet.len() {
      return Err(Ipv4Error::BadTotalLength(total_length));
    }
    let sum = checksum16(&packet[..header_length], 0);
    if sum != 0 {
      return Err(Ipv4Error::BadChecksum(sum));
    }

    let header = Ipv4Header {
      dscp_ecn: packet[1],
      total_length: total_length as u16,
      id: u16::from_be_bytes([packet[4], packet[5]]),
      flags_fragment_offset: u16::from_be_bytes([packet[6], packet[7]]),
      ttl: packet[8],
      protocol: packet[9],
      checksum: u16::from_be_bytes([packet[10], packet[11]]),
      src: Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]),
      dst: Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]),
      options: packet[IPV4_HEADER_MIN_SIZE..header_length].to_vec(),
    };
    Ok((header, &packet[header_length..total_length]))
  }

  /// Serialize the header, filling in the checksum.
  ///
  /// Options are zero-padded (end of option list) to a multiple of 4 bytes.
  pub fn to_bytes(&self) -> Result<Vec<u8>, Ipv4Error> {
    let header_length = self.header_length();
    if header_length > IPV4_HEADER_MAX_SIZE {
      return Err(Ipv4Error::BadHeaderLength(header_length));
    }
    let mut buf = Vec::with_capacity(header_length);
    buf.push((IPV4_VERSION << 4) | (header_length / 4) as u8);
    buf.push(self.dscp_ecn);
    buf.extend_from_slice(&self.total_length.to_be_bytes());
    buf.extend_from_slice(&self.id.to_be_bytes());
    buf.extend_from_slice(&self.flags_fragment_offset.to_be_bytes());
    buf.push(self.ttl);
    buf.push(self.protocol);
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&self.src.octets());
    buf.extend_from_slice(&self.dst.octets());
    buf.extend_from_slice(&self.options);
    buf.resize(header_length, 0);

    let sum = checksum16(&buf, 0);
    buf[10..12].copy_from_slice(&sum.to_be_bytes());
    Ok(buf)
  }
}

/// IPv4 input handler. Returns the accepted header, or `None` when the packet is dropped.
pub fn input(data: &[u8], dev: &NetDeviceInfo) -> Option<Ipv4Header> {
  let iface = match dev.ipv4 {
    Some(iface) => iface,
    None => {
      log::debug!("no IPv4 interface DEV={}", dev.name);
      return None;
    }
  };

  let (header, payload) = match Ipv4Header::parse(data) {
    Ok(parsed) => parsed,
    Err(e) => {
      log::debug!("dropped IPv4 packet DEV={}: {}", dev.name, e);
      return None;
    }
  };

  if !iface.accepts(header.dst) {
    log::trace!("not for us DEV={} DST={}", dev.name, header.dst);
    return None;
  }

  log::info!(
    "IPv4 input DEV={} SRC={} DST={} PROTO={} TTL={} LEN={}",
    dev.name,
    header.src,
    header.dst,
    header.protocol,
    header.ttl,
    payload.len()
  );
  Some(header)
}

/// Register the IPv4 input handler with `stack`.
pub fn register(stack: &NetStack) -> Result<(), NetProtocolError> {
  stack.register_protocol(NetProtocolType::Ip as u16, |data, dev| {
    let _ = input(data, dev);
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ethernet::MacAddress;
  use crate::net::{NetDeviceAddress, NetDeviceType};

  fn header(dst: Ipv4Addr, payload_len: usize) -> Ipv4Header {
    Ipv4Header {
      dscp_ecn: 0,
      total_length: (IPV4_HEADER_MIN_SIZE + payload_len) as u16,
      id: 1,
      flags_fragment_offset: 0,
      ttl: 64,
      protocol: 1,
      checksum: 0,
      src: Ipv4Addr::new(192, 0, 2, 1),
      dst,
      options: Vec::new(),
    }
  }

  fn packet(dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
    let mut buf = header(dst, payload.len()).to_bytes().unwrap();
    buf.extend_from_slice(payload);
    buf
  }

  fn dev(ipv4: Option<&str>) -> NetDeviceInfo {
    NetDeviceInfo {
      name: "tap0".to_string(),
      device_type: NetDeviceType::Ethernet,
      mtu: 1500,
      header_length: 14,
      hwaddr: MacAddress::ANY,
      link_address: NetDeviceAddress::Broadcast(MacAddress::BROADCAST),
      ipv4: ipv4.map(|s| s.parse().unwrap()),
    }
  }

  #[test]
  fn test_interface_from_cidr() {
    let iface: Ipv4Interface = "192.0.2.2/24".parse().unwrap();
    assert_eq!(iface.unicast, Ipv4Addr::new(192, 0, 2, 2));
    assert_eq!(iface.netmask, Ipv4Addr::new(255, 255, 255, 0));
    assert_eq!(iface.broadcast, Ipv4Addr::new(192, 0, 2, 255));
    assert_eq!(iface.prefix_len(), 24);
    assert_eq!(iface.to_string(), "192.0.2.2/24");
  }

  #[test]
  fn test_interface_prefix_edges() {
    let host: Ipv4Interface = "10.0.0.1/32".parse().unwrap();
    assert_eq!(host.broadcast, Ipv4Addr::new(10, 0, 0, 1));
    let all: Ipv4Interface = "10.0.0.1/0".parse().unwrap();
    assert_eq!(all.netmask, Ipv4Addr::UNSPECIFIED);
    assert_eq!(all.broadcast, Ipv4Addr::BROADCAST);
  }

  #[test]
  fn test_interface_rejects_bad_cidr() {
    assert!("192.0.2.2".parse::<Ipv4Interface>().is_err());
    assert!("192.0.2.2/33".parse::<Ipv4Interface>().is_err());
    assert!("192.0.2/24".parse::<Ipv4Interface>().is_err());
    assert!("192.0.2.2/x".parse::<Ipv4Interface>().is_err());
  }

  #[test]
  fn test_parse_valid_packet() {
    let buf = packet(Ipv4Addr::new(192, 0, 2, 2), &[0xaa; 8]);
    let (parsed, payload) = Ipv4Header::parse(&buf).unwrap();
    assert_eq!(parsed.ttl, 64);
    assert_eq!(parsed.dst, Ipv4Addr::new(192, 0, 2, 2));
    assert_eq!(payload, &[0xaa; 8]);
  }

  #[test]
  fn test_parse_ignores_trailing_padding() {
    let mut buf = packet(Ipv4Addr::new(192, 0, 2, 2), &[1, 2]);
    buf.resize(46, 0);
    let (_, payload) = Ipv4Header::parse(&buf).unwrap();
    assert_eq!(payload, &[1, 2]);
  }

  #[test]
  fn test_parse_rejects_bad_packets() {
    let good = packet(Ipv4Addr::new(192, 0, 2, 2), &[0; 4]);

    assert_eq!(Ipv4Header::parse(&good[..19]), Err(Ipv4Error::TooShort(19)));

    let mut bad = good.clone();
    bad[0] = 0x65;
    assert_eq!(Ipv4Header::parse(&bad), Err(Ipv4Error::BadVersion(6)));

    let mut bad = good.clone();
    bad[0] = 0x44;
    assert_eq!(Ipv4Header::parse(&bad), Err(Ipv4Error::BadHeaderLength(16)));

    let mut bad = good.clone();
    bad[3] = 0xff;
    assert_eq!(Ipv4Header::parse(&bad), Err(Ipv4Error::BadTotalLength(0xff)));

    let mut bad = good.clone();
    bad[8] = 1;
    assert!(matches!(Ipv4Header::parse(&bad), Err(Ipv4Error::BadChecksum(_))));
  }

  fn with_options(options: Vec<u8>, payload_len: usize) -> Ipv4Header {
    let mut hdr = header(Ipv4Addr::new(192, 0, 2, 2), payload_len);
    hdr.options = options;
    hdr.total_length = (hdr.header_length() + payload_len) as u16;
    hdr
  }

  #[test]
  fn test_options_aligned_round_trip() {
    let hdr = with_options(vec![0x01, 0x01, 0x01, 0x00, 0x94, 0x04, 0x00, 0x00], 3);
    let mut buf = hdr.to_bytes().unwrap();
    assert_eq!(buf.len(), 28);
    assert_eq!(buf[0], 0x47);
    buf.extend_from_slice(&[7, 8, 9]);

    let (parsed, payload) = Ipv4Header::parse(&buf).unwrap();
    assert_eq!(parsed.options, hdr.options);
    assert_eq!(parsed.header_length(), 28);
    assert_eq!(payload, &[7, 8, 9]);
  }

  #[test]
  fn test_options_unaligned_are_padded() {
    let hdr = with_options(vec![1; 3], 0);
    assert_eq!(hdr.header_length(), 24);
    let buf = hdr.to_bytes().unwrap();
    assert_eq!(buf.len(), 24);
    assert_eq!(buf[0], 0x46);

    let (parsed, payload) = Ipv4Header::parse(&buf).unwrap();
    assert_eq!(parsed.options, vec![1, 1, 1, 0]);
    assert!(payload.is_empty());
  }

  #[test]
  fn test_options_max_length() {
    let hdr = with_options(vec![1; 40], 0);
    let buf = hdr.to_bytes().unwrap();
    assert_eq!(buf[0], 0x4f);
    assert!(Ipv4Header::parse(&buf).is_ok());

    let hdr = with_options(vec![1; 41], 0);
    assert_eq!(hdr.to_bytes(), Err(Ipv4Error::BadHeaderLength(64)));
    let hdr = with_options(vec![1; 44], 0);
    assert_eq!(hdr.to_bytes(), Err(Ipv4Error::BadHeaderLength(64)));
  }

  #[test]
  fn test_input_filters_destination() {
    let dev = dev(Some("192.0.2.2/24"));
    assert!(input(&packet(Ipv4Addr::new(192, 0, 2, 2), &[]), &dev).is_some());
    assert!(input(&packet(Ipv4Addr::new(192, 0, 2, 255), &[]), &dev).is_some());
    assert!(input(&packet(Ipv4Addr::BROADCAST, &[]), &dev).is_some());
    assert!(input(&packet(Ipv4Addr::new(192, 0, 2, 3), &[]), &dev).is_none());
  }

  #[test]
  fn test_input_without_interface() {
    let dev = dev(None);
    assert!(input(&packet(Ipv4Addr::new(192, 0, 2, 2), &[]), &dev).is_none());
  }

  #[test]
  fn test_input_drops_malformed() {
    let dev = dev(Some("192.0.2.2/24"));
    let mut bad = packet(Ipv4Addr::new(192, 0, 2, 2), &[0; 4]);
    bad[8] ^= 0xff;
    assert!(input(&bad, &dev).is_none());
    assert!(input(&bad[..10], &dev).is_none());
  }

  #[test]
  fn test_register_twice() {
    let stack = NetStack::new();
    register(&stack).unwrap();
    assert!(register(&stack).is_err());
  }
}
