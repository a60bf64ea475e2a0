// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

//! Ethernet addresses and framing.

use std::fmt;
use std::str::FromStr;

pub const ADDRESS_LENGTH: usize = 6;

pub const ETHERNET_HEADER_SIZE: usize = 14;
pub const ETHERNET_PAYLOAD_MIN: usize = 46;
pub const ETHERNET_PAYLOAD_MAX: usize = 1500;

pub const ETHERNET_FRAME_MIN: usize = ETHERNET_HEADER_SIZE + ETHERNET_PAYLOAD_MIN;
pub const ETHERNET_FRAME_MAX: usize = ETHERNET_HEADER_SIZE + ETHERNET_PAYLOAD_MAX;

/// 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; ADDRESS_LENGTH]);

impl MacAddress {
  pub const ANY: MacAddress = MacAddress([0x00; ADDRESS_LENGTH]);
  pub const BROADCAST: MacAddress = MacAddress([0xff; ADDRESS_LENGTH]);

  pub fn octets(&self) -> [u8; ADDRESS_LENGTH] {
    self.0
  }

  pub fn is_broadcast(&self) -> bool {
    *self == Self::BROADCAST
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMacAddressError(String);

impl fmt::Display for ParseMacAddressError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "invalid MAC address: {}", self.0)
  }
}

impl std::error::Error for ParseMacAddressError {}

impl FromStr for MacAddress {
  type Err = ParseMacAddressError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut octets = [0u8; ADDRESS_LENGTH];
    let mut parts = s.trim().split(':');
    for octet in octets.iter_mut() {
      let part = parts.next().ok_or_else(|| ParseMacAddressError(s.to_string()))?;
      if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseMacAddressError(s.to_string()));
      }
      *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacAddressError(s.to_string()))?;
    }
    if parts.next().is_some() {
      return Err(ParseMacAddressError(s.to_string()));
    }
    Ok(MacAddress(octets))
  }
}

impl fmt::Display for MacAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let o = &self.0;
    write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", o[0], o[1], o[2], o[3], o[4], o[5])
  }
}

impl From<[u8; ADDRESS_LENGTH]> for MacAddress {
  fn from(octets: [u8; ADDRESS_LENGTH]) -> Self {
    MacAddress(octets)
  }
}

/// Ethernet II header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
  pub dst: MacAddress,
  pub src: MacAddress,
  pub ether_type: u16,
}

impl EthernetHeader {
  /// Split a frame into its header and payload.
  pub fn parse(frame: &[u8]) -> Option<(EthernetHeader, &[u8])> {
    if frame.len() < ETHERNET_HEADER_SIZE {
      return None;
    }
    let mut dst = [0u8; ADDRESS_LENGTH];
    let mut src = [0u8; ADDRESS_LENGTH];
    dst.copy_from_slice(&frame[0..6]);
    src.copy_from_slice(&frame[6..12]);
    let ether_type = u16::from_be_bytes([frame[12], frame[13]]);

    let header = EthernetHeader { dst: dst.into(), src: src.into(), ether_type };
    Some((header, &frame[ETHERNET_HEADER_SIZE..]))
  }

  pub fn write_to(&self, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&self.dst.0);
    buf.extend_from_slice(&self.src.0);
    buf.extend_from_slice(&self.ether_type.to_be_bytes());
  }
}

/// Build a complete frame, zero-padding the payload to the Ethernet minimum.
pub fn build_frame(header: &EthernetHeader, payload: &[u8]) -> Vec<u8> {
  let mut frame = Vec::with_capacity(ETHERNET_HEADER_SIZE + payload.len().max(ETHERNET_PAYLOAD_MIN));
  header.write_to(&mut frame);
  frame.extend_from_slice(payload);
  if frame.len() < ETHERNET_FRAME_MIN {
    frame.resize(ETHERNET_FRAME_MIN, 0);
  }
  frame
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mac_parse_and_display() {
    let mac: MacAddress = "00:00:5e:00:53:FF".parse().unwrap();
    assert_eq!(mac.0, [0x00, 0x00, 0x5e, 0x00, 0x53, 0xff]);
    assert_eq!(mac.to_string(), "00:00:5e:00:53:ff");
  }

  #[test]
  fn test_mac_parse_rejects_malformed() {
    assert!("00:00:5e:00:53".parse::<MacAddress>().is_err());
    assert!("00:00:5e:00:53:ff:01".parse::<MacAddress>().is_err());
    assert!("00:00:5e:00:53:zz".parse::<MacAddress>().is_err());
    assert!("0:00:5e:00:53:ff".parse::<MacAddress>().is_err());
    assert!("+0:+0:5e:00:53:01".parse::<MacAddress>().is_err());
    assert!("00:-0:5e:00:53:01".parse::<MacAddress>().is_err());
  }

  #[test]
  fn test_broadcast() {
    assert!(MacAddress::BROADCAST.is_broadcast());
    assert!(!MacAddress::ANY.is_broadcast());
  }

  #[test]
  fn test_parse_short_frame() {
    assert!(EthernetHeader::parse(&[0u8; 13]).is_none());
  }

  #[test]
  fn test_build_frame_pads_and_parses_back() {
    let header = EthernetHeader {
      dst: MacAddress::BROADCAST,
      src: "00:00:5e:00:53:01".parse().unwrap(),
      ether_type: 0x0800,
    };
    let frame = build_frame(&header, &[1, 2, 3]);
    assert_eq!(frame.len(), ETHERNET_FRAME_MIN);

    let (parsed, payload) = EthernetHeader::parse(&frame).unwrap();
    assert_eq!(parsed, header);
    assert_eq!(&payload[..3], &[1, 2, 3]);
    assert!(payload[3..].iter().all(|b| *b == 0));
  }
}
