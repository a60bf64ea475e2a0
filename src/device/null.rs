// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

use std::io;

use crate::log;
use crate::ethernet::MacAddress;
use crate::net::{
  NetDevice,
  NetDeviceAddress,
  NetDeviceDriver,
  NetDeviceError,
  NetDeviceFlags,
  NetDeviceInfo,
  NetDeviceType,
  NetProtocolType,
  NetStack,
};

pub const NULL_DEVICE_NAME: &str = "null";
const NULL_MTU: u16 = u16::MAX;

/// Discards everything sent to it.
#[derive(Debug, Default)]
pub struct Null;

impl NetDeviceDriver for Null {
  fn transmit(&mut self, info: &NetDeviceInfo, protocol_type: u16, data: &[u8], _dst: Option<MacAddress>) -> io::Result<()> {
    log::debug!("discard DEV={} TYPE={} SIZE={}", info.name, NetProtocolType::from_u16(protocol_type), data.len());
    Ok(())
  }
}

impl Null {
  pub fn new_device() -> NetDevice {
    Self::new_device_named(NULL_DEVICE_NAME)
  }

  pub fn new_device_named(name: &str) -> NetDevice {
    let info = NetDeviceInfo {
      name: name.to_string(),
      device_type: NetDeviceType::Null,
      mtu: NULL_MTU,
      header_length: 0,
      hwaddr: MacAddress::ANY,
      link_address: NetDeviceAddress::None,
      ipv4: None,
    };
    NetDevice::new(info, NetDeviceFlags::empty(), Box::new(Null))
  }

  pub fn init(stack: &NetStack) -> Result<(), NetDeviceError> {
    stack.register_device(Self::new_device())
  }
}
