// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

use std::io;

use crate::crossbeam_channel;
use crate::log;

use crossbeam_channel::{Receiver, Sender, TrySendError};

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
  ReceivedFrame,
};

pub const LOOPBACK_DEVICE_NAME: &str = "loopback";
pub const LOOPBACK_QUEUE_LIMIT: usize = 16;
const LOOPBACK_MTU: u16 = u16::MAX;

/// Hands every transmitted frame back to the stack on the next poll.
#[derive(Debug)]
pub struct Loopback {
  sender: Sender<ReceivedFrame>,
  receiver: Receiver<ReceivedFrame>,
}

impl Default for Loopback {
  fn default() -> Self {
    let (sender, receiver) = crossbeam_channel::bounded(LOOPBACK_QUEUE_LIMIT);
    Loopback { sender, receiver }
  }
}

impl NetDeviceDriver for Loopback {
  fn close(&mut self, _info: &NetDeviceInfo) -> io::Result<()> {
    while self.receiver.try_recv().is_ok() {}
    Ok(())
  }

  fn transmit(&mut self, info: &NetDeviceInfo, protocol_type: u16, data: &[u8], _dst: Option<MacAddress>) -> io::Result<()> {
    let frame = ReceivedFrame { protocol_type, data: data.to_vec() };
    match self.sender.try_send(frame) {
      Ok(()) => {
        log::debug!(
          "queue pushed DEV={} TYPE={} SIZE={} NUM={}",
          info.name,
          NetProtocolType::from_u16(protocol_type),
          data.len(),
          self.receiver.len()
        );
        Ok(())
      },
      Err(TrySendError::Full(_)) => Err(io::Error::new(io::ErrorKind::WouldBlock, "loopback queue is full")),
      Err(TrySendError::Disconnected(_)) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "loopback queue is closed")),
    }
  }

  fn poll(&mut self, _info: &NetDeviceInfo) -> io::Result<Option<ReceivedFrame>> {
    Ok(self.receiver.try_recv().ok())
  }
}

impl Loopback {
  pub fn new_device() -> NetDevice {
    Self::new_device_named(LOOPBACK_DEVICE_NAME)
  }

  pub fn new_device_named(name: &str) -> NetDevice {
    let info = NetDeviceInfo {
      name: name.to_string(),
      device_type: NetDeviceType::Loopback,
      mtu: LOOPBACK_MTU,
      header_length: 0,
      hwaddr: MacAddress::ANY,
      link_address: NetDeviceAddress::None,
      ipv4: None,
    };
    NetDevice::new(info, NetDeviceFlags::LOOPBACK, Box::new(Loopback::default()))
  }

  pub fn init(stack: &NetStack) -> Result<(), NetDeviceError> {
    stack.register_device(Self::new_device())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_loopback_returns_frames_in_order() {
    let mut dev = Loopback::new_device();
    assert!(dev.flags().contains(NetDeviceFlags::LOOPBACK));
    dev.open().unwrap();

    dev.output(0x0800, &[1, 2, 3], None).unwrap();
    dev.output(0x86dd, &[4], None).unwrap();

    assert_eq!(dev.poll().unwrap(), Some(ReceivedFrame { protocol_type: 0x0800, data: vec![1, 2, 3] }));
    assert_eq!(dev.poll().unwrap(), Some(ReceivedFrame { protocol_type: 0x86dd, data: vec![4] }));
    assert_eq!(dev.poll().unwrap(), None);
  }

  #[test]
  fn test_loopback_queue_limit() {
    let mut dev = Loopback::new_device();
    dev.open().unwrap();
    for _ in 0..LOOPBACK_QUEUE_LIMIT {
      dev.output(0x0800, &[0], None).unwrap();
    }
    assert!(matches!(dev.output(0x0800, &[0], None), Err(NetDeviceError::TransmitFailed { .. })));
  }

  #[test]
  fn test_close_drops_pending_frames() {
    let mut dev = Loopback::new_device();
    dev.open().unwrap();
    dev.output(0x0800, &[0], None).unwrap();
    dev.close().unwrap();
    dev.open().unwrap();
    assert_eq!(dev.poll().unwrap(), None);
  }
}
