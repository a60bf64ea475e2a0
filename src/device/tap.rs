// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

//! Ethernet device backed by a TAP interface.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;

use crate::libc;
use crate::log;

use crate::ethernet::{self, EthernetHeader, MacAddress, ETHERNET_FRAME_MAX, ETHERNET_HEADER_SIZE, ETHERNET_PAYLOAD_MAX};
use crate::net::{
  NetDevice,
  NetDeviceAddress,
  NetDeviceDriver,
  NetDeviceFlags,
  NetDeviceInfo,
  NetDeviceType,
  ReceivedFrame,
};
use crate::tap;

pub const DEFAULT_TAP_NAME: &str = "tap0";
pub const DEFAULT_HW_ADDRESS: MacAddress = MacAddress([0x00, 0x00, 0x5e, 0x00, 0x53, 0x01]);

#[derive(Debug, Default)]
pub struct TapDriver {
  file: Option<File>,
}

impl TapDriver {
  pub fn new_device(name: &str, hwaddr: MacAddress) -> NetDevice {
    let info = NetDeviceInfo {
      name: name.to_string(),
      device_type: NetDeviceType::Ethernet,
      mtu: ETHERNET_PAYLOAD_MAX as u16,
      header_length: ETHERNET_HEADER_SIZE as u16,
      hwaddr,
      link_address: NetDeviceAddress::Broadcast(MacAddress::BROADCAST),
      ipv4: None,
    };
    NetDevice::new(info, NetDeviceFlags::BROADCAST | NetDeviceFlags::NEED_ARP, Box::new(TapDriver::default()))
  }

  fn file(&mut self) -> io::Result<&mut File> {
    self.file.as_mut().ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "TAP interface is not open"))
  }
}

fn set_nonblocking(file: &File) -> io::Result<()> {
  let fd = file.as_raw_fd();
  let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
  if flags < 0 {
    return Err(io::Error::last_os_error());
  }
  let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
  if ret < 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(())
}

fn readable(file: &File) -> io::Result<bool> {
  let mut pfd = libc::pollfd {
    fd: file.as_raw_fd(),
    events: libc::POLLIN,
    revents: 0,
  };
  let ret = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, 0) };
  if ret < 0 {
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::Interrupted {
      return Ok(false);
    }
    return Err(err);
  }
  Ok(ret > 0 && pfd.revents & libc::POLLIN != 0)
}

/// Strip the Ethernet header off `frame` if it is addressed to `hwaddr` or broadcast.
pub fn accept_frame(hwaddr: MacAddress, frame: &[u8]) -> Option<ReceivedFrame> {
  let (header, payload) = EthernetHeader::parse(frame)?;
  if header.dst != hwaddr && !header.dst.is_broadcast() {
    return None;
  }
  Some(ReceivedFrame { protocol_type: header.ether_type, data: payload.to_vec() })
}

impl NetDeviceDriver for TapDriver {
  fn open(&mut self, info: &NetDeviceInfo) -> io::Result<()> {
    let file = tap::tap_open(&info.name)?;
    set_nonblocking(&file)?;
    log::debug!("TAP attached DEV={} HWADDR={}", info.name, info.hwaddr);
    self.file = Some(file);
    Ok(())
  }

  fn close(&mut self, info: &NetDeviceInfo) -> io::Result<()> {
    if self.file.take().is_some() {
      log::debug!("TAP detached DEV={}", info.name);
    }
    Ok(())
  }

  fn transmit(&mut self, info: &NetDeviceInfo, protocol_type: u16, data: &[u8], dst: Option<MacAddress>) -> io::Result<()> {
    let header = EthernetHeader {
      dst: dst.unwrap_or(MacAddress::BROADCAST),
      src: info.hwaddr,
      ether_type: protocol_type,
    };
    let frame = ethernet::build_frame(&header, data);
    let written = self.file()?.write(&frame)?;
    if written != frame.len() {
      return Err(io::Error::new(io::ErrorKind::WriteZero, format!("short write: {} of {} bytes", written, frame.len())));
    }
    log::trace!("frame sent DEV={} DST={} TYPE={:04x} LEN={}", info.name, header.dst, protocol_type, frame.len());
    Ok(())
  }

  fn poll(&mut self, info: &NetDeviceInfo) -> io::Result<Option<ReceivedFrame>> {
    let file = self.file()?;
    if !readable(file)? {
      return Ok(None);
    }

    let mut buf = [0u8; ETHERNET_FRAME_MAX];
    let len = match file.read(&mut buf) {
      Ok(len) => len,
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
      Err(e) => return Err(e),
    };

    let frame = accept_frame(info.hwaddr, &buf[..len]);
    if frame.is_none() {
      log::trace!("frame ignored DEV={} LEN={}", info.name, len);
    }
    Ok(frame)
  }
}
