// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

//! Device and protocol layers of the stack, and the net thread that drives them.

use std::fmt;
use std::io;
use std::ops;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::crossbeam_channel;
use crate::log;
use crate::parking_lot::Mutex;
use crate::thiserror;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::ethernet::MacAddress;
use crate::ipv4::Ipv4Interface;

pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NetProtocolType {
  Ip = 0x0800,
  Arp = 0x0806,
  Ipv6 = 0x86dd,
  Unknown,
}

impl NetProtocolType {
  pub fn from_u16(u: u16) -> NetProtocolType {
    match u {
      0x0800 => NetProtocolType::Ip,
      0x0806 => NetProtocolType::Arp,
      0x86dd => NetProtocolType::Ipv6,
      _ => NetProtocolType::Unknown,
    }
  }
}

impl fmt::Display for NetProtocolType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      NetProtocolType::Ip => "IPv4",
      NetProtocolType::Arp => "ARP",
      NetProtocolType::Ipv6 => "IPv6",
      NetProtocolType::Unknown => "Unknown",
    };
    write!(f, "{}", s)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NetDeviceType {
  Null = 0x0000,
  Loopback = 0x0001,
  Ethernet = 0x0002,
}

impl fmt::Display for NetDeviceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      NetDeviceType::Null => "Null",
      NetDeviceType::Loopback => "Loopback",
      NetDeviceType::Ethernet => "Ethernet",
    };
    write!(f, "{}", s)
  }
}

/// Device flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetDeviceFlags(u16);

impl NetDeviceFlags {
  pub const UP: NetDeviceFlags = NetDeviceFlags(0x0001);
  pub const LOOPBACK: NetDeviceFlags = NetDeviceFlags(0x0010);
  pub const BROADCAST: NetDeviceFlags = NetDeviceFlags(0x0020);
  pub const P2P: NetDeviceFlags = NetDeviceFlags(0x0040);
  pub const NEED_ARP: NetDeviceFlags = NetDeviceFlags(0x0100);

  pub const fn empty() -> Self {
    NetDeviceFlags(0)
  }

  pub const fn bits(&self) -> u16 {
    self.0
  }

  pub fn contains(&self, other: NetDeviceFlags) -> bool {
    self.0 & other.0 == other.0
  }

  pub fn insert(&mut self, other: NetDeviceFlags) {
    self.0 |= other.0;
  }

  pub fn remove(&mut self, other: NetDeviceFlags) {
    self.0 &= !other.0;
  }
}

impl ops::BitOr for NetDeviceFlags {
  type Output = NetDeviceFlags;

  fn bitor(self, rhs: NetDeviceFlags) -> NetDeviceFlags {
    NetDeviceFlags(self.0 | rhs.0)
  }
}

/// Link-level address a device talks to besides unicast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetDeviceAddress {
  None,
  Peer(MacAddress),
  Broadcast(MacAddress),
}

#[derive(Debug, Error)]
pub enum NetDeviceError {
  #[error("device is already up DEV={0}")]
  AlreadyUp(String),

  #[error("device is not up DEV={0}")]
  NotUp(String),

  #[error("open error DEV={name}: {source}")]
  OpenFailed { name: String, #[source] source: io::Error },

  #[error("close error DEV={name}: {source}")]
  CloseFailed { name: String, #[source] source: io::Error },

  #[error("data transmit failed DEV={name} SIZE={size}: {source}")]
  TransmitFailed { name: String, size: usize, #[source] source: io::Error },

  #[error("data size too big DEV={name} MTU={mtu} SIZE={size}")]
  TooLarge { name: String, mtu: u16, size: usize },

  #[error("device not found DEV={0}")]
  NotFound(String),

  #[error("device is already registered DEV={0}")]
  DuplicateDevice(String),
}

#[derive(Debug, Error)]
pub enum NetProtocolError {
  #[error("protocol is already registered TYPE={0:#06x}")]
  AlreadyRegistered(u16),
}

#[derive(Debug, Error)]
pub enum StackError {
  #[error(transparent)]
  Device(#[from] NetDeviceError),

  #[error("net stack is already running")]
  AlreadyRunning,

  #[error("failed to spawn net thread: {0}")]
  Spawn(#[source] io::Error),

  #[error("net thread panicked")]
  ThreadPanicked,
}

/// Static description of a device, shared with protocol handlers.
#[derive(Debug, Clone)]
pub struct NetDeviceInfo {
  pub name: String,
  pub device_type: NetDeviceType,
  pub mtu: u16,
  pub header_length: u16,
  pub hwaddr: MacAddress,
  pub link_address: NetDeviceAddress,
  pub ipv4: Option<Ipv4Interface>,
}

/// A frame handed up by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
  pub protocol_type: u16,
  pub data: Vec<u8>,
}

/// Driver half of a device: what actually moves bytes.
pub trait NetDeviceDriver: Send {
  fn open(&mut self, _info: &NetDeviceInfo) -> io::Result<()> {
    Ok(())
  }

  fn close(&mut self, _info: &NetDeviceInfo) -> io::Result<()> {
    Ok(())
  }

  fn transmit(&mut self, info: &NetDeviceInfo, protocol_type: u16, data: &[u8], dst: Option<MacAddress>) -> io::Result<()>;

  /// Return at most one received frame without blocking.
  fn poll(&mut self, _info: &NetDeviceInfo) -> io::Result<Option<ReceivedFrame>> {
    Ok(None)
  }
}

pub struct NetDevice {
  info: Arc<NetDeviceInfo>,
  flags: NetDeviceFlags,
  driver: Box<dyn NetDeviceDriver>,
}

impl fmt::Debug for NetDevice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NetDevice")
      .field("info", &self.info)
      .field("flags", &self.flags)
      .finish_non_exhaustive()
  }
}

impl NetDevice {
  pub fn new(info: NetDeviceInfo, flags: NetDeviceFlags, driver: Box<dyn NetDeviceDriver>) -> Self {
    let mut flags = flags;
    flags.remove(NetDeviceFlags::UP);
    NetDevice { info: Arc::new(info), flags, driver }
  }

  pub fn name(&self) -> &str {
    &self.info.name
  }

  pub fn info(&self) -> &Arc<NetDeviceInfo> {
    &self.info
  }

  pub fn flags(&self) -> NetDeviceFlags {
    self.flags
  }

  pub fn is_up(&self) -> bool {
    self.flags.contains(NetDeviceFlags::UP)
  }

  pub fn set_ipv4(&mut self, iface: Option<Ipv4Interface>) {
    Arc::make_mut(&mut self.info).ipv4 = iface;
  }

  pub fn open(&mut self) -> Result<(), NetDeviceError> {
    if self.is_up() {
      return Err(NetDeviceError::AlreadyUp(self.info.name.clone()));
    }
    self.driver.open(&self.info).map_err(|source| NetDeviceError::OpenFailed {
      name: self.info.name.clone(),
      source,
    })?;

    self.flags.insert(NetDeviceFlags::UP);
    log::info!("open device DEV={}", self.info.name);
    Ok(())
  }

  pub fn close(&mut self) -> Result<(), NetDeviceError> {
    if !self.is_up() {
      return Err(NetDeviceError::NotUp(self.info.name.clone()));
    }
    self.driver.close(&self.info).map_err(|source| NetDeviceError::CloseFailed {
      name: self.info.name.clone(),
      source,
    })?;

    self.flags.remove(NetDeviceFlags::UP);
    log::info!("close device DEV={}", self.info.name);
    Ok(())
  }

  pub fn output(&mut self, protocol_type: u16, data: &[u8], dst: Option<MacAddress>) -> Result<(), NetDeviceError> {
    if !self.is_up() {
      return Err(NetDeviceError::NotUp(self.info.name.clone()));
    }

    if data.len() > self.info.mtu as usize {
      return Err(NetDeviceError::TooLarge {
        name: self.info.name.clone(),
        mtu: self.info.mtu,
        size: data.len(),
      });
    }

    log::debug!(
      "output DEV={} TYPE={}:{:04x} SIZE={}",
      self.info.name,
      NetProtocolType::from_u16(protocol_type),
      protocol_type,
      data.len()
    );
    self.driver.transmit(&self.info, protocol_type, data, dst).map_err(|source| NetDeviceError::TransmitFailed {
      name: self.info.name.clone(),
      size: data.len(),
      source,
    })
  }

  pub fn poll(&mut self) -> io::Result<Option<ReceivedFrame>> {
    if !self.is_up() {
      return Ok(None);
    }
    self.driver.poll(&self.info)
  }
}

pub type ProtocolHandler = Arc<dyn Fn(&[u8], &NetDeviceInfo) + Send + Sync>;

struct QueueEntry {
  device: Arc<NetDeviceInfo>,
  data: Vec<u8>,
}

struct NetProtocol {
  protocol_type: u16,
  sender: Sender<QueueEntry>,
  receiver: Receiver<QueueEntry>,
  handler: ProtocolHandler,
}

/// Registry of devices and protocols plus the net thread.
pub struct NetStack {
  devices: Mutex<Vec<NetDevice>>,
  protocols: Mutex<Vec<NetProtocol>>,
  terminate: AtomicBool,
  thread: Mutex<Option<thread::JoinHandle<()>>>,
  idle_interval: Duration,
}

impl NetStack {
  pub fn new() -> Arc<Self> {
    Self::with_idle_interval(DEFAULT_IDLE_INTERVAL)
  }

  /// `idle_interval` is how long the net thread sleeps after an iteration with no work.
  pub fn with_idle_interval(idle_interval: Duration) -> Arc<Self> {
    Arc::new(NetStack {
      devices: Mutex::new(Vec::new()),
      protocols: Mutex::new(Vec::new()),
      terminate: AtomicBool::new(false),
      thread: Mutex::new(None),
      idle_interval,
    })
  }

  pub fn register_device(&self, dev: NetDevice) -> Result<(), NetDeviceError> {
    let mut devices = self.devices.lock();
    if devices.iter().any(|d| d.name() == dev.name()) {
      return Err(NetDeviceError::DuplicateDevice(dev.name().to_string()));
    }
    log::info!("net device register DEV={} TYPE={}", dev.name(), dev.info.device_type);
    devices.push(dev);
    Ok(())
  }

  pub fn device_names(&self) -> Vec<String> {
    self.devices.lock().iter().map(|d| d.name().to_string()).collect()
  }

  /// Run `f` against the named device with the device registry locked.
  pub fn with_device<R, F>(&self, name: &str, f: F) -> Result<R, NetDeviceError>
  where
    F: FnOnce(&mut NetDevice) -> R,
  {
    let mut devices = self.devices.lock();
    let dev = devices.iter_mut().find(|d| d.name() == name)
      .ok_or_else(|| NetDeviceError::NotFound(name.to_string()))?;
    Ok(f(dev))
  }

  pub fn set_ipv4(&self, name: &str, iface: Ipv4Interface) -> Result<(), NetDeviceError> {
    self.with_device(name, |dev| dev.set_ipv4(Some(iface)))?;
    log::info!("ipv4 interface DEV={} ADDR={}", name, iface);
    Ok(())
  }

  pub fn output(&self, name: &str, protocol_type: u16, data: &[u8], dst: Option<MacAddress>) -> Result<(), NetDeviceError> {
    self.with_device(name, |dev| dev.output(protocol_type, data, dst))?
  }

  pub fn register_protocol<F>(&self, protocol_type: u16, handler: F) -> Result<(), NetProtocolError>
  where
    F: Fn(&[u8], &NetDeviceInfo) + Send + Sync + 'static,
  {
    let mut protocols = self.protocols.lock();
    if protocols.iter().any(|p| p.protocol_type == protocol_type) {
      return Err(NetProtocolError::AlreadyRegistered(protocol_type));
    }
    let (sender, receiver) = crossbeam_channel::unbounded();
    protocols.push(NetProtocol { protocol_type, sender, receiver, handler: Arc::new(handler) });
    log::info!("net protocol register TYPE={}:{:04x}", NetProtocolType::from_u16(protocol_type), protocol_type);
    Ok(())
  }

  /// Queue `data` for the protocol registered for `protocol_type`.
  ///
  /// Returns false when no protocol takes the frame.
  pub fn input(&self, protocol_type: u16, data: Vec<u8>, device: Arc<NetDeviceInfo>) -> bool {
    let protocols = self.protocols.lock();
    let protocol = match protocols.iter().find(|p| p.protocol_type == protocol_type) {
      Some(protocol) => protocol,
      None => {
        log::debug!("unsupported protocol DEV={} TYPE={:04x} SIZE={}", device.name, protocol_type, data.len());
        return false;
      }
    };

    let size = data.len();
    let name = device.name.clone();
    if protocol.sender.send(QueueEntry { device, data }).is_err() {
      return false;
    }
    log::debug!(
      "queue pushed DEV={} TYPE={}:{:04x} SIZE={}",
      name,
      NetProtocolType::from_u16(protocol_type),
      protocol_type,
      size
    );
    true
  }

  /// One iteration of the net thread. Returns the amount of work done.
  pub fn poll_once(&self) -> usize {
    let mut received = Vec::new();
    {
      let mut devices = self.devices.lock();
      for dev in devices.iter_mut().filter(|d| d.is_up()) {
        match dev.poll() {
          Ok(Some(frame)) => received.push((frame, dev.info.clone())),
          Ok(None) => {},
          Err(e) => log::warn!("poll failed DEV={}: {}", dev.name(), e),
        }
      }
    }

    let mut count = received.len();
    for (frame, info) in received {
      self.input(frame.protocol_type, frame.data, info);
    }

    // Handlers run without the registry lock so they can call back into the stack.
    let pending: Vec<(ProtocolHandler, QueueEntry)> = {
      let protocols = self.protocols.lock();
      protocols.iter()
        .filter_map(|p| p.receiver.try_recv().ok().map(|entry| (p.handler.clone(), entry)))
        .collect()
    };
    count += pending.len();
    for (handler, entry) in pending {
      handler(&entry.data[..], &*entry.device);
    }

    count
  }

  fn net_thread(&self) {
    log::debug!("net thread started");
    while !self.terminate.load(Ordering::Acquire) {
      if self.poll_once() == 0 {
        thread::sleep(self.idle_interval);
      }
    }
    log::debug!("net thread terminated");
  }

  pub fn is_running(&self) -> bool {
    self.thread.lock().is_some()
  }

  /// Open every device that is not up yet and start the net thread.
  pub fn run(self: &Arc<Self>) -> Result<(), StackError> {
    let mut thread_handle = self.thread.lock();
    if thread_handle.is_some() {
      return Err(StackError::AlreadyRunning);
    }

    {
      let mut devices = self.devices.lock();
      for dev in devices.iter_mut().filter(|d| !d.is_up()) {
        dev.open()?;
      }
    }

    self.terminate.store(false, Ordering::Release);
    let stack = self.clone();
    let handle = thread::Builder::new()
      .name("net".to_string())
      .spawn(move || stack.net_thread())
      .map_err(StackError::Spawn)?;
    *thread_handle = Some(handle);
    log::info!("net stack running");
    Ok(())
  }

  /// Stop the net thread and close every device that is up.
  pub fn shutdown(&self) -> Result<(), StackError> {
    self.terminate.store(true, Ordering::Release);
    let handle = self.thread.lock().take();
    let joined = match handle {
      Some(handle) => handle.join().map_err(|_| StackError::ThreadPanicked),
      None => Ok(()),
    };

    let mut first_error = None;
    {
      let mut devices = self.devices.lock();
      for dev in devices.iter_mut().filter(|d| d.is_up()) {
        if let Err(e) = dev.close() {
          log::warn!("{}", e);
          first_error.get_or_insert(e);
        }
      }
    }

    joined?;
    if let Some(e) = first_error {
      return Err(e.into());
    }
    log::info!("net stack shut down");
    Ok(())
  }
}
