// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

//! Host-side TAP interface plumbing: create, attach, address, bring up, delete.

use std::fs::File;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;

use crate::libc;
use crate::nix;

use crate::ethernet::MacAddress;
use crate::ipv4::Ipv4Interface;


pub const TUNSETIFF: libc::c_ulong = nix::request_code_write!(b'T', 202, std::mem::size_of::<libc::c_int>());
pub const TUNSETPERSIST: libc::c_ulong = nix::request_code_write!(b'T', 203, std::mem::size_of::<libc::c_int>());
pub const TUNSETOWNER: libc::c_ulong = nix::request_code_write!(b'T', 204, std::mem::size_of::<libc::c_int>());

pub const TUNDEV: *const libc::c_char = "/dev/net/tun\0".as_ptr() as *const libc::c_char;

/// Fail `TUNSETIFF` instead of attaching when the interface already exists.
pub const IFF_TUN_EXCL: libc::c_int = 0x8000;

const SYSFS_NET: &str = "/sys/class/net";


fn ifname_to_cstring(ifname: &str) -> std::io::Result<std::ffi::CString> {
  if ifname.len() >= libc::IFNAMSIZ || ifname.len() == 0 {
    return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "interface name too long or short"));
  }

  if ifname.contains('/') || ifname.chars().any(|c| c.is_ascii_whitespace() || c == '\x0b') {
    return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "interface name contains an invalid character"));
  }

  std::ffi::CString::new(ifname).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
}

fn new_ifreq(ifname: &str) -> std::io::Result<libc::ifreq> {
  let ifname = ifname_to_cstring(ifname)?;
  let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
  unsafe {
    libc::strncpy(ifr.ifr_name.as_mut_ptr(), ifname.as_ptr(), libc::IFNAMSIZ - 1);
  }
  Ok(ifr)
}

fn open_tun() -> std::io::Result<OwnedFd> {
  let fd = unsafe { libc::open(TUNDEV, libc::O_RDWR | libc::O_CLOEXEC) };
  if fd < 0 {
    return Err(std::io::Error::last_os_error());
  }
  Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn inet_socket() -> std::io::Result<OwnedFd> {
  let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
  if fd < 0 {
    return Err(std::io::Error::last_os_error());
  }
  Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn ioctl_ptr(fd: &OwnedFd, request: libc::c_ulong, ifr: &mut libc::ifreq) -> std::io::Result<()> {
  let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request, ifr as *mut libc::ifreq) };
  if ret < 0 {
    return Err(std::io::Error::last_os_error());
  }
  Ok(())
}

fn ioctl_value(fd: &OwnedFd, request: libc::c_ulong, value: libc::c_ulong) -> std::io::Result<()> {
  let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request, value) };
  if ret < 0 {
    return Err(std::io::Error::last_os_error());
  }
  Ok(())
}

fn tun_set_iff(fd: &OwnedFd, ifname: &str, extra_flags: libc::c_int) -> std::io::Result<()> {
  let mut ifr = new_ifreq(ifname)?;
  ifr.ifr_ifru.ifru_flags = (libc::IFF_TAP | libc::IFF_NO_PI | extra_flags) as libc::c_short;
  ioctl_ptr(fd, TUNSETIFF, &mut ifr)
}

/// Attach to the TAP interface `ifname`, creating a transient one if it does not exist.
pub fn tap_open(ifname: &str) -> std::io::Result<File> {
  let fd = open_tun()?;
  tun_set_iff(&fd, ifname, 0)?;
  Ok(File::from(fd))
}

/// Add a persistent TAP interface with the given name, optionally owned by `owner`.
///
/// Fails with `EBUSY` if an interface with that name already exists.
pub fn tap_add_ioctl(ifname: &str, owner: Option<libc::uid_t>) -> std::io::Result<()> {
  let fd = open_tun()?;
  tun_set_iff(&fd, ifname, IFF_TUN_EXCL)?;

  if let Some(uid) = owner {
    ioctl_value(&fd, TUNSETOWNER, uid as libc::c_ulong)?;
  }

  ioctl_value(&fd, TUNSETPERSIST, 1)
}

/// Delete a persistent TAP interface with the given name.
pub fn tap_del_ioctl(ifname: &str) -> std::io::Result<()> {
  let fd = open_tun()?;
  tun_set_iff(&fd, ifname, 0)?;
  ioctl_value(&fd, TUNSETPERSIST, 0)
}

fn sockaddr_from(addr: Ipv4Addr) -> libc::sockaddr {
  let sin = libc::sockaddr_in {
    sin_family: libc::AF_INET as libc::sa_family_t,
    sin_port: 0,
    sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(addr.octets()) },
    sin_zero: [0; 8],
  };
  unsafe { std::mem::transmute::<libc::sockaddr_in, libc::sockaddr>(sin) }
}

/// Assign `iface` (address and netmask) to the interface `ifname`.
pub fn set_ipv4_address(ifname: &str, iface: &Ipv4Interface) -> std::io::Result<()> {
  let sock = inet_socket()?;

  let mut ifr = new_ifreq(ifname)?;
  ifr.ifr_ifru.ifru_addr = sockaddr_from(iface.unicast);
  ioctl_ptr(&sock, libc::SIOCSIFADDR, &mut ifr)?;

  let mut ifr = new_ifreq(ifname)?;
  ifr.ifr_ifru.ifru_netmask = sockaddr_from(iface.netmask);
  ioctl_ptr(&sock, libc::SIOCSIFNETMASK, &mut ifr)
}

/// Administratively enable the interface `ifname`.
pub fn set_link_up(ifname: &str) -> std::io::Result<()> {
  let sock = inet_socket()?;

  let mut ifr = new_ifreq(ifname)?;
  ioctl_ptr(&sock, libc::SIOCGIFFLAGS, &mut ifr)?;
  unsafe {
    ifr.ifr_ifru.ifru_flags |= libc::IFF_UP as libc::c_short;
  }
  ioctl_ptr(&sock, libc::SIOCSIFFLAGS, &mut ifr)
}

/// Check if an interface exists.
pub fn tap_exists(ifname: &str) -> bool {
  Path::new(SYSFS_NET).join(ifname).exists()
}

/// Read the hardware address the kernel reports for `ifname`.
pub fn read_hw_address(ifname: &str) -> std::io::Result<MacAddress> {
  let path = Path::new(SYSFS_NET).join(ifname).join("address");
  let address = std::fs::read_to_string(path)?;
  address.trim().parse().map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
