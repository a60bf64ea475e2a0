// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

use rustic_stack::device::tap::DEFAULT_TAP_NAME;
use rustic_stack::tap;

fn main() -> std::io::Result<()> {
  let ifname = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_TAP_NAME.to_string());

  tap::tap_del_ioctl(&ifname)
}
