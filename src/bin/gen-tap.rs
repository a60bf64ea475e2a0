// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

//! gen-tap - provision the host side of the stack's TAP interface:
//! create it owned by the invoking user, assign an IPv4 address and bring it up.

use rustic_stack::anyhow;
use rustic_stack::clap;
use rustic_stack::libc;
use rustic_stack::nix;

use anyhow::Context;
use clap::Parser;

use rustic_stack::device::tap::DEFAULT_TAP_NAME;
use rustic_stack::ipv4::Ipv4Interface;
use rustic_stack::tap;

const DEFAULT_HOST_ADDRESS: &'static str = "192.0.2.1/24";


#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
  /// Interface name.
  #[clap(short = 'n', long, default_value = DEFAULT_TAP_NAME)]
  name: String,

  /// Host address of the interface in CIDR notation.
  #[clap(short = 'a', long, default_value = DEFAULT_HOST_ADDRESS)]
  address: String,

  /// Owner of the interface. Defaults to the user who invoked sudo, or the current user.
  #[clap(short = 'u', long)]
  user: Option<String>,
}

fn resolve_owner(user: Option<&str>) -> Result<libc::uid_t, anyhow::Error> {
  if let Some(name) = user {
    let user = nix::unistd::User::from_name(name)?
      .ok_or_else(|| anyhow::anyhow!("no such user: {}", name))?;
    return Ok(user.uid.as_raw());
  }

  if let Ok(uid) = std::env::var("SUDO_UID") {
    return uid.parse().with_context(|| format!("invalid SUDO_UID: {}", uid));
  }

  Ok(nix::unistd::getuid().as_raw())
}

fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();
  let iface: Ipv4Interface = args.address.parse()?;
  let owner = resolve_owner(args.user.as_deref())?;

  if tap::tap_exists(&args.name) {
    anyhow::bail!("interface {} already exists", args.name);
  }

  tap::tap_add_ioctl(&args.name, Some(owner))
    .with_context(|| format!("failed to create TAP interface {}", args.name))?;
  tap::set_ipv4_address(&args.name, &iface)
    .with_context(|| format!("failed to assign {} to {}", iface, args.name))?;
  tap::set_link_up(&args.name)
    .with_context(|| format!("failed to bring {} up", args.name))?;

  let hwaddr = tap::read_hw_address(&args.name)?;
  println!("{}: {} {} up, owner uid {}", args.name, hwaddr, iface, owner);
  Ok(())
}
