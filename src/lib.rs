// -*- indent-tabs-mode: nil; tab-width: 4; -*-
// vim: set ts=4 sw=4 et ai :

pub use parking_lot;
pub use anyhow;
pub use thiserror;
pub use tokio;
pub use log;
pub use clap;
pub use syslog;
pub use serde;
pub use toml;
pub use libc;
pub use crossbeam_channel;
pub use nix;

pub mod config;
pub mod device;
pub mod ethernet;
pub mod ipv4;
pub mod net;
pub mod tap;
pub mod utils;

pub use net::{
    NetStack,
    NetDevice,
    NetDeviceDriver,
    NetDeviceType,
    NetDeviceFlags,
    NetProtocolType,
    NetDeviceInfo,
    NetDeviceError,
    NetProtocolError,
    StackError,
};
