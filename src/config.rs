// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

//! Configuration for the stack daemon.

use std::{collections::HashMap, path::Path, time::Duration};

use crate::tokio;
use crate::serde;
use crate::toml;
use crate::anyhow;

use serde::Deserialize;
use crate::log;
use log::LevelFilter;

use crate::device::{Loopback, Null, TapDriver};
use crate::device::tap::DEFAULT_HW_ADDRESS;
use crate::ethernet::MacAddress;
use crate::ipv4::Ipv4Interface;
use crate::net::{NetDevice, NetStack, DEFAULT_IDLE_INTERVAL};

/// Configuration for the stack daemon.
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
  #[serde(default)]
  pub log_level: LogLevel,

  /// Sleep between net thread iterations that found no work, in milliseconds.
  #[serde(default = "default_idle_interval_ms")]
  pub idle_interval_ms: u64,

  #[serde(default)]
  pub devices: HashMap<String, DeviceConfig>,
}

fn default_idle_interval_ms() -> u64 {
  DEFAULT_IDLE_INTERVAL.as_millis() as u64
}

impl Config {
  /// parse the configuration from a string.
  pub fn parse(config_str: &str) -> Result<Self, anyhow::Error> {
    let config: Config = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
  }

  /// read the configuration from a file.
  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
    let config_str = std::fs::read_to_string(path)?;
    Self::parse(&config_str)
  }

  /// read the configuration from a file asynchronously using tokio.
  pub async fn from_path_async<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
    let config_str = tokio::fs::read_to_string(path).await?;
    Self::parse(&config_str)
  }

  fn validate(&self) -> Result<(), anyhow::Error> {
    for (name, device) in &self.devices {
      device.validate().map_err(|e| anyhow::anyhow!("device {}: {}", name, e))?;
    }
    Ok(())
  }

  /// Get the log level as a `LevelFilter`.
  pub fn level_filter(&self) -> LevelFilter {
    self.log_level.into()
  }

  pub fn idle_interval(&self) -> Duration {
    Duration::from_millis(self.idle_interval_ms)
  }

  /// Create a stack with every configured device registered and addressed.
  pub fn build_stack(&self) -> Result<std::sync::Arc<NetStack>, anyhow::Error> {
    let stack = NetStack::with_idle_interval(self.idle_interval());
    let mut names: Vec<&String> = self.devices.keys().collect();
    names.sort();
    for name in names {
      let device = &self.devices[name];
      stack.register_device(device.build(name)?)?;
      if let Some(iface) = device.ipv4_interface()? {
        stack.set_ipv4(name, iface)?;
      }
    }
    Ok(stack)
  }
}

/// Configuration for a device.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DeviceConfig {
  Null {
    address: Option<String>,
  },
  Loopback {
    address: Option<String>,
  },
  Tap {
    /// MAC address of the stack side of the interface.
    mac: Option<String>,

    /// IPv4 address in CIDR notation.
    address: Option<String>,
  },
}

impl DeviceConfig {
  fn address(&self) -> Option<&str> {
    match self {
      DeviceConfig::Null { address } => address.as_deref(),
      DeviceConfig::Loopback { address } => address.as_deref(),
      DeviceConfig::Tap { address, .. } => address.as_deref(),
    }
  }

  pub fn ipv4_interface(&self) -> Result<Option<Ipv4Interface>, anyhow::Error> {
    match self.address() {
      Some(address) => Ok(Some(address.parse()?)),
      None => Ok(None),
    }
  }

  pub fn mac_address(&self) -> Result<MacAddress, anyhow::Error> {
    match self {
      DeviceConfig::Tap { mac: Some(mac), .. } => Ok(mac.parse()?),
      DeviceConfig::Tap { mac: None, .. } => Ok(DEFAULT_HW_ADDRESS),
      _ => Ok(MacAddress::ANY),
    }
  }

  fn validate(&self) -> Result<(), anyhow::Error> {
    self.ipv4_interface()?;
    self.mac_address()?;
    Ok(())
  }

  /// Create the device this entry describes, named `name`.
  pub fn build(&self, name: &str) -> Result<NetDevice, anyhow::Error> {
    let device = match self {
      DeviceConfig::Null { .. } => Null::new_device_named(name),
      DeviceConfig::Loopback { .. } => Loopback::new_device_named(name),
      DeviceConfig::Tap { .. } => TapDriver::new_device(name, self.mac_address()?),
    };
    Ok(device)
  }
}

/// Log level.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Debug)]
pub enum LogLevel {
  Off,
  Error,
  Warn,
  Info,
  Debug,
  Trace,
}

impl Default for LogLevel {
  fn default() -> Self {
    LogLevel::Warn
  }
}

impl From<LogLevel> for LevelFilter {
  fn from(value: LogLevel) -> Self {
    match value {
      LogLevel::Off => LevelFilter::Off,
      LogLevel::Error => LevelFilter::Error,
      LogLevel::Warn => LevelFilter::Warn,
      LogLevel::Info => LevelFilter::Info,
      LogLevel::Debug => LevelFilter::Debug,
      LogLevel::Trace => LevelFilter::Trace,
    }
  }
}

impl From<LevelFilter> for LogLevel {
  fn from(value: LevelFilter) -> Self {
    match value {
      LevelFilter::Off => LogLevel::Off,
      LevelFilter::Error => LogLevel::Error,
      LevelFilter::Warn => LogLevel::Warn,
      LevelFilter::Info => LogLevel::Info,
      LevelFilter::Debug => LogLevel::Debug,
      LevelFilter::Trace => LogLevel::Trace,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
log_level = "Info"
idle_interval_ms = 5

[devices.loopback]
type = "Loopback"

[devices.tap0]
type = "Tap"
mac = "00:00:5e:00:53:ff"
address = "192.0.2.2/24"
"#;

  #[test]
  fn test_parse_sample() {
    let config = Config::parse(SAMPLE).unwrap();
    assert_eq!(config.level_filter(), LevelFilter::Info);
    assert_eq!(config.idle_interval(), Duration::from_millis(5));
    assert_eq!(config.devices["loopback"], DeviceConfig::Loopback { address: None });

    let tap = &config.devices["tap0"];
    assert_eq!(tap.mac_address().unwrap().to_string(), "00:00:5e:00:53:ff");
    assert_eq!(tap.ipv4_interface().unwrap().unwrap().to_string(), "192.0.2.2/24");
  }

  #[test]
  fn test_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.log_level, LogLevel::Warn);
    assert_eq!(config.idle_interval(), DEFAULT_IDLE_INTERVAL);
    assert!(config.devices.is_empty());

    let tap = DeviceConfig::Tap { mac: None, address: None };
    assert_eq!(tap.mac_address().unwrap(), DEFAULT_HW_ADDRESS);
  }

  #[test]
  fn test_rejects_bad_values() {
    assert!(Config::parse("[devices.tap0]\ntype = \"Tap\"\naddress = \"192.0.2.2\"\n").is_err());
    assert!(Config::parse("[devices.tap0]\ntype = \"Tap\"\nmac = \"zz\"\n").is_err());
    assert!(Config::parse("[devices.x]\ntype = \"Bridge\"\n").is_err());
    assert!(Config::parse("log_level = \"Loud\"\n").is_err());
  }

  #[test]
  fn test_build_stack_without_tap() {
    let config = Config::parse(
      "[devices.lo]\ntype = \"Loopback\"\naddress = \"127.0.0.1/8\"\n[devices.null]\ntype = \"Null\"\n",
    ).unwrap();
    let stack = config.build_stack().unwrap();
    assert_eq!(stack.device_names(), vec!["lo".to_string(), "null".to_string()]);
    let ipv4 = stack.with_device("lo", |dev| dev.info().ipv4).unwrap();
    assert_eq!(ipv4.unwrap().to_string(), "127.0.0.1/8");
  }

  #[test]
  fn test_level_filter_round_trip() {
    for level in [LogLevel::Off, LogLevel::Error, LogLevel::Trace] {
      assert_eq!(LogLevel::from(LevelFilter::from(level)), level);
    }
  }
}
