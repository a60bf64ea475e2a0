// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

//! stackd - run the protocol stack with the configured devices
//! Note that this does not daemonize, because it is intended to be run under a process supervisor like systemd.

use std::path::{Path, PathBuf};

use rustic_stack::tokio;
use rustic_stack::log;
use rustic_stack::syslog;
use rustic_stack::anyhow;

use rustic_stack::clap;
use clap::Parser;

use rustic_stack::config;
use rustic_stack::ipv4;

use tokio::select;
use tokio::signal::unix::{signal, SignalKind};

const APP_NAME: &'static str = "stackd";
const DEFAULT_CONFIG_PATH: &'static str = "/etc/rustic-stack/stackd.toml";


#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
  #[clap(short = 'c', long, value_parser, default_value = DEFAULT_CONFIG_PATH)]
  config: PathBuf,
}

async fn load_config<P: AsRef<Path>>(config_path: P) -> Result<config::Config, anyhow::Error> {
  config::Config::from_path_async(config_path).await
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  syslog::init(syslog::Facility::LOG_DAEMON, log::LevelFilter::Info, Some(APP_NAME)).map_err(|e| anyhow::anyhow!("{}", e))?;
  let args = Args::parse();
  let config_path = args.config;
  let config = load_config(&config_path).await?;
  log::set_max_level(config.level_filter());

  let stack = config.build_stack()?;
  ipv4::register(&stack)?;
  stack.run()?;

  let mut hup_stream = signal(SignalKind::hangup())?;
  let mut term_stream = signal(SignalKind::terminate())?;
  let mut int_stream = signal(SignalKind::interrupt())?;

  loop {
    select! {
      _ = hup_stream.recv() => {
        // Devices are fixed for the life of the process; only the log level is reloaded.
        match load_config(&config_path).await {
          Ok(new_config) => {
            log::set_max_level(new_config.level_filter());
            log::info!("Reloaded configuration from {}", config_path.display());
          },
          Err(e) => {
            log::warn!("Failed to reload configuration from {}: {}", config_path.display(), e);
          }
        }
      },
      _ = term_stream.recv() => {
        log::info!("SIGTERM received");
        break;
      },
      _ = int_stream.recv() => {
        log::info!("SIGINT received");
        break;
      },
    }
  }

  let stopping = stack.clone();
  tokio::task::spawn_blocking(move || stopping.shutdown()).await??;
  Ok(())
}
