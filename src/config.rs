//! Validated server configuration.
//!
//! Built once from the command line and never changed afterwards.

use crate::cli::Cli;
use crate::dispatcher::DispatcherConfig;
use crate::error::{BridgeError, Result};
use crate::worker::{WorkerCommand, WorkerPoolConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address of the web page and WebSocket endpoint.
    pub http_addr: SocketAddr,
    /// Address of the line-delimited JSON channel, always loopback.
    pub tcp_addr: SocketAddr,
    /// Deadline for a single operation.
    pub timeout: Duration,
    /// Worker processes per connection.
    pub workers: usize,
    pub open_browser: bool,
    pub static_dir: PathBuf,
    /// How each connection's workers are launched.
    pub worker: WorkerCommand,
}

impl BridgeConfig {
    /// Build and validate the configuration for the running binary.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let worker = WorkerCommand::current_exe(&cli.converter)?;
        let config = Self {
            http_addr: SocketAddr::new(cli.host, cli.http_port),
            tcp_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, cli.tcp_port)),
            timeout: Duration::from_secs(cli.timeout),
            workers: cli.workers,
            open_browser: !cli.no_browser,
            static_dir: cli.static_dir.clone(),
            worker,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the server relies on.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(BridgeError::Config("--workers must be at least 1".into()));
        }
        if self.timeout < Duration::from_secs(1) {
            return Err(BridgeError::Config("--timeout must be at least 1 second".into()));
        }
        let (http, tcp) = (self.http_addr.port(), self.tcp_addr.port());
        if http != 0 && http == tcp {
            return Err(BridgeError::Config(format!(
                "--http-port and --tcp-port are both {}",
                http
            )));
        }
        Ok(())
    }

    /// Settings for each connection's dispatcher.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            timeout: self.timeout,
            pool: WorkerPoolConfig {
                worker_count: self.workers,
                command: self.worker.clone(),
            },
        }
    }
}
