//! molbridge - browser bridge to a crash-isolated format converter

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};

use molbridge::cli::Cli;
use molbridge::config::BridgeConfig;
use molbridge::logging::{self, LogConfig};
use molbridge::operations::{ConverterConfig, OperationRegistry};
use molbridge::server;
use molbridge::worker::run_worker_main;
use std::time::Duration;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    let cli = Cli::parse();

    let result = if cli.internal_worker {
        cmd_worker(&cli)
    } else {
        cmd_serve(&cli)
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Serve worker protocol requests on stdin/stdout. Only returns on a setup error.
fn cmd_worker(cli: &Cli) -> Result<()> {
    logging::init(LogConfig::for_worker().with_env_overrides().without_file());

    let registry = OperationRegistry::builtin(ConverterConfig::new(&cli.converter))
        .context("Failed to register operations")?;
    run_worker_main(registry)
}

fn cmd_serve(cli: &Cli) -> Result<()> {
    let mut log_config = LogConfig::for_server(cli.debug).with_env_overrides();
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format.into());
    }
    if let Some(ref path) = cli.log_file {
        log_config = log_config.with_file(path.clone());
    }
    logging::init(log_config);

    let config = BridgeConfig::from_cli(cli)?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    let served = runtime.block_on(server::run_server(config));
    // Dropped connections kill their workers; don't wait forever on stragglers.
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    served?;
    Ok(())
}
