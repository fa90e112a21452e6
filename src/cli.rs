//! Command-line interface definitions using clap.

use crate::logging::LogFormat;
use crate::version;
use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Bridge a browser client to a crash-isolated chemical format converter.
#[derive(Parser, Debug)]
#[command(name = "molbridge")]
#[command(author, version = version::full_version(), about, long_about = None)]
pub struct Cli {
    /// Port for the web page and WebSocket endpoint.
    #[arg(long, default_value_t = 8000)]
    pub http_port: u16,

    /// Port for the internal TCP channel (always bound to 127.0.0.1).
    #[arg(long, default_value_t = 5000)]
    pub tcp_port: u16,

    /// Seconds an operation may run before the worker pool is recycled.
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,

    /// Worker processes per connection.
    #[arg(long, default_value_t = 2)]
    pub workers: usize,

    /// Log all transmitted data.
    #[arg(long)]
    pub debug: bool,

    /// Do not open a browser on startup.
    #[arg(long)]
    pub no_browser: bool,

    /// Address the HTTP server binds to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Converter program run by the built-in operations.
    #[arg(long, env = "MOLBRIDGE_CONVERTER", default_value = "obabel")]
    pub converter: PathBuf,

    /// Directory served under /static/.
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,

    /// Log output format.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormatArg>,

    /// Also write logs to this file (rotated daily).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Run as a worker subprocess speaking the worker protocol on stdin/stdout.
    #[arg(long, hide = true)]
    pub internal_worker: bool,
}

/// Log format argument.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogFormatArg {
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line output.
    Compact,
    /// JSON lines, for log aggregation.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}
