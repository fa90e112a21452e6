//! Logging setup for the server and its worker subprocesses.
//!
//! Logs always go to stderr. In a worker, stdout carries the worker
//! protocol, so nothing else may write there.
//!
//! # Environment Variables
//!
//! - `MOLBRIDGE_LOG` - Log filter (overrides RUST_LOG)
//! - `MOLBRIDGE_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `MOLBRIDGE_LOG_FORMAT` - Output format: pretty, compact, json
//! - `MOLBRIDGE_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use molbridge::logging::{LogConfig, init};
//!
//! init(LogConfig::for_server(false).with_env_overrides());
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

/// Filter used by `--debug`: everything from molbridge and request traces.
const DEBUG_FILTER: &str = "info,molbridge=debug,tower_http=debug";

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-field format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    pub format: LogFormat,
    /// Daily-rotated log file next to stderr output.
    pub file_path: Option<PathBuf>,
    /// Log span timing on close.
    pub span_events: bool,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    pub show_target: bool,
    pub show_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            span_events: false,
            filter: None,
            show_target: true,
            show_thread_ids: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for the server process. `debug` turns on request tracing.
    pub fn for_server(debug: bool) -> Self {
        let config = Self::default();
        if debug {
            config
                .with_filter(DEBUG_FILTER.to_string())
                .with_span_events(true)
        } else {
            config
        }
    }

    /// Preset for worker subprocesses: terse, warnings and up.
    pub fn for_worker() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            show_target: false,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Drop file output, e.g. for worker processes inheriting the environment.
    pub fn without_file(mut self) -> Self {
        self.file_path = None;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Apply environment variable overrides.
    ///
    /// A filter set from the command line wins over `MOLBRIDGE_LOG`,
    /// `RUST_LOG` and `MOLBRIDGE_LOG_LEVEL`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if self.filter.is_none() {
            self.filter = var("MOLBRIDGE_LOG").or_else(|| var("RUST_LOG"));
        }

        if self.filter.is_none()
            && let Some(level) = var("MOLBRIDGE_LOG_LEVEL").as_deref().and_then(parse_level)
        {
            self.level = level;
        }

        if let Some(format) = var("MOLBRIDGE_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Some(path) = var("MOLBRIDGE_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let default = || EnvFilter::new(self.level.as_str().to_lowercase());
        match self.filter {
            Some(ref filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                default()
            }),
            None => default(),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn layer<W>(&self, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_span_events(self.span_events())
            .with_target(self.show_target)
            .with_thread_ids(self.show_thread_ids)
            .with_ansi(ansi)
            .with_writer(writer);

        match self.format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Pretty => layer.boxed(),
        }
    }
}

/// Parse a log level string.
fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn file_appender(path: &Path) -> RollingFileAppender {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("molbridge.log");
    RollingFileAppender::new(Rotation::DAILY, parent, file_name)
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup. Later calls are silently ignored.
pub fn init(config: LogConfig) {
    let mut layers: Vec<BoxedLayer> = vec![config.layer(std::io::stderr, true)];
    if let Some(ref path) = config.file_path {
        layers.push(config.layer(file_appender(path), false));
    }

    let _ = tracing_subscriber::registry()
        .with(config.build_filter())
        .with(layers)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error"), Some(Level::ERROR));
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("INFO"), Some(Level::INFO));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("invalid"), None);
    }

    #[test]
    fn test_presets() {
        let server = LogConfig::for_server(false);
        assert_eq!(server.level, Level::INFO);
        assert!(server.filter.is_none());

        let debug = LogConfig::for_server(true);
        assert_eq!(debug.filter.as_deref(), Some(DEBUG_FILTER));
        assert!(debug.span_events);

        let worker = LogConfig::for_worker();
        assert_eq!(worker.level, Level::WARN);
        assert_eq!(worker.format, LogFormat::Compact);
    }

    #[test]
    fn test_env_filter_precedence() {
        let config = LogConfig::new()
            .with_overrides_from(env(&[("MOLBRIDGE_LOG", "trace"), ("RUST_LOG", "warn")]));
        assert_eq!(config.filter.as_deref(), Some("trace"));

        let config = LogConfig::new().with_overrides_from(env(&[("RUST_LOG", "warn")]));
        assert_eq!(config.filter.as_deref(), Some("warn"));

        // --debug wins over the environment
        let config = LogConfig::for_server(true).with_overrides_from(env(&[("RUST_LOG", "warn")]));
        assert_eq!(config.filter.as_deref(), Some(DEBUG_FILTER));
    }

    #[test]
    fn test_env_level_format_and_file() {
        let config = LogConfig::new().with_overrides_from(env(&[
            ("MOLBRIDGE_LOG_LEVEL", "debug"),
            ("MOLBRIDGE_LOG_FORMAT", "json"),
            ("MOLBRIDGE_LOG_FILE", "/tmp/molbridge.log"),
        ]));
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/molbridge.log")));
    }

    #[test]
    fn test_invalid_env_format_is_ignored() {
        let config = LogConfig::new().with_overrides_from(env(&[("MOLBRIDGE_LOG_FORMAT", "xml")]));
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_file(PathBuf::from("logs/bridge.log"));
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file_path, Some(PathBuf::from("logs/bridge.log")));
    }
}
