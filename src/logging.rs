//! Logging sink setup from the `logging` configuration section.
//!
//! Events are emitted with `tracing` everywhere in the crate. The sink decides
//! where they go; the default installs a `tracing-subscriber` fmt subscriber as
//! the process-wide default.
//!
//! ```yaml
//! logging:
//!   level: info,my_service=debug   # EnvFilter directives
//!   output: stderr                 # 0/off, 1/stdout, 2/stderr, or a file path
//!   format: compact                # full | compact
//! ```

use crate::config::Config;
use crate::error::LogError;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, reload};

/// Configuration key of the logging section.
pub const LOGGING_SECTION: &str = "logging";

/// Where log lines are written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RawOutput")]
pub enum LogOutput {
    /// No output
    Off,
    Stdout,
    #[default]
    Stderr,
    /// Append to a file
    File(PathBuf),
}

/// Accepts numeric shorthands, since env and flag values arrive coerced.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawOutput {
    Code(u64),
    Name(String),
}

impl TryFrom<RawOutput> for LogOutput {
    type Error = String;

    fn try_from(raw: RawOutput) -> Result<Self, Self::Error> {
        match raw {
            RawOutput::Code(0) => Ok(Self::Off),
            RawOutput::Code(1) => Ok(Self::Stdout),
            RawOutput::Code(2) => Ok(Self::Stderr),
            RawOutput::Code(n) => Err(format!("unknown log output code {n}")),
            RawOutput::Name(name) => Ok(match name.as_str() {
                "0" | "off" => Self::Off,
                "1" | "stdout" => Self::Stdout,
                "2" | "stderr" => Self::Stderr,
                _ => Self::File(PathBuf::from(name)),
            }),
        }
    }
}

/// Line format for the fmt subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

/// Contents of the `logging` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info` or `warn,my_service=debug`.
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Colored output; defaults to on for stdout/stderr, always off for files.
    pub ansi: Option<bool>,
    /// Include the event target (module path) in each line.
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::default(),
            format: LogFormat::default(),
            ansi: None,
            target: true,
        }
    }
}

impl LogConfig {
    /// Decode a logging section. An empty section yields the defaults.
    pub fn from_section(section: &Config) -> Result<Self, LogError> {
        section.deserialize().map_err(LogError::InvalidConfig)
    }

    /// Extract and decode the `logging` section of a merged configuration.
    pub fn from_config(config: &Config) -> Result<Self, LogError> {
        let section = config
            .sub(LOGGING_SECTION)
            .map_err(LogError::InvalidConfig)?;
        Self::from_section(&section)
    }
}

/// A logging backend initialized once per run.
///
/// Implementations must tolerate concurrent use from every service thread
/// once initialized.
pub trait LogSink: Send + Sync {
    fn init(&self, config: &LogConfig) -> Result<(), LogError>;

    /// Push out anything buffered. Called after all services have stopped.
    fn flush(&self) {}
}

type FilterLayer = reload::Layer<EnvFilter, Registry>;
type FilteredRegistry = Layered<FilterLayer, Registry>;
type FmtLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Reload handles of the subscriber installed by [`TracingSink`].
struct Installed {
    filter: reload::Handle<EnvFilter, Registry>,
    fmt: reload::Handle<FmtLayer, FilteredRegistry>,
}

static INSTALLED: Mutex<Option<Installed>> = Mutex::new(None);

/// Installs a `tracing-subscriber` fmt subscriber as the global default.
///
/// The global default can only be set once per process. The first `init`
/// installs it with reloadable filter and formatting layers; each later
/// `init` swaps those layers for the new run's settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    fn filter(config: &LogConfig) -> Result<EnvFilter, LogError> {
        let filter = parse_filter(&config.level)?;
        Ok(match config.output {
            LogOutput::Off => EnvFilter::new("off"),
            _ => filter,
        })
    }

    fn fmt_layer(config: &LogConfig) -> Result<FmtLayer, LogError> {
        let (writer, ansi) = match &config.output {
            LogOutput::Off => (BoxMakeWriter::new(std::io::sink), false),
            LogOutput::Stdout => (
                BoxMakeWriter::new(std::io::stdout),
                config.ansi.unwrap_or(true),
            ),
            LogOutput::Stderr => (
                BoxMakeWriter::new(std::io::stderr),
                config.ansi.unwrap_or(true),
            ),
            LogOutput::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| LogError::Open {
                        path: path.clone(),
                        source,
                    })?;
                (BoxMakeWriter::new(Mutex::new(file)), false)
            }
        };

        let layer = fmt::layer::<FilteredRegistry>()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(config.target);
        let layer: FmtLayer = match config.format {
            LogFormat::Full => Box::new(layer),
            LogFormat::Compact => Box::new(layer.compact()),
        };
        Ok(layer)
    }
}

impl LogSink for TracingSink {
    fn init(&self, config: &LogConfig) -> Result<(), LogError> {
        let filter = Self::filter(config)?;
        let fmt_layer = Self::fmt_layer(config)?;

        let mut installed = INSTALLED
            .lock()
            .map_err(|_| LogError::Install("log sink state poisoned".to_string()))?;

        if let Some(handles) = installed.as_ref() {
            handles.fmt.reload(fmt_layer).map_err(reload_error)?;
            handles.filter.reload(filter).map_err(reload_error)?;
            debug!(level = %config.level, "Log subscriber reconfigured");
            return Ok(());
        }

        let (filter, filter_handle) = reload::Layer::new(filter);
        let (fmt_layer, fmt_handle) = reload::Layer::new(fmt_layer);
        let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| LogError::Install(e.to_string()))?;

        *installed = Some(Installed {
            filter: filter_handle,
            fmt: fmt_handle,
        });
        Ok(())
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }
}

fn parse_filter(level: &str) -> Result<EnvFilter, LogError> {
    EnvFilter::try_new(level).map_err(|e| LogError::Filter {
        level: level.to_string(),
        message: e.to_string(),
    })
}

fn reload_error(err: reload::Error) -> LogError {
    LogError::Reload(err.to_string())
}

/// Leaves log setup to the host, which has already installed a subscriber
/// (globally or scoped). The configuration is still validated.
#[derive(Debug, Clone, Copy, Default)]
pub struct InheritSink;

impl LogSink for InheritSink {
    fn init(&self, config: &LogConfig) -> Result<(), LogError> {
        parse_filter(&config.level).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_section_yields_defaults() {
        let config = Config::new(json!({"server": {"port": 1}}));
        assert_eq!(LogConfig::from_config(&config).unwrap(), LogConfig::default());
    }

    #[test]
    fn test_output_aliases() {
        let cases = [
            (json!("off"), LogOutput::Off),
            (json!(0), LogOutput::Off),
            (json!("1"), LogOutput::Stdout),
            (json!(1), LogOutput::Stdout),
            (json!("stderr"), LogOutput::Stderr),
            (json!(2), LogOutput::Stderr),
            (json!("/var/log/app.log"), LogOutput::File("/var/log/app.log".into())),
        ];
        for (raw, expected) in cases {
            let config = Config::new(json!({"logging": {"output": raw}}));
            assert_eq!(LogConfig::from_config(&config).unwrap().output, expected);
        }
    }

    #[test]
    fn test_full_section() {
        let config = Config::new(json!({
            "logging": {"level": "warn,app=debug", "format": "compact", "ansi": false, "target": false}
        }));
        let log = LogConfig::from_config(&config).unwrap();
        assert_eq!(log.level, "warn,app=debug");
        assert_eq!(log.format, LogFormat::Compact);
        assert_eq!(log.ansi, Some(false));
        assert!(!log.target);
        assert_eq!(log.output, LogOutput::Stderr);
    }

    #[test]
    fn test_bad_output_code_is_invalid_config() {
        let config = Config::new(json!({"logging": {"output": 7}}));
        assert!(matches!(
            LogConfig::from_config(&config).unwrap_err(),
            LogError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_scalar_section_is_invalid_config() {
        let config = Config::new(json!({"logging": "loud"}));
        assert!(matches!(
            LogConfig::from_config(&config).unwrap_err(),
            LogError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_unknown_format_is_invalid_config() {
        let config = Config::new(json!({"logging": {"format": "xml"}}));
        assert!(LogConfig::from_config(&config).is_err());
    }

    #[test]
    fn test_inherit_sink_accepts_defaults() {
        assert!(InheritSink.init(&LogConfig::default()).is_ok());
    }

    #[test]
    fn test_bad_level_is_filter_error() {
        let config = LogConfig {
            level: "app=loud".to_string(),
            ..LogConfig::default()
        };
        for sink in [&InheritSink as &dyn LogSink, &TracingSink] {
            match sink.init(&config) {
                Err(LogError::Filter { level, .. }) => assert_eq!(level, "app=loud"),
                other => panic!("expected filter error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unwritable_log_file_is_open_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LogConfig {
            output: LogOutput::File(dir.path().join("missing").join("app.log")),
            ..LogConfig::default()
        };
        assert!(matches!(
            TracingSink.init(&config),
            Err(LogError::Open { .. })
        ));
    }
}
