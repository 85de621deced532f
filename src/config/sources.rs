//! Configuration sources: environment variables, command-line flags and files.
//!
//! Each source reads into a `serde_json::Value` mapping. The aggregator folds
//! them together; none of them know about each other.

use super::merge::insert_path;
use crate::error::{ConfigError, ConfigResult};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of a configuration source, in merge order (lowest precedence first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourceKind {
    /// Prefixed environment variables
    Environment = 0,
    /// Command-line flags
    Flags = 1,
    /// A configuration file (highest precedence)
    File = 2,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Environment => write!(f, "environment"),
            SourceKind::Flags => write!(f, "flags"),
            SourceKind::File => write!(f, "file"),
        }
    }
}

/// A provider of configuration data.
pub trait ConfigSource: fmt::Debug + Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Human-readable origin, used in log events.
    fn describe(&self) -> String;

    /// Read the source into a mapping. `Value::Null` means "contributes nothing".
    fn read(&self) -> ConfigResult<Value>;
}

/// Coerce a raw string from the environment or a flag into a typed value.
///
/// `true`/`false` become booleans. A number is only produced when it prints
/// back as exactly `raw`, so `8080` becomes a number while `01234`, `+5` and
/// `1.50` stay strings. Everything else stays a string.
pub fn parse_scalar(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        if n.to_string() == raw {
            return Value::Number(n.into());
        }
    } else if let Ok(n) = raw.parse::<u64>() {
        if n.to_string() == raw {
            return Value::Number(n.into());
        }
    } else if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        if n.to_string() == raw {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

/// Whether `arg` reads as a number, such as the `-3` in `--offset -3`.
fn is_numeric(arg: &str) -> bool {
    arg.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Environment variables carrying a fixed prefix.
///
/// `MESH_SERVER_PORT=8080` with prefix `MESH_` becomes `server.port = 8080`:
/// the prefix is stripped, the rest lower-cased and split on `_`.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
    /// Fixed variable set; `None` reads the process environment on each read.
    vars: Option<Vec<(String, String)>>,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            vars: None,
        }
    }

    /// Source over an explicit variable set instead of the process environment.
    pub fn from_vars<K, V>(
        prefix: impl Into<String>,
        vars: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: prefix.into(),
            vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl ConfigSource for EnvSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Environment
    }

    fn describe(&self) -> String {
        format!("env:{}*", self.prefix)
    }

    fn read(&self) -> ConfigResult<Value> {
        let mut vars: Vec<(String, String)> = match &self.vars {
            Some(vars) => vars.clone(),
            // Non-UTF-8 variables cannot be addressed by key and are skipped.
            None => std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        };
        vars.sort();

        let mut root = Map::new();
        for (name, raw) in &vars {
            let Some(rest) = name.strip_prefix(&self.prefix) else {
                continue;
            };
            let key = rest.to_lowercase();
            let segments: Vec<&str> = key.split('_').filter(|s| !s.is_empty()).collect();
            insert_path(&mut root, &segments, parse_scalar(raw));
        }
        Ok(Value::Object(root))
    }
}

/// Command-line flags, as left over after the host's own arguments.
///
/// Accepts `--key=value`, `--key value` and bare `--key` (boolean `true`);
/// a single leading dash works too. Keys split on `.` into nested keys. A
/// negative number after a key is its value, not another flag.
#[derive(Debug, Clone, Default)]
pub struct FlagSource {
    args: Vec<String>,
}

impl FlagSource {
    pub fn new(args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

fn flag_name(arg: &str) -> Option<&str> {
    let name = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))?;
    (!name.is_empty()).then_some(name)
}

impl ConfigSource for FlagSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Flags
    }

    fn describe(&self) -> String {
        format!("flags({})", self.args.len())
    }

    fn read(&self) -> ConfigResult<Value> {
        let mut root = Map::new();
        let mut args = self.args.iter().peekable();

        while let Some(arg) = args.next() {
            let name = flag_name(arg).ok_or_else(|| ConfigError::InvalidFlag(arg.clone()))?;

            let (key, value) = match name.split_once('=') {
                Some((key, raw)) => (key, parse_scalar(raw)),
                None => {
                    let value =
                        args.next_if(|next| flag_name(next).is_none() || is_numeric(next));
                    (name, value.map_or(Value::Bool(true), |raw| parse_scalar(raw)))
                }
            };

            let segments: Vec<&str> = key.split('.').collect();
            if segments.iter().any(|s| s.is_empty()) {
                return Err(ConfigError::InvalidFlag(arg.clone()));
            }
            insert_path(&mut root, &segments, value);
        }
        Ok(Value::Object(root))
    }
}

/// File formats understood by [`FileSource`], chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

/// One configuration file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    format: FileFormat,
}

impl FileSource {
    /// Fails with `UnsupportedFormat` when the extension is not recognised.
    pub fn new(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let format = FileFormat::from_path(&path)
            .ok_or_else(|| ConfigError::UnsupportedFormat { path: path.clone() })?;
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }
}

impl ConfigSource for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn read(&self) -> ConfigResult<Value> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Value::Null);
        }

        let value: Value = match self.format {
            FileFormat::Yaml => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::parse(&self.path, e))?
            }
            FileFormat::Json => {
                serde_json::from_str(&content).map_err(|e| ConfigError::parse(&self.path, e))?
            }
            FileFormat::Toml => {
                toml::from_str(&content).map_err(|e| ConfigError::parse(&self.path, e))?
            }
        };

        // Comment-only YAML parses as null.
        match value {
            Value::Object(_) | Value::Null => Ok(value),
            _ => Err(ConfigError::parse(
                &self.path,
                "top-level value must be a mapping",
            )),
        }
    }
}
