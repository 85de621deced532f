//! The merged configuration view handed to services.

use crate::error::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

/// Read-only view over a merged configuration tree.
///
/// Keys are dotted paths into nested mappings: `server.http.port` reads
/// `{"server": {"http": {"port": ..}}}`. The empty key addresses the root.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    root: Value,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl Config {
    /// Wrap a value tree. A `null` tree (no source contributed anything)
    /// becomes an empty mapping.
    pub fn new(root: Value) -> Self {
        match root {
            Value::Null => Self::default(),
            root => Self { root },
        }
    }

    /// Look up the raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if key.is_empty() {
            return Some(&self.root);
        }
        key.split('.')
            .try_fold(&self.root, |node, segment| node.as_object()?.get(segment))
    }

    /// Whether `key` holds a non-null value.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    /// Decode the value under `key`. Returns `Ok(None)` when the key is absent.
    ///
    /// Scalars convert between their string and typed forms when the stored
    /// form does not fit `T`: `MESH_PIN=1234` reads as `String` and `"8080"`
    /// from a file reads as `u16`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<Option<T>> {
        let value = match self.get(key) {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => value,
        };
        match T::deserialize(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(source) => alternate_scalar(value)
                .and_then(|alt| T::deserialize(alt).ok())
                .map(Some)
                .ok_or_else(|| ConfigError::Decode {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Extract the nested section under `key` as its own configuration.
    ///
    /// A missing section yields an empty configuration; a key holding
    /// anything other than a mapping is an error.
    pub fn sub(&self, key: &str) -> ConfigResult<Config> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(Config::default()),
            Some(value @ Value::Object(_)) => Ok(Config::new(value.clone())),
            Some(_) => Err(ConfigError::NotASection {
                key: key.to_string(),
            }),
        }
    }

    /// Decode the whole tree into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> ConfigResult<T> {
        T::deserialize(&self.root).map_err(|source| ConfigError::Decode {
            key: String::new(),
            source,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root.as_object().is_some_and(Map::is_empty)
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }
}

/// The other representation of a scalar: typed scalars as their text, text
/// as the bool or number it spells.
fn alternate_scalar(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::String(b.to_string())),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(b) = s.parse::<bool>() {
                Some(Value::Bool(b))
            } else if let Ok(n) = s.parse::<i64>() {
                Some(Value::Number(n.into()))
            } else if let Ok(n) = s.parse::<u64>() {
                Some(Value::Number(n.into()))
            } else {
                s.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
            }
        }
        _ => None,
    }
}

impl From<Value> for Config {
    fn from(root: Value) -> Self {
        Self::new(root)
    }
}
