//! Configuration aggregation: resolve a path, build ordered sources, merge.
//!
//! Sources are merged in this order (lowest to highest precedence):
//! 1. Environment variables with the configured prefix
//! 2. Command-line flags
//! 3. One file per resolved path, in traversal order
//!
//! Files therefore override flags and environment for the same key.

use super::merge::deep_merge_all;
use super::sources::{ConfigSource, EnvSource, FileSource, FlagSource};
use super::types::Config;
use crate::error::{ConfigError, ConfigResult};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Resolve `path` into the list of configuration files it names.
///
/// A file resolves to itself. A directory resolves to every regular file
/// below it, walked recursively in lexical order per directory. The root
/// itself is never part of the result.
pub fn resolve(path: &Path) -> ConfigResult<Vec<PathBuf>> {
    let metadata = std::fs::metadata(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ConfigError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;

    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| ConfigError::Walk {
            path: path.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Builds the merged configuration for one run.
#[derive(Debug, Clone)]
pub struct ConfigAggregator {
    env: EnvSource,
    flags: FlagSource,
}

impl ConfigAggregator {
    /// Aggregator over the process environment (variables starting with
    /// `env_prefix`) and no flags.
    pub fn new(env_prefix: impl Into<String>) -> Self {
        Self {
            env: EnvSource::new(env_prefix),
            flags: FlagSource::default(),
        }
    }

    /// Replace the environment source.
    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    /// Replace the flag source.
    pub fn with_flags(mut self, flags: FlagSource) -> Self {
        self.flags = flags;
        self
    }

    pub fn env_prefix(&self) -> &str {
        self.env.prefix()
    }

    /// Build the ordered source list for `path`: environment, flags, then
    /// one file source per resolved file.
    pub fn sources(&self, path: &Path) -> ConfigResult<Vec<Box<dyn ConfigSource>>> {
        let files = resolve(path)?;

        let mut sources: Vec<Box<dyn ConfigSource>> = Vec::with_capacity(files.len() + 2);
        sources.push(Box::new(self.env.clone()));
        sources.push(Box::new(self.flags.clone()));
        for file in files {
            sources.push(Box::new(FileSource::new(file)?));
        }
        Ok(sources)
    }

    /// Build and merge every source for `path` into one configuration.
    ///
    /// Any failure aborts the whole load; no partial configuration is returned.
    pub fn load(&self, path: &Path) -> ConfigResult<Config> {
        let values = self
            .sources(path)?
            .iter()
            .map(|source| {
                let value = source.read()?;
                debug!(
                    source = %source.describe(),
                    kind = %source.kind(),
                    empty = value.is_null(),
                    "Loaded config source"
                );
                Ok(value)
            })
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Config::new(deep_merge_all(values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;
    use std::fs;
    use tempfile::TempDir;

    fn aggregator() -> ConfigAggregator {
        let env = EnvSource::from_vars("T_", Vec::<(String, String)>::new());
        ConfigAggregator::new("T_").with_env(env)
    }

    #[test]
    fn test_resolve_missing_path() {
        let dir = TempDir::new().unwrap();
        let err = resolve(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_resolve_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("nested/empty")).unwrap();
        fs::write(dir.path().join("nested/x.yaml"), "a: 1").unwrap();

        let files = resolve(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("nested/x.yaml")]);
    }

    #[test]
    fn test_sources_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.yaml"), "a: 1").unwrap();
        fs::write(dir.path().join("a.yaml"), "a: 2").unwrap();

        let kinds: Vec<SourceKind> = aggregator()
            .sources(dir.path())
            .unwrap()
            .iter()
            .map(|s| s.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                SourceKind::Environment,
                SourceKind::Flags,
                SourceKind::File,
                SourceKind::File
            ]
        );
    }

    #[test]
    fn test_sources_fail_on_unsupported_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), "a: 1").unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        let err = aggregator().sources(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_load_later_files_win() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("01-base.yaml"), "level: debug\nname: base").unwrap();
        fs::write(dir.path().join("02-override.yaml"), "level: warn").unwrap();

        let config = aggregator().load(dir.path()).unwrap();
        assert_eq!(config.get_as::<String>("level").unwrap().as_deref(), Some("warn"));
        assert_eq!(config.get_as::<String>("name").unwrap().as_deref(), Some("base"));
    }

    #[test]
    fn test_load_parse_failure_aborts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), "ok: true").unwrap();
        fs::write(dir.path().join("b.json"), "{broken").unwrap();

        let err = aggregator().load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
