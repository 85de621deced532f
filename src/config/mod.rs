//! Layered configuration.
//!
//! One configuration is assembled per run from an ordered list of sources,
//! each later source overriding the keys of the ones before it:
//! 1. **Environment** - variables starting with the app prefix (`MESH_...`)
//! 2. **Flags** - command-line arguments after `--`
//! 3. **Files** - the `--config` path; a directory contributes every file
//!    below it in lexical order
//!
//! ## Merge Strategy
//! - Mappings merge key by key
//! - Sequences and scalars are replaced whole
//! - `null` never erases a value set by an earlier source
//!
//! ## File Formats
//! `.yaml`/`.yml`, `.json` and `.toml`, chosen by extension.

mod loader;
mod merge;
mod sources;
mod types;

pub use loader::{ConfigAggregator, resolve};
pub use merge::{deep_merge, deep_merge_all};
pub use sources::{
    ConfigSource, EnvSource, FileFormat, FileSource, FlagSource, SourceKind, parse_scalar,
};
pub use types::Config;
