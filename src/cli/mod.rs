//! Command-line surface of a mesh app.
//!
//! The host defines a single option, `--config`. Everything after `--` is left
//! for services and reaches them through the flag configuration source.

use clap::Parser;
use std::path::PathBuf;

/// Run every registered service with a layered configuration
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file or directory (searched recursively)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Service flags, e.g. `-- --server.port=8080 --verbose`
    #[arg(last = true, allow_hyphen_values = true, value_name = "FLAGS")]
    pub flags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_and_trailing_flags() {
        let cli = Cli::try_parse_from([
            "mesh-app",
            "--config",
            "/etc/mesh",
            "--",
            "--server.port=8080",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/mesh")));
        assert_eq!(cli.flags, vec!["--server.port=8080", "--verbose"]);
    }

    #[test]
    fn test_no_arguments() {
        let cli = Cli::try_parse_from(["mesh-app"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.flags.is_empty());
    }

    #[test]
    fn test_unknown_option_before_separator_is_rejected() {
        assert!(Cli::try_parse_from(["mesh-app", "--server.port=8080"]).is_err());
    }
}
