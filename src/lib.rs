//! Mesh App
//!
//! Bootstrap for processes made of independent named services: services are
//! registered at start-up, one configuration is assembled from environment,
//! flags and files, and every service then runs on its own thread until all
//! of them have returned.
//!
//! ```no_run
//! use mesh_app::{Config, register_service};
//!
//! fn main() {
//!     register_service("heartbeat", |config: &Config| {
//!         let period = config.get_as::<u64>("heartbeat.period_ms")?.unwrap_or(1000);
//!         std::thread::sleep(std::time::Duration::from_millis(period));
//!         Ok(())
//!     });
//!     mesh_app::run("mesh");
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod registry;

pub use config::Config;
pub use orchestrator::{Orchestrator, RunOutcome};
pub use registry::{ServiceRegistry, register_service};

#[doc(hidden)]
pub use inventory;

use clap::Parser;

/// Parse the command line and run every service in the global registry.
///
/// Startup failures are logged, not returned; the outcome tells which exit
/// path was taken.
pub fn run(tag: &str) -> RunOutcome {
    let cli = cli::Cli::parse();
    Orchestrator::from_cli(tag, cli).run()
}
